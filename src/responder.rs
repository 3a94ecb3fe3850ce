//! Mock response orchestration.
//!
//! Ties the traffic control decision, latency simulation, mock generation,
//! variable resolution, request validation and the monitoring broadcast into
//! one response.

use crate::config::WiretapConfiguration;
use crate::engine::{
    serialize_lossy, GeneratedMock, MockEngine, MockRequest, NoValidation, RequestValidator,
};
use crate::monitor::{BroadcastHandle, Monitor, MonitorEvent};
use crate::store::{ConfigSnapshot, ConfigStore};
use crate::traffic_control::{TrafficControlDecider, TrafficDecision};
use crate::variables::{ResolutionError, VariableResolver};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "OPTIONS,POST,GET,DELETE,PATCH,PUT"),
    ("Access-Control-Allow-Headers", "*"),
];

/// A synthesized HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MockResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// `None` when only the status line and headers are written
    #[serde(serialize_with = "serialize_lossy")]
    pub body: Option<Vec<u8>>,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Set a header, replacing any existing header with the same name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.to_string());
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as text, if any.
    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// Error body sent to clients when mock generation fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl ErrorEnvelope {
    pub fn new(title: impl Into<String>, status: u16, detail: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status,
            detail: detail.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Result of a mocked request.
#[derive(Debug)]
pub struct MockOutcome {
    pub response: MockResponse,
    /// Never shown to the client
    pub resolution_errors: Vec<ResolutionError>,
    pub validation_findings: Vec<String>,
    pub broadcast: BroadcastHandle,
}

/// What to do with an inbound request.
#[derive(Debug)]
pub enum RequestDisposition {
    /// Forward to the upstream
    Forward(MockRequest),
    /// Answered with a mock
    Mocked(MockOutcome),
}

/// Serves mocked responses for requests traffic control selects.
pub struct MockResponder {
    store: Arc<dyn ConfigStore>,
    engine: Arc<dyn MockEngine>,
    validator: Arc<dyn RequestValidator>,
    monitor: Arc<dyn Monitor>,
}

impl MockResponder {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        engine: Arc<dyn MockEngine>,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            store,
            engine,
            validator: Arc::new(NoValidation),
            monitor,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn RequestValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Decide and, when mocking, build the response.
    pub async fn handle(&self, request: MockRequest) -> RequestDisposition {
        let config = self.store.snapshot().await;
        let original = request.clone();
        let mut request = request;

        let decider =
            TrafficControlDecider::new(&config.traffic_control_routes_override, config.routes());
        let decision = decider.decide(&mut request);
        if !decision.should_mock() {
            return RequestDisposition::Forward(request);
        }

        RequestDisposition::Mocked(self.respond(&config, &decision, original, request).await)
    }

    async fn respond(
        &self,
        config: &ConfigSnapshot,
        decision: &TrafficDecision<'_>,
        original: MockRequest,
        request: MockRequest,
    ) -> MockOutcome {
        simulate_latency(config, &request.path).await;

        let mock = self.engine.generate(&request).await;

        let mut resolution_errors = Vec::new();
        let body = match decision.route {
            Some(route) => {
                let resolution = VariableResolver::new(route, &config.traffic_control_routes_override)
                    .with_template(config.routes().template(&route.path))
                    .with_selector(decision.selector.as_deref())
                    .resolve(&request.path, &mock.body);
                for e in &resolution.errors {
                    warn!(path = %request.path, route = %route.path, error = %e, "Variable resolution problem");
                }
                resolution_errors = resolution.errors;
                resolution.body
            }
            None => mock.body.clone(),
        };

        let validation_findings = self.validator.validate(&original, &request);
        for finding in &validation_findings {
            debug!(path = %request.path, finding = %finding, "Request validation");
        }

        let response = build_response(config, &request, &mock, body);
        if config.settings.log_matches {
            info!(
                method = %request.method,
                path = %request.path,
                control = ?decision.control,
                code = response.status,
                "Serving mocked response"
            );
        }

        let broadcast = BroadcastHandle::spawn(
            self.monitor.clone(),
            MonitorEvent::new(request, response.clone()),
            Duration::from_millis(config.settings.broadcast_delay_ms),
        );

        MockOutcome {
            response,
            resolution_errors,
            validation_findings,
            broadcast,
        }
    }
}

/// Sleep for the path delay, or the global delay when no path delay matches
/// or the matching one works out to zero.
async fn simulate_latency(config: &ConfigSnapshot, path: &str) {
    let delay_ms = config
        .delays()
        .find(path)
        .map(|delay| delay.calculate())
        .filter(|ms| *ms > 0)
        .unwrap_or(config.settings.global_api_delay_ms);
    if delay_ms > 0 {
        debug!(path = %path, delay_ms, "Applying delay");
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

fn build_response(
    config: &WiretapConfiguration,
    request: &MockRequest,
    mock: &GeneratedMock,
    body: Vec<u8>,
) -> MockResponse {
    let mut response = MockResponse::new(mock.metadata.status_code);
    for (name, value) in CORS_HEADERS {
        response.set_header(name, value);
    }
    response.set_header("Content-Type", &config.settings.default_content_type);
    for (name, value) in &mock.metadata.headers {
        response.set_header(name, value);
    }

    match &mock.error {
        Some(e) if body.is_empty() => {
            error!(path = %request.path, code = 404, error = %e, "Mock mode request error");
            response.status = 404;
            let envelope =
                ErrorEnvelope::new("[mock error] unable to generate mock for request", 404, e.as_str());
            response.body = Some(envelope.to_bytes());
        }
        Some(e) => {
            warn!(path = %request.path, code = response.status, violation = %e, "Mock mode request problem");
            let envelope =
                ErrorEnvelope::new("unable to serve mocked response", response.status, e.as_str());
            response.body = Some(envelope.to_bytes());
        }
        None if body.is_empty() => {}
        None => response.body = Some(body),
    }

    response
}
