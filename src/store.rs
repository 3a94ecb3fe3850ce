//! Traffic control configuration store.
//!
//! The store is the single source of truth for route overrides. Request
//! handling reads snapshots; operator commands replace the whole value. Two
//! concurrent commands are last-writer-wins: each one reads a snapshot,
//! mutates a copy and puts the copy back.

use crate::config::{TrafficControlPath, Variable, WiretapConfiguration};
use crate::matcher::{DelayMatcher, RouteMatcher};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Channel the commands arrive on.
pub const TRAFFIC_CONTROL_CHANNEL: &str = "traffic-control";

/// Answer to `get-all-paths` when no contract is loaded.
pub const NO_SPEC: &[u8] = b"no-spec";

/// A configuration together with its compiled route and delay matchers.
///
/// Matchers are built once per configuration change and shared by every
/// request reading this snapshot.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    config: WiretapConfiguration,
    routes: RouteMatcher,
    delays: DelayMatcher,
}

impl ConfigSnapshot {
    pub fn new(config: WiretapConfiguration) -> Self {
        let routes = RouteMatcher::new(&config.traffic_control_routes_override);
        let delays = DelayMatcher::new(&config.path_delays);
        Self {
            config,
            routes,
            delays,
        }
    }

    pub fn config(&self) -> &WiretapConfiguration {
        &self.config
    }

    pub fn routes(&self) -> &RouteMatcher {
        &self.routes
    }

    pub fn delays(&self) -> &DelayMatcher {
        &self.delays
    }
}

impl Deref for ConfigSnapshot {
    type Target = WiretapConfiguration;

    fn deref(&self) -> &Self::Target {
        &self.config
    }
}

impl PartialEq for ConfigSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config
    }
}

/// Holds the process-wide configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current configuration.
    async fn snapshot(&self) -> Arc<ConfigSnapshot>;

    /// Replace the whole configuration.
    async fn replace(&self, config: WiretapConfiguration);
}

/// Store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl InMemoryConfigStore {
    pub fn new(config: WiretapConfiguration) -> Self {
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot::new(config))),
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().await.clone()
    }

    async fn replace(&self, config: WiretapConfiguration) {
        // compile outside the lock
        let snapshot = Arc::new(ConfigSnapshot::new(config));
        *self.current.write().await = snapshot;
    }
}

/// Commands understood on the traffic control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetPathToMockMode,
    SetPathPolymorphicSchema,
    SetPathPreferenceExample,
    GetAllPaths,
    SetPathVariables,
    SetPathRequestBodyVariables,
}

impl Command {
    pub fn parse(command: &str) -> Option<Self> {
        match command {
            "set-path-to-mock-mode" => Some(Command::SetPathToMockMode),
            "set-path-polymorphic-schema" => Some(Command::SetPathPolymorphicSchema),
            "set-path-preference-example" => Some(Command::SetPathPreferenceExample),
            "get-all-paths" => Some(Command::GetAllPaths),
            "set-path-variables-command" => Some(Command::SetPathVariables),
            "set-path-request-body-variables-command" => Some(Command::SetPathRequestBodyVariables),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::SetPathToMockMode => "set-path-to-mock-mode",
            Command::SetPathPolymorphicSchema => "set-path-polymorphic-schema",
            Command::SetPathPreferenceExample => "set-path-preference-example",
            Command::GetAllPaths => "get-all-paths",
            Command::SetPathVariables => "set-path-variables-command",
            Command::SetPathRequestBodyVariables => "set-path-request-body-variables-command",
        }
    }
}

/// Payload of the single-field path commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PathRequest {
    #[serde(default)]
    pub path_name: String,
    #[serde(default)]
    pub mock_type: String,
    #[serde(default)]
    pub example_preference: String,
    #[serde(default)]
    pub mock_mode: bool,
}

/// Payload of the variable commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VariableRequest {
    #[serde(default)]
    pub path_name: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// Public view of one route override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathView {
    pub path_name: String,
    pub mock_type: String,
    pub mock_mode: bool,
    pub example_preference: String,
    pub request_body_variables: Vec<Variable>,
    pub variables: Vec<Variable>,
}

impl From<&TrafficControlPath> for PathView {
    fn from(route: &TrafficControlPath) -> Self {
        Self {
            path_name: route.path.clone(),
            mock_type: route.mock_type.clone(),
            mock_mode: route.mock_mode,
            example_preference: route.example_preference.clone(),
            request_body_variables: route.request_body_variables.clone(),
            variables: route.variables.clone(),
        }
    }
}

/// A request on the traffic control channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceRequest {
    pub command: String,
    /// JSON encoded payload; empty for `get-all-paths`
    #[serde(default)]
    pub payload: String,
}

impl ServiceRequest {
    pub fn new(command: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            payload: payload.into(),
        }
    }
}

/// Answer sent back on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceResponse {
    Paths(Vec<PathView>),
    NoSpec,
    Unknown { command: String },
}

impl ServiceResponse {
    /// Wire representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ServiceResponse::Paths(paths) => serde_json::to_vec(paths).unwrap_or_default(),
            ServiceResponse::NoSpec => NO_SPEC.to_vec(),
            ServiceResponse::Unknown { command } => serde_json::json!({
                "error": "unknown_request",
                "message": format!("unknown command `{}` on {}", command, TRAFFIC_CONTROL_CHANNEL),
            })
            .to_string()
            .into_bytes(),
        }
    }
}

/// Errors raised while applying a command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid payload for `{command}`: {source}")]
    Payload {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("no route override for path `{0}`")]
    UnknownPath(String),
}

/// Applies operator commands to the configuration store.
pub struct TrafficControlService {
    store: Arc<dyn ConfigStore>,
}

impl TrafficControlService {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Handle one request. Mutating commands answer nothing on success.
    pub async fn handle_request(
        &self,
        request: &ServiceRequest,
    ) -> Result<Option<ServiceResponse>, CommandError> {
        let Some(command) = Command::parse(&request.command) else {
            return Ok(Some(self.handle_unknown(request)));
        };

        let result = match command {
            Command::GetAllPaths => return Ok(Some(self.get_all_paths().await)),
            Command::SetPathToMockMode => {
                let pr: PathRequest = decode(command, &request.payload)?;
                self.update_path(&pr.path_name, |route| route.mock_mode = pr.mock_mode)
                    .await
            }
            Command::SetPathPolymorphicSchema => {
                let pr: PathRequest = decode(command, &request.payload)?;
                self.update_path(&pr.path_name, |route| route.mock_type = pr.mock_type.clone())
                    .await
            }
            Command::SetPathPreferenceExample => {
                let pr: PathRequest = decode(command, &request.payload)?;
                self.update_path(&pr.path_name, |route| {
                    route.example_preference = pr.example_preference.clone()
                })
                .await
            }
            Command::SetPathVariables => {
                let vr: VariableRequest = decode(command, &request.payload)?;
                self.update_path(&vr.path_name, |route| route.variables = vr.variables)
                    .await
            }
            Command::SetPathRequestBodyVariables => {
                let vr: VariableRequest = decode(command, &request.payload)?;
                self.update_path(&vr.path_name, |route| {
                    route.request_body_variables = vr.variables
                })
                .await
            }
        };

        match &result {
            Ok(()) => info!(command = command.as_str(), "Traffic control updated"),
            Err(e) => warn!(command = command.as_str(), error = %e, "Traffic control command rejected"),
        }
        result.map(|_| None)
    }

    async fn get_all_paths(&self) -> ServiceResponse {
        let config = self.store.snapshot().await;
        if config.contract.is_none() {
            return ServiceResponse::NoSpec;
        }
        ServiceResponse::Paths(
            config
                .traffic_control_routes_override
                .iter()
                .map(PathView::from)
                .collect(),
        )
    }

    async fn update_path<F>(&self, path_name: &str, mutate: F) -> Result<(), CommandError>
    where
        F: FnOnce(&mut TrafficControlPath),
    {
        let mut config = self.store.snapshot().await.config().clone();
        let route = config
            .route_mut(path_name)
            .ok_or_else(|| CommandError::UnknownPath(path_name.to_string()))?;
        mutate(route);
        self.store.replace(config).await;
        Ok(())
    }

    fn handle_unknown(&self, request: &ServiceRequest) -> ServiceResponse {
        warn!(
            channel = TRAFFIC_CONTROL_CHANNEL,
            command = %request.command,
            "Unknown traffic control request"
        );
        ServiceResponse::Unknown {
            command: request.command.clone(),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(command: Command, payload: &str) -> Result<T, CommandError> {
    serde_json::from_str(payload).map_err(|source| CommandError::Payload {
        command: command.as_str(),
        source,
    })
}
