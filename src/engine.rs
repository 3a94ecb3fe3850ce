//! Collaborators of the mock pipeline.
//!
//! The mock engine that turns a request into a synthetic body and the request
//! validator live outside this crate; these traits are the seams they plug into.

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Inbound request as seen by the traffic control core.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MockRequest {
    pub method: String,
    /// Path without the query string
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_lossy"
    )]
    pub body: Option<Vec<u8>>,
}

/// Serialize a byte body as (lossy) UTF-8 text.
pub(crate) fn serialize_lossy<S>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match body {
        Some(bytes) => serializer.serialize_some(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}

impl MockRequest {
    /// Create a request; a query string on `uri` is split off.
    pub fn new(method: impl Into<String>, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            method: method.into(),
            path,
            query,
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header unless one with the same name is already present.
    ///
    /// Returns whether the header was written.
    pub fn set_header_if_absent(&mut self, name: &str, value: &str) -> bool {
        if self.header(name).is_some() {
            return false;
        }
        self.headers.insert(name.to_string(), value.to_string());
        true
    }
}

/// Response metadata produced by the mock engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MockMetadata {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
}

impl Default for MockMetadata {
    fn default() -> Self {
        Self {
            status_code: 200,
            headers: HashMap::new(),
        }
    }
}

/// Output of one mock generation.
///
/// A failed generation may still carry a body, so the error travels next to
/// the payload instead of replacing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedMock {
    pub body: Vec<u8>,
    pub metadata: MockMetadata,
    pub error: Option<String>,
}

impl GeneratedMock {
    /// A successful generation.
    pub fn ok(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            metadata: MockMetadata {
                status_code,
                headers: HashMap::new(),
            },
            error: None,
        }
    }

    /// A failed generation with no body.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Produces synthetic responses for requests.
#[async_trait]
pub trait MockEngine: Send + Sync {
    async fn generate(&self, request: &MockRequest) -> GeneratedMock;
}

/// Engine that answers every request with the same payload.
#[derive(Debug, Clone)]
pub struct StaticMockEngine {
    mock: GeneratedMock,
}

impl StaticMockEngine {
    pub fn new(mock: GeneratedMock) -> Self {
        Self { mock }
    }

    /// Serve a JSON document with the given status.
    pub fn json(status_code: u16, body: &serde_json::Value) -> Self {
        Self::new(GeneratedMock::ok(status_code, body.to_string()))
    }
}

#[async_trait]
impl MockEngine for StaticMockEngine {
    async fn generate(&self, _request: &MockRequest) -> GeneratedMock {
        self.mock.clone()
    }
}

/// Observes the original and rewritten request; findings never gate a response.
pub trait RequestValidator: Send + Sync {
    fn validate(&self, original: &MockRequest, rewritten: &MockRequest) -> Vec<String>;
}

impl<F> RequestValidator for F
where
    F: Fn(&MockRequest, &MockRequest) -> Vec<String> + Send + Sync,
{
    fn validate(&self, original: &MockRequest, rewritten: &MockRequest) -> Vec<String> {
        self(original, rewritten)
    }
}

/// Validator that reports nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoValidation;

impl RequestValidator for NoValidation {
    fn validate(&self, _original: &MockRequest, _rewritten: &MockRequest) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_splits_query() {
        let request = MockRequest::new("GET", "/pets/1?expand=owner");
        assert_eq!(request.path, "/pets/1");
        assert_eq!(request.query.as_deref(), Some("expand=owner"));
    }

    #[test]
    fn test_request_body_is_serialized_as_text() {
        let request = MockRequest::new("POST", "/pets").with_body(r#"{"name":"Thunder"}"#);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["body"], r#"{"name":"Thunder"}"#);

        let json = serde_json::to_value(MockRequest::new("GET", "/pets")).unwrap();
        assert!(json.get("body").is_none());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut request =
            MockRequest::new("GET", "/pets").with_header("preferred", "Dog");
        assert_eq!(request.header("Preferred"), Some("Dog"));
        assert!(!request.set_header_if_absent("PREFERRED", "Cat"));
        assert!(request.set_header_if_absent("Wiretap-Traffic-Control", "Cat"));
        assert_eq!(request.header("wiretap-traffic-control"), Some("Cat"));
    }

    #[tokio::test]
    async fn test_static_engine() {
        let engine = StaticMockEngine::json(201, &serde_json::json!({"id": 1}));
        let mock = engine.generate(&MockRequest::new("POST", "/pets")).await;
        assert_eq!(mock.metadata.status_code, 201);
        assert_eq!(mock.body, br#"{"id":1}"#);
        assert!(mock.error.is_none());
    }

    #[test]
    fn test_closure_validator() {
        let validator = |_: &MockRequest, rewritten: &MockRequest| {
            if rewritten.header("Preferred").is_none() {
                vec!["missing preference".to_string()]
            } else {
                Vec::new()
            }
        };
        let request = MockRequest::new("GET", "/pets");
        assert_eq!(validator.validate(&request, &request).len(), 1);
        assert!(NoValidation.validate(&request, &request).is_empty());
    }
}
