//! Configuration for the traffic control core.
//!
//! Defines route overrides, their variables, and latency simulation settings.

use crate::matcher::PathTemplate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Process-wide configuration shared by request handling and the config store.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WiretapConfiguration {
    /// Location of the loaded OpenAPI contract, if any
    #[serde(default)]
    pub contract: Option<String>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Path specific latency, matched by glob in order
    #[serde(default)]
    pub path_delays: Vec<PathDelay>,

    /// Per-route overrides, in evaluation order
    #[serde(default)]
    pub traffic_control_routes_override: Vec<TrafficControlPath>,
}

impl WiretapConfiguration {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, route) in self.traffic_control_routes_override.iter().enumerate() {
            route
                .validate()
                .map_err(|e| anyhow::anyhow!("Route {} ({}): {}", i, route.path, e))?;
        }
        for delay in &self.path_delays {
            delay
                .delay
                .validate()
                .map_err(|e| anyhow::anyhow!("Path delay {}: {}", delay.path, e))?;
        }
        Ok(())
    }

    /// Find a route override by its exact templated path key.
    pub fn route(&self, path: &str) -> Option<&TrafficControlPath> {
        self.traffic_control_routes_override
            .iter()
            .find(|route| route.path == path)
    }

    /// Find a mutable route override by its exact templated path key.
    pub fn route_mut(&mut self, path: &str) -> Option<&mut TrafficControlPath> {
        self.traffic_control_routes_override
            .iter_mut()
            .find(|route| route.path == path)
    }
}

/// Operator override for one templated path.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TrafficControlPath {
    /// Templated path key, e.g. `/users/{id}`
    pub path: String,

    /// Generation strategy hint handed to the mock engine
    #[serde(default)]
    pub mock_type: String,

    /// Force mocking for this route regardless of the client header
    #[serde(default)]
    pub mock_mode: bool,

    /// Preferred example name
    #[serde(default)]
    pub example_preference: String,

    /// Variables resolved from path captures, mock lookups or literals
    #[serde(default)]
    pub variables: Vec<Variable>,

    /// Variables written into the mock body; names are JSON paths
    #[serde(default)]
    pub request_body_variables: Vec<Variable>,
}

impl TrafficControlPath {
    /// Create an empty override for a templated path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Validate the route override.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.path.is_empty() {
            anyhow::bail!("path cannot be empty");
        }
        PathTemplate::compile(&self.path)?;
        for (i, variable) in self.request_body_variables.iter().enumerate() {
            if !variable.is_mockable_field() {
                anyhow::bail!(
                    "request body variable {} ({:?}) must name a field starting with '.'",
                    i,
                    variable.name
                );
            }
        }
        Ok(())
    }
}

/// A named value attached to a route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    /// Empty for pure captures, `.path` for body fields, otherwise an identifier
    #[serde(default)]
    pub name: String,

    /// Expression before resolution, any JSON value after
    pub value: VariableValue,

    /// Opaque identifier assigned by the UI
    #[serde(default)]
    pub id: String,
}

impl Variable {
    /// Create a variable holding an unresolved expression.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: VariableValue::Expression(value.into()),
            id: String::new(),
        }
    }

    /// Set the opaque identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Whether the name addresses a field in the mock body.
    pub fn is_mockable_field(&self) -> bool {
        self.name.starts_with('.')
    }
}

/// Value of a [`Variable`].
///
/// Strings arriving from configuration are expressions (`${n}`, `.path` or a
/// literal); anything produced by resolution is a JSON value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum VariableValue {
    /// Unresolved expression or literal text
    Expression(String),
    /// Resolved JSON value
    Resolved(serde_json::Value),
}

impl VariableValue {
    /// The expression text, if the value has not been resolved.
    pub fn as_expression(&self) -> Option<&str> {
        match self {
            VariableValue::Expression(expr) => Some(expr),
            VariableValue::Resolved(_) => None,
        }
    }

    /// Whether resolution already produced this value.
    pub fn is_resolved(&self) -> bool {
        matches!(self, VariableValue::Resolved(_))
    }

    /// The value as text: an expression, or a resolved JSON string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            VariableValue::Expression(expr) => Some(expr),
            VariableValue::Resolved(serde_json::Value::String(s)) => Some(s),
            VariableValue::Resolved(_) => None,
        }
    }

    /// The JSON value to write into a mock body.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            VariableValue::Expression(expr) => serde_json::Value::String(expr.clone()),
            VariableValue::Resolved(value) => value.clone(),
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableValue::Expression(expr) => f.write_str(expr),
            VariableValue::Resolved(serde_json::Value::String(s)) => f.write_str(s),
            VariableValue::Resolved(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for VariableValue {
    fn from(expr: &str) -> Self {
        VariableValue::Expression(expr.to_string())
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    /// A fixed delay.
    pub fn fixed(ms: u64) -> Self {
        Self {
            fixed_ms: ms,
            ..Self::default()
        }
    }

    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.fixed_ms > 0 {
            return self.fixed_ms;
        }
        if self.max_ms > self.min_ms {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            return rng.gen_range(self.min_ms..=self.max_ms);
        }
        self.min_ms
    }

    /// Validate the delay range.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_ms > 0 && self.max_ms < self.min_ms {
            anyhow::bail!(
                "max_ms ({}) must not be lower than min_ms ({})",
                self.max_ms,
                self.min_ms
            );
        }
        Ok(())
    }
}

/// Latency for requests whose path matches `path`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathDelay {
    /// Glob or templated path
    pub path: String,

    #[serde(flatten)]
    pub delay: DelayConfig,
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Delay applied to every mocked request without a path delay (ms)
    #[serde(default)]
    pub global_api_delay_ms: u64,

    /// Wait before publishing to the monitor (ms)
    #[serde(default = "default_broadcast_delay")]
    pub broadcast_delay_ms: u64,

    /// Log traffic control decisions
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Content type of mocked responses
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            global_api_delay_ms: 0,
            broadcast_delay_ms: default_broadcast_delay(),
            log_matches: true,
            default_content_type: default_content_type(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_broadcast_delay() -> u64 {
    5
}

fn default_content_type() -> String {
    "application/json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const COWBOYS: &str = r#"
contract: cowboys.yaml
settings:
  global_api_delay_ms: 10
path_delays:
  - path: /slow/*
    fixed_ms: 250
traffic_control_routes_override:
  - path: /cowboys/{id}/are-awesome/{second-id}/last
    mock_type: Cowboy
    mock_mode: true
    variables:
      - name: id
        value: "${0}"
        id: a1
      - name: name
        value: .name
        id: a2
      - name: answer
        value: 42
    request_body_variables:
      - name: .id
        value: id
        id: b1
"#;

    #[test]
    fn test_parse_routes() {
        let config = WiretapConfiguration::from_yaml(COWBOYS).unwrap();
        assert_eq!(config.contract.as_deref(), Some("cowboys.yaml"));
        assert_eq!(config.traffic_control_routes_override.len(), 1);

        let route = &config.traffic_control_routes_override[0];
        assert!(route.mock_mode);
        assert_eq!(route.mock_type, "Cowboy");
        assert_eq!(route.variables[0].value, VariableValue::from("${0}"));
        assert_eq!(route.variables[0].id, "a1");
        assert_eq!(
            route.variables[2].value,
            VariableValue::Resolved(serde_json::json!(42))
        );
        assert_eq!(route.request_body_variables[0].name, ".id");
    }

    #[test]
    fn test_parse_settings_and_delays() {
        let config = WiretapConfiguration::from_yaml(COWBOYS).unwrap();
        assert_eq!(config.settings.global_api_delay_ms, 10);
        assert_eq!(config.settings.broadcast_delay_ms, 5);
        assert_eq!(config.settings.default_content_type, "application/json");
        assert_eq!(config.path_delays[0].path, "/slow/*");
        assert_eq!(config.path_delays[0].delay.fixed_ms, 250);
    }

    #[test]
    fn test_rejects_unmockable_request_body_variable() {
        let yaml = r#"
traffic_control_routes_override:
  - path: /pets/{id}
    request_body_variables:
      - name: id
        value: petId
"#;
        let err = WiretapConfiguration::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("/pets/{id}"));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let yaml = r#"
traffic_control_routes_override:
  - path: /pets
    mock_mood: true
"#;
        assert!(WiretapConfiguration::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(COWBOYS.as_bytes()).unwrap();

        let config = WiretapConfiguration::from_file(file.path()).unwrap();
        assert!(config
            .route("/cowboys/{id}/are-awesome/{second-id}/last")
            .is_some());
        assert!(config.route("/cowboys/{id}").is_none());
    }

    #[test]
    fn test_variable_value_display() {
        assert_eq!(VariableValue::from("${0}").to_string(), "${0}");
        assert_eq!(
            VariableValue::Resolved(serde_json::json!("rodeo")).to_string(),
            "rodeo"
        );
        assert_eq!(
            VariableValue::Resolved(serde_json::json!(101)).to_string(),
            "101"
        );
    }

    #[test]
    fn test_variable_value_text() {
        let expression = VariableValue::from(".name");
        assert_eq!(expression.as_text(), Some(".name"));
        assert!(!expression.is_resolved());

        let captured = VariableValue::Resolved(serde_json::json!(".name"));
        assert_eq!(captured.as_text(), Some(".name"));
        assert!(captured.is_resolved());

        assert_eq!(VariableValue::Resolved(serde_json::json!(101)).as_text(), None);
    }

    #[test]
    fn test_variable_json_shape() {
        let variable: Variable =
            serde_json::from_str(r#"{"name":".horse.name","value":"name","id":"x"}"#).unwrap();
        assert_eq!(variable.value.as_expression(), Some("name"));
        assert!(variable.is_mockable_field());

        let resolved = Variable {
            value: VariableValue::Resolved(serde_json::json!({"a": 1})),
            ..variable
        };
        let json = serde_json::to_value(&resolved).unwrap();
        assert_eq!(json["value"]["a"], 1);
    }

    #[test]
    fn test_delay_calculation() {
        assert_eq!(DelayConfig::fixed(100).calculate(), 100);

        let range = DelayConfig {
            fixed_ms: 0,
            min_ms: 50,
            max_ms: 150,
        };
        let delay = range.calculate();
        assert!((50..=150).contains(&delay));

        let inverted = DelayConfig {
            fixed_ms: 0,
            min_ms: 150,
            max_ms: 50,
        };
        assert!(inverted.validate().is_err());
    }
}
