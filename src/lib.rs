//! Wiretap Traffic Control
//!
//! Traffic control core for an intercepting HTTP proxy. For every inbound
//! request it decides whether to forward to the real upstream or answer with
//! a mock, resolves operator defined variables and rewrites the mock body
//! before it reaches the client.
//!
//! # Features
//!
//! - **Route Overrides**: Force mocking per templated path, with mock type and
//!   example preference hints
//! - **Header Control**: `Wiretap-Traffic-Control: $name` mocks a single request
//!   and selects which variables apply
//! - **Variables**: Positional path captures (`${0}`), mock lookups (`.path`),
//!   cross-route references and literals
//! - **Mock Rewriting**: Request body variables are written into the mock
//! - **Latency Simulation**: Global and per-path delays
//! - **Operator Commands**: Update overrides at runtime over a command channel
//!
//! # Example Configuration
//!
//! ```yaml
//! contract: cowboys.yaml
//! settings:
//!   global_api_delay_ms: 0
//! traffic_control_routes_override:
//!   - path: /cowboys/{id}
//!     mock_mode: true
//!     variables:
//!       - name: id
//!         value: "${0}"
//!     request_body_variables:
//!       - name: .id
//!         value: id
//! ```

pub mod config;
pub mod engine;
pub mod json_path;
pub mod matcher;
pub mod monitor;
pub mod responder;
pub mod store;
pub mod traffic_control;
pub mod variables;

pub use config::{TrafficControlPath, Variable, VariableValue, WiretapConfiguration};
pub use engine::{GeneratedMock, MockEngine, MockRequest, RequestValidator, StaticMockEngine};
pub use monitor::{BroadcastHandle, ChannelMonitor, Monitor, MonitorEvent};
pub use responder::{MockOutcome, MockResponder, MockResponse, RequestDisposition};
pub use store::{
    ConfigSnapshot, ConfigStore, InMemoryConfigStore, ServiceRequest, ServiceResponse,
    TrafficControlService,
};
pub use traffic_control::{TrafficControl, TrafficControlDecider};
pub use variables::{Resolution, ResolutionError, VariableResolver};
