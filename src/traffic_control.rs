//! Mock-or-forward decisions.
//!
//! A request is mocked when its route is forced into mock mode by the operator,
//! or when the client selects a variable through the traffic control header.

use crate::config::TrafficControlPath;
use crate::engine::MockRequest;
use crate::matcher::RouteMatcher;
use tracing::{debug, error};

/// Client header steering traffic control.
pub const TRAFFIC_CONTROL_HEADER: &str = "Wiretap-Traffic-Control";

/// Header telling the mock engine which example or schema to prefer.
pub const PREFERRED_HEADER: &str = "Preferred";

const PROXY: &str = "proxy";
const REFERENCE_PREFIX: char = '$';

/// Traffic control state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrafficControl {
    #[default]
    Unset,
    /// Forward to the upstream
    Proxy,
    /// Client selected a variable with a `$` header
    VariableReference,
    /// Operator forced the route into mock mode
    Forced,
}

impl TrafficControl {
    /// Classify a raw header value. Unrecognized values fall back to [`TrafficControl::Proxy`].
    pub fn from_header(value: &str) -> Self {
        if value.is_empty() || value == PROXY {
            TrafficControl::Proxy
        } else if value.starts_with(REFERENCE_PREFIX) {
            TrafficControl::VariableReference
        } else {
            error!(
                header = TRAFFIC_CONTROL_HEADER,
                value = %value,
                "Incorrectly set traffic control, not rerouting your endpoint to anywhere"
            );
            TrafficControl::Proxy
        }
    }

    /// Whether the mock pipeline should run.
    pub fn should_mock(self) -> bool {
        matches!(self, TrafficControl::Forced | TrafficControl::VariableReference)
    }
}

/// Outcome of [`TrafficControlDecider::decide`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficDecision<'a> {
    pub control: TrafficControl,
    /// First route whose glob matched the request path
    pub route: Option<&'a TrafficControlPath>,
    /// Header value after `$` in variable reference mode
    pub selector: Option<String>,
}

impl TrafficDecision<'_> {
    pub fn should_mock(&self) -> bool {
        self.control.should_mock()
    }
}

/// Decides per request whether to mock or forward.
pub struct TrafficControlDecider<'a> {
    routes: &'a [TrafficControlPath],
    matcher: &'a RouteMatcher,
}

impl<'a> TrafficControlDecider<'a> {
    /// `matcher` must be compiled from `routes`.
    pub fn new(routes: &'a [TrafficControlPath], matcher: &'a RouteMatcher) -> Self {
        Self { routes, matcher }
    }

    /// Decide for one request.
    ///
    /// A forced route gets the traffic control and `Preferred` headers set to
    /// its mock type, unless the client already sent them.
    pub fn decide(&self, request: &mut MockRequest) -> TrafficDecision<'a> {
        let route = self.matcher.find(self.routes, &request.path);

        if let Some(route) = route.filter(|r| r.mock_mode) {
            inject_default_headers(request, route);
            debug!(path = %request.path, route = %route.path, "Route forced into mock mode");
            return TrafficDecision {
                control: TrafficControl::Forced,
                route: Some(route),
                selector: None,
            };
        }

        let header = request.header(TRAFFIC_CONTROL_HEADER).unwrap_or("");
        let control = TrafficControl::from_header(header);
        let selector = match control {
            TrafficControl::VariableReference => Some(header[REFERENCE_PREFIX.len_utf8()..].to_string()),
            _ => None,
        };

        if control == TrafficControl::Proxy {
            debug!(path = %request.path, "Proxying request");
        } else {
            debug!(path = %request.path, selector = ?selector, "Choosing a variable reference");
        }

        TrafficDecision {
            control,
            route,
            selector,
        }
    }
}

fn inject_default_headers(request: &mut MockRequest, route: &TrafficControlPath) {
    if route.mock_type.is_empty() {
        return;
    }
    request.set_header_if_absent(TRAFFIC_CONTROL_HEADER, &route.mock_type);
    request.set_header_if_absent(PREFERRED_HEADER, &route.mock_type);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saloon(mock_mode: bool) -> Vec<TrafficControlPath> {
        vec![TrafficControlPath {
            mock_type: "Ranger".to_string(),
            mock_mode,
            ..TrafficControlPath::new("/saloon/{ranger}")
        }]
    }

    #[test]
    fn test_header_classification() {
        assert_eq!(TrafficControl::from_header(""), TrafficControl::Proxy);
        assert_eq!(TrafficControl::from_header("proxy"), TrafficControl::Proxy);
        assert_eq!(
            TrafficControl::from_header("$horse"),
            TrafficControl::VariableReference
        );
        assert_eq!(TrafficControl::from_header("mock"), TrafficControl::Proxy);
        assert!(!TrafficControl::Unset.should_mock());
    }

    #[test]
    fn test_forced_route_injects_headers() {
        let routes = saloon(true);
        let matcher = RouteMatcher::new(&routes);
        let decider = TrafficControlDecider::new(&routes, &matcher);

        for path in ["/saloon/ball", "/saloon/sack", "/saloon/anything-at-all"] {
            let mut request = MockRequest::new("GET", path);
            let decision = decider.decide(&mut request);
            assert_eq!(decision.control, TrafficControl::Forced);
            assert!(decision.should_mock());
            assert_eq!(request.header(TRAFFIC_CONTROL_HEADER), Some("Ranger"));
            assert_eq!(request.header(PREFERRED_HEADER), Some("Ranger"));
        }
    }

    #[test]
    fn test_forced_route_keeps_client_headers() {
        let routes = saloon(true);
        let matcher = RouteMatcher::new(&routes);
        let decider = TrafficControlDecider::new(&routes, &matcher);

        let mut request = MockRequest::new("GET", "/saloon/ball").with_header("preferred", "Sheriff");
        decider.decide(&mut request);
        assert_eq!(request.header(PREFERRED_HEADER), Some("Sheriff"));
        assert_eq!(request.headers.len(), 2);
    }

    #[test]
    fn test_unforced_route_follows_header() {
        let routes = saloon(false);
        let matcher = RouteMatcher::new(&routes);
        let decider = TrafficControlDecider::new(&routes, &matcher);

        let mut request = MockRequest::new("GET", "/saloon/ball");
        let decision = decider.decide(&mut request);
        assert_eq!(decision.control, TrafficControl::Proxy);
        assert!(!decision.should_mock());
        assert!(request.headers.is_empty());

        let mut request =
            MockRequest::new("GET", "/saloon/ball").with_header(TRAFFIC_CONTROL_HEADER, "$horse");
        let decision = decider.decide(&mut request);
        assert_eq!(decision.control, TrafficControl::VariableReference);
        assert_eq!(decision.selector.as_deref(), Some("horse"));
        assert_eq!(decision.route.map(|r| r.path.as_str()), Some("/saloon/{ranger}"));
    }

    #[test]
    fn test_misconfigured_header_fails_open() {
        let routes = saloon(false);
        let matcher = RouteMatcher::new(&routes);
        let decider = TrafficControlDecider::new(&routes, &matcher);

        let mut request =
            MockRequest::new("GET", "/saloon/ball").with_header(TRAFFIC_CONTROL_HEADER, "yes please");
        assert_eq!(decider.decide(&mut request).control, TrafficControl::Proxy);
    }

    #[test]
    fn test_nested_path_does_not_match_forced_route() {
        let routes = saloon(true);
        let matcher = RouteMatcher::new(&routes);
        let decider = TrafficControlDecider::new(&routes, &matcher);

        let mut request = MockRequest::new("GET", "/saloon/ball/sack");
        let decision = decider.decide(&mut request);
        assert_eq!(decision.control, TrafficControl::Proxy);
        assert!(decision.route.is_none());
    }
}
