mod hostname_match_filter;
mod listener_validator;
mod route_listener_matcher;
mod routes_resolver;
mod tls_config_validator;

pub use hostname_match_filter::{hostnames_match, HostnameMatchFilter};
pub use listener_validator::ListenerValidator;
pub use route_listener_matcher::{bind_routes, BindError, BindOutcome, BindResult, BinderError, RouteListenerMatcher, NAMESPACE_NAME_LABEL};
pub use routes_resolver::{ResolutionError, RoutesResolver};
pub use tls_config_validator::{validate_tls_options, ListenerTlsConfigValidator};
