use std::collections::BTreeMap;

use kube_core::{Selector, SelectorExt};
use thiserror::Error;
use tracing::{debug, error};
use typed_builder::TypedBuilder;

use super::HostnameMatchFilter;
use crate::common::{
    FromNamespaces, Labels, ParentReference, ResolvedListener, ResolvedRoute, ResourceKey, Route, RouteAccepted, RouteRefKey, RouteResolvedRefs,
    HTTP_ROUTE_KIND_NAME,
};

pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";
pub const NAMESPACE_SHORT_NAME_LABEL: &str = "name";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("route kind {0} is not allowed by the listener")]
    InvalidRouteKind(String),
    #[error("route namespace {0} is not allowed by the listener")]
    ListenerNamespacePolicy(String),
    #[error("no route hostname matches listener hostname {0}")]
    ListenerHostnameMismatch(String),
    #[error("listener {0} is not ready")]
    ListenerNotReady(String),
    #[error("route is invalid: {0}")]
    RouteInvalid(String),
}

impl From<&BindError> for RouteAccepted {
    fn from(error: &BindError) -> Self {
        match error {
            BindError::InvalidRouteKind(_) => RouteAccepted::InvalidRouteKind(error.to_string()),
            BindError::ListenerNamespacePolicy(_) => RouteAccepted::ListenerNamespacePolicy(error.to_string()),
            BindError::ListenerHostnameMismatch(_) => RouteAccepted::ListenerHostnameMismatch(error.to_string()),
            BindError::ListenerNotReady(_) | BindError::RouteInvalid(_) => RouteAccepted::BindError(error.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BinderError {
    #[error("invalid namespace selector on listener {listener}: {reason}")]
    InvalidSelector { listener: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindResult {
    Bound,
    NotBound,
    Rejected(BindError),
}

/// Decides whether one route may attach to one listener through one of its parent references.
#[derive(TypedBuilder)]
pub struct RouteListenerMatcher<'a> {
    gateway_key: &'a ResourceKey,
    listener: &'a ResolvedListener,
    namespace_labels: &'a Labels,
}

impl RouteListenerMatcher<'_> {
    pub fn can_bind(&self, route: &Route, parent_ref: &ParentReference) -> Result<BindResult, BinderError> {
        if let Some(error) = self.check_kind(route) {
            return Ok(BindResult::Rejected(error));
        }

        if !self.check_parent_ref(route, parent_ref) {
            return Ok(BindResult::NotBound);
        }

        if !self.check_namespace(route)? {
            return Ok(BindResult::Rejected(BindError::ListenerNamespacePolicy(route.namespace().to_owned())));
        }

        let section_named = parent_ref.section_name.is_some();

        if route.kind().kind == HTTP_ROUTE_KIND_NAME && !HostnameMatchFilter::new(self.listener.hostname(), route.hostnames()).filter() {
            return Ok(if section_named {
                BindResult::Rejected(BindError::ListenerHostnameMismatch(self.listener.hostname().unwrap_or_default().to_owned()))
            } else {
                BindResult::NotBound
            });
        }

        if !self.listener.is_ready() {
            return Ok(if section_named { BindResult::Rejected(BindError::ListenerNotReady(self.listener.name().to_owned())) } else { BindResult::NotBound });
        }

        if let Some(error) = self.check_route_shape(route) {
            return Ok(BindResult::Rejected(error));
        }

        Ok(BindResult::Bound)
    }

    fn check_kind(&self, route: &Route) -> Option<BindError> {
        let kind = route.kind();
        if self.listener.supported_kinds.iter().any(|supported| supported.same_as(&kind)) {
            None
        } else {
            Some(BindError::InvalidRouteKind(kind.kind))
        }
    }

    /// True when the parent reference points at this gateway and, through section or port, at this listener.
    pub fn check_parent_ref(&self, route: &Route, parent_ref: &ParentReference) -> bool {
        let parent_key = RouteRefKey::from((parent_ref, route.namespace()));
        if !parent_key.targets(self.gateway_key) {
            return false;
        }
        if parent_key.section_name.as_ref().is_some_and(|section_name| section_name != self.listener.name()) {
            return false;
        }
        if parent_key.port.is_some_and(|port| port != self.listener.port()) {
            return false;
        }
        true
    }

    fn check_namespace(&self, route: &Route) -> Result<bool, BinderError> {
        let route_namespace = route.namespace();
        match self.listener.listener.namespace_policy() {
            FromNamespaces::All => Ok(true),
            FromNamespaces::Same => Ok(route_namespace == self.gateway_key.namespace),
            FromNamespaces::Selector => {
                let label_selector = self.listener.listener.namespace_selector().cloned().ok_or_else(|| BinderError::InvalidSelector {
                    listener: self.listener.name().to_owned(),
                    reason: "selector is missing".to_owned(),
                })?;
                let selector = Selector::try_from(label_selector)
                    .map_err(|e| BinderError::InvalidSelector { listener: self.listener.name().to_owned(), reason: e.to_string() })?;
                let mut labels = self.namespace_labels.clone();
                labels.insert(NAMESPACE_SHORT_NAME_LABEL.to_owned(), route_namespace.to_owned());
                labels.insert(NAMESPACE_NAME_LABEL.to_owned(), route_namespace.to_owned());
                Ok(selector.matches(&labels))
            },
        }
    }

    fn check_route_shape(&self, route: &Route) -> Option<BindError> {
        let Route::Tcp(_) = route else {
            return None;
        };
        let backends = route.backend_refs().len();
        if backends != 1 {
            return Some(BindError::RouteInvalid(format!("TCPRoute must have exactly one backend, found {backends}")));
        }
        if self.listener.bound_routes > 0 {
            return Some(BindError::RouteInvalid(format!("listener {} already has a TCPRoute bound", self.listener.name())));
        }
        None
    }
}

/// Binding outcome for one parent reference of one route.
#[derive(Clone, Debug, PartialEq)]
pub struct BindOutcome {
    pub route: ResourceKey,
    pub generation: Option<i64>,
    pub parent_ref: ParentReference,
    pub accepted: RouteAccepted,
    pub resolved_refs: RouteResolvedRefs,
}

/// Runs every route against every listener of the gateway. Bound routes are appended to their listeners.
pub fn bind_routes(
    gateway_key: &ResourceKey,
    listeners: &mut [ResolvedListener],
    mut routes: Vec<ResolvedRoute>,
    namespace_labels: &BTreeMap<String, Labels>,
) -> Vec<BindOutcome> {
    routes.sort_by_key(ResolvedRoute::key);
    let no_labels = Labels::new();
    let mut outcomes = vec![];

    for route in routes {
        let route_key = route.key();
        let labels = namespace_labels.get(route.route.namespace()).unwrap_or(&no_labels);
        for parent_ref in route.route.parent_refs() {
            if !RouteRefKey::from((parent_ref, route.route.namespace())).targets(gateway_key) {
                continue;
            }

            let mut bound = false;
            let mut rejection = None;
            for listener in listeners.iter_mut() {
                let matcher = RouteListenerMatcher::builder().gateway_key(gateway_key).listener(listener).namespace_labels(labels).build();
                let result = matcher.can_bind(&route.route, parent_ref);
                // only listeners the parent reference addresses may reject it
                let addressed = matcher.check_parent_ref(&route.route, parent_ref);
                match result {
                    Ok(BindResult::Bound) => {
                        bound = true;
                        if !listener.routes.iter().any(|bound_route| bound_route.key() == route_key) {
                            listener.bind(route.clone());
                        }
                    },
                    Ok(BindResult::NotBound) => {},
                    Ok(BindResult::Rejected(error)) if !addressed => debug!("Route {route_key} not addressed to listener {} {error}", listener.name()),
                    Ok(BindResult::Rejected(error)) => {
                        debug!("Route {route_key} rejected by listener {} {error}", listener.name());
                        rejection.get_or_insert_with(|| RouteAccepted::from(&error));
                    },
                    Err(e) => {
                        error!("Can't bind route {route_key} to listener {} {e}", listener.name());
                        rejection.get_or_insert_with(|| RouteAccepted::BindError(e.to_string()));
                    },
                }
            }

            let accepted = if bound {
                RouteAccepted::Accepted
            } else {
                rejection.unwrap_or_else(|| RouteAccepted::BindError("Route does not match any listener".to_owned()))
            };
            outcomes.push(BindOutcome {
                route: route_key.clone(),
                generation: route.route.generation(),
                parent_ref: parent_ref.clone(),
                accepted,
                resolved_refs: route.resolved_refs.clone(),
            });
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{test, Gateway, ListenerReady, ResolvedListener};

    fn listener(gateway: &Gateway, name: &str) -> ResolvedListener {
        ResolvedListener::new(gateway.listener(name).cloned().unwrap())
    }

    fn multi_listener_gateway() -> Gateway {
        test::gateway(
            r"
metadata:
  name: gw
  namespace: default
spec:
  listeners:
    - name: http
      port: 80
      protocol: HTTP
      hostname: '*.example.com'
    - name: tcp
      port: 5432
      protocol: TCP
    - name: selected
      port: 8080
      protocol: HTTP
      allowedRoutes:
        namespaces:
          from: Selector
          selector:
            matchLabels:
              team: payments
    - name: broken
      port: 8081
      protocol: HTTP
      allowedRoutes:
        namespaces:
          from: Selector
          selector:
            matchExpressions:
              - key: team
                operator: Bogus
",
        )
    }

    fn http_route(namespace: &str, section: Option<&str>, hostname: &str) -> Route {
        let section = section.map(|s| format!("\n      sectionName: {s}")).unwrap_or_default();
        test::route(&format!(
            r"
kind: HTTPRoute
metadata:
  name: web
  namespace: {namespace}
spec:
  parentRefs:
    - name: gw
      namespace: default{section}
  hostnames:
    - {hostname}
  rules:
    - backendRefs:
        - name: echo
"
        ))
    }

    fn can_bind(listener: &ResolvedListener, route: &Route, labels: &Labels) -> Result<BindResult, BinderError> {
        let gateway_key = ResourceKey::namespaced("gw", "default");
        RouteListenerMatcher::builder().gateway_key(&gateway_key).listener(listener).namespace_labels(labels).build().can_bind(route, &route.parent_refs()[0])
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let gateway = multi_listener_gateway();
        let route = http_route("default", None, "a.example.com");
        assert_eq!(can_bind(&listener(&gateway, "tcp"), &route, &Labels::new()), Ok(BindResult::Rejected(BindError::InvalidRouteKind("HTTPRoute".to_owned()))));
    }

    #[test]
    fn unknown_section_never_binds() {
        let gateway = multi_listener_gateway();
        let route = http_route("default", Some("missing"), "a.example.com");
        assert_eq!(can_bind(&listener(&gateway, "http"), &route, &Labels::new()), Ok(BindResult::NotBound));
    }

    #[test]
    fn same_namespace_policy() {
        let gateway = multi_listener_gateway();
        let route = http_route("apps", None, "a.example.com");
        assert_eq!(
            can_bind(&listener(&gateway, "http"), &route, &Labels::new()),
            Ok(BindResult::Rejected(BindError::ListenerNamespacePolicy("apps".to_owned())))
        );
        let route = http_route("default", None, "a.example.com");
        assert_eq!(can_bind(&listener(&gateway, "http"), &route, &Labels::new()), Ok(BindResult::Bound));
    }

    #[test]
    fn selector_policy_uses_namespace_labels() {
        let gateway = multi_listener_gateway();
        let route = http_route("apps", None, "a.example.com");
        let labels = Labels::from([("team".to_owned(), "payments".to_owned())]);
        assert_eq!(can_bind(&listener(&gateway, "selected"), &route, &labels), Ok(BindResult::Bound));
        assert_eq!(
            can_bind(&listener(&gateway, "selected"), &route, &Labels::new()),
            Ok(BindResult::Rejected(BindError::ListenerNamespacePolicy("apps".to_owned())))
        );
    }

    #[test]
    fn bad_selector_is_an_error() {
        let gateway = multi_listener_gateway();
        let route = http_route("apps", None, "a.example.com");
        assert!(matches!(can_bind(&listener(&gateway, "broken"), &route, &Labels::new()), Err(BinderError::InvalidSelector { .. })));
    }

    #[test]
    fn hostname_mismatch_depends_on_section() {
        let gateway = multi_listener_gateway();
        let route = http_route("default", None, "other.org");
        assert_eq!(can_bind(&listener(&gateway, "http"), &route, &Labels::new()), Ok(BindResult::NotBound));
        let route = http_route("default", Some("http"), "other.org");
        assert_eq!(
            can_bind(&listener(&gateway, "http"), &route, &Labels::new()),
            Ok(BindResult::Rejected(BindError::ListenerHostnameMismatch("*.example.com".to_owned())))
        );
    }

    #[test]
    fn unready_listener_never_binds() {
        let gateway = multi_listener_gateway();
        let mut http = listener(&gateway, "http");
        http.conditions.ready = ListenerReady::Invalid("bad".to_owned());
        let route = http_route("default", None, "a.example.com");
        assert_eq!(can_bind(&http, &route, &Labels::new()), Ok(BindResult::NotBound));
        let route = http_route("default", Some("http"), "a.example.com");
        assert_eq!(can_bind(&http, &route, &Labels::new()), Ok(BindResult::Rejected(BindError::ListenerNotReady("http".to_owned()))));
    }

    #[test]
    fn can_bind_does_not_mutate_listener() {
        let gateway = multi_listener_gateway();
        let http = listener(&gateway, "http");
        let route = http_route("default", None, "a.example.com");
        let first = can_bind(&http, &route, &Labels::new());
        let second = can_bind(&http, &route, &Labels::new());
        assert_eq!(first, second);
        assert_eq!(http.bound_routes, 0);
    }

    #[test]
    fn second_tcp_route_is_invalid() {
        let gateway = multi_listener_gateway();
        let mut listeners = vec![listener(&gateway, "tcp")];
        let tcp = |name: &str| {
            test::route(&format!(
                r"
kind: TCPRoute
metadata:
  name: {name}
  namespace: default
spec:
  parentRefs:
    - name: gw
  rules:
    - backendRefs:
        - name: postgres
"
            ))
        };
        let routes = vec![ResolvedRoute::new(tcp("b")), ResolvedRoute::new(tcp("a"))];
        let outcomes = bind_routes(&ResourceKey::namespaced("gw", "default"), &mut listeners, routes, &BTreeMap::new());
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].route.name, "a");
        assert_eq!(outcomes[0].accepted, RouteAccepted::Accepted);
        assert!(matches!(outcomes[1].accepted, RouteAccepted::BindError(_)));
        assert_eq!(listeners[0].bound_routes, 1);
    }

    #[test]
    fn other_gateway_parents_are_skipped() {
        let gateway = multi_listener_gateway();
        let mut listeners = vec![listener(&gateway, "http")];
        let route = test::route(
            r"
kind: HTTPRoute
metadata:
  name: web
  namespace: default
spec:
  parentRefs:
    - name: other
    - name: gw
      sectionName: missing
",
        );
        let outcomes = bind_routes(&ResourceKey::namespaced("gw", "default"), &mut listeners, vec![ResolvedRoute::new(route)], &BTreeMap::new());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].parent_ref.section_name.as_deref(), Some("missing"));
        assert!(matches!(outcomes[0].accepted, RouteAccepted::BindError(_)));
        assert_eq!(listeners[0].bound_routes, 0);
    }

    #[test]
    fn named_listener_reports_the_rejection() {
        let gateway = multi_listener_gateway();
        let mut listeners = vec![listener(&gateway, "tcp"), listener(&gateway, "http")];
        let route = http_route("default", Some("http"), "other.org");
        let outcomes = bind_routes(&ResourceKey::namespaced("gw", "default"), &mut listeners, vec![ResolvedRoute::new(route)], &BTreeMap::new());
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].accepted, RouteAccepted::ListenerHostnameMismatch(_)), "{:?}", outcomes[0].accepted);
        assert_eq!(listeners[1].bound_routes, 0);
    }

    #[test]
    fn unnamed_listeners_of_another_kind_still_reject() {
        let gateway = multi_listener_gateway();
        let mut listeners = vec![listener(&gateway, "tcp")];
        let route = http_route("default", None, "a.example.com");
        let outcomes = bind_routes(&ResourceKey::namespaced("gw", "default"), &mut listeners, vec![ResolvedRoute::new(route)], &BTreeMap::new());
        assert!(matches!(outcomes[0].accepted, RouteAccepted::InvalidRouteKind(_)));
    }
}
