mod http_route;
mod tcp_route;

use std::collections::BTreeMap;

pub use http_route::{
    HeaderMatchType, HeaderModifier, HttpBackendRef, HttpHeader, HttpHeaderMatch, HttpPathMatch, HttpQueryParamMatch, HttpRoute, HttpRouteFilter, HttpRouteMatch,
    HttpRouteRule, HttpRouteSpec, PathMatchType, PathModifier, UrlRewrite,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
use serde::{Deserialize, Serialize};
pub use tcp_route::{TcpRoute, TcpRouteRule, TcpRouteSpec};

use super::{
    ResourceKey, RouteGroupKind, RouteResolvedRefs, CORE_GROUP_NAME, DEFAULT_GROUP_NAME, DEFAULT_NAMESPACE_NAME, HTTP_ROUTE_KIND_NAME, SERVICE_KIND_NAME,
    TCP_ROUTE_KIND_NAME,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

impl BackendRef {
    /// Absent weight means 1, zero means the backend is never selected.
    pub fn weight(&self) -> i32 {
        self.weight.unwrap_or(1)
    }

    pub fn resource_key(&self, route_namespace: &str) -> ResourceKey {
        ResourceKey {
            group: self.group.clone().unwrap_or(CORE_GROUP_NAME.to_owned()),
            namespace: self.namespace.clone().unwrap_or(route_namespace.to_owned()),
            name: self.name.clone(),
            kind: self.kind.clone().unwrap_or(SERVICE_KIND_NAME.to_owned()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteParentStatus {
    pub parent_ref: ParentReference,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteStatus {
    #[serde(default)]
    pub parents: Vec<RouteParentStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Route {
    #[serde(rename = "HTTPRoute")]
    Http(HttpRoute),
    #[serde(rename = "TCPRoute")]
    Tcp(TcpRoute),
}

impl Route {
    fn metadata(&self) -> &ObjectMeta {
        match self {
            Route::Http(route) => &route.metadata,
            Route::Tcp(route) => &route.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE_NAME)
    }

    pub fn generation(&self) -> Option<i64> {
        self.metadata().generation
    }

    pub fn kind(&self) -> RouteGroupKind {
        match self {
            Route::Http(_) => RouteGroupKind::new(HTTP_ROUTE_KIND_NAME),
            Route::Tcp(_) => RouteGroupKind::new(TCP_ROUTE_KIND_NAME),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::namespaced(self.name(), self.namespace()).with_kind(DEFAULT_GROUP_NAME, &self.kind().kind)
    }

    pub fn parent_refs(&self) -> &[ParentReference] {
        match self {
            Route::Http(route) => &route.spec.parent_refs,
            Route::Tcp(route) => &route.spec.parent_refs,
        }
    }

    /// Hostnames only exist on HTTP routes.
    pub fn hostnames(&self) -> &[String] {
        match self {
            Route::Http(route) => &route.spec.hostnames,
            Route::Tcp(_) => &[],
        }
    }

    pub fn backend_refs(&self) -> Vec<&BackendRef> {
        match self {
            Route::Http(route) => route.spec.rules.iter().flat_map(|rule| rule.backend_refs.iter().map(|backend| &backend.backend_ref)).collect(),
            Route::Tcp(route) => route.spec.rules.iter().flat_map(|rule| rule.backend_refs.iter()).collect(),
        }
    }

    pub fn status(&self) -> &RouteStatus {
        match self {
            Route::Http(route) => &route.status,
            Route::Tcp(route) => &route.status,
        }
    }

    pub fn status_mut(&mut self) -> &mut RouteStatus {
        match self {
            Route::Http(route) => &mut route.status,
            Route::Tcp(route) => &mut route.status,
        }
    }
}

/// Downstream service a backend reference resolved to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolvedService {
    pub name: String,
    pub namespace: String,
}

/// A route whose backend references have been looked up for one pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedRoute {
    pub route: Route,
    pub services: BTreeMap<ResourceKey, ResolvedService>,
    pub resolved_refs: RouteResolvedRefs,
}

impl ResolvedRoute {
    pub fn new(route: Route) -> Self {
        Self { route, services: BTreeMap::new(), resolved_refs: RouteResolvedRefs::ResolvedRefs }
    }

    pub fn key(&self) -> ResourceKey {
        self.route.key()
    }

    pub fn service(&self, backend: &BackendRef) -> Option<&ResolvedService> {
        self.services.get(&backend.resource_key(self.route.namespace()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_is_tagged_by_kind() {
        let route: Route = serde_yaml::from_str(
            r"
apiVersion: gateway.networking.k8s.io/v1alpha2
kind: TCPRoute
metadata:
  name: db
  namespace: apps
spec:
  parentRefs:
    - name: gw
  rules:
    - backendRefs:
        - name: postgres
          port: 5432
",
        )
        .unwrap();
        assert_eq!(route.kind().kind, TCP_ROUTE_KIND_NAME);
        assert_eq!(route.key(), ResourceKey::namespaced("db", "apps").with_kind(DEFAULT_GROUP_NAME, TCP_ROUTE_KIND_NAME));
        assert!(route.hostnames().is_empty());
        assert_eq!(route.backend_refs().len(), 1);
        assert_eq!(route.backend_refs()[0].weight(), 1);
        assert_eq!(route.backend_refs()[0].resource_key("apps"), ResourceKey::namespaced("postgres", "apps").with_kind(CORE_GROUP_NAME, SERVICE_KIND_NAME));
    }
}
