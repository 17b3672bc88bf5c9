mod conditions;
mod gateway;
mod listener;
mod reference_grant;
mod resource_key;
mod route;

use std::collections::BTreeMap;

pub use conditions::{
    carry_transition_times, now, sort_conditions, GatewayInSync, GatewayReady, GatewayScheduled, ListenerConflicted, ListenerDetached, ListenerReady,
    ListenerResolvedRefs, RouteAccepted, RouteResolvedRefs, StatusCondition, ROUTE_ACCEPTED_MESSAGE, STATUS_FALSE, STATUS_TRUE, STATUS_UNKNOWN,
};
pub use gateway::{Gateway, GatewayAddress, GatewaySpec, GatewayStatus, ListenerStatus};
pub use listener::{
    AllowedRoutes, CertificateMaterial, FromNamespaces, Listener, ListenerConditions, ProtocolType, ResolvedListener, RouteGroupKind, RouteNamespaces,
    SecretObjectReference, TlsConfig, TlsMode,
};
pub use reference_grant::{reference_allowed, ReferenceGrant, ReferenceGrantFrom, ReferenceGrantSpec, ReferenceGrantTo};
pub use resource_key::{
    create_id, ResourceKey, RouteRefKey, CORE_GROUP_NAME, DEFAULT_GROUP_NAME, DEFAULT_KIND_NAME, DEFAULT_NAMESPACE_NAME, DEFAULT_ROUTE_HOSTNAME,
    HTTP_ROUTE_KIND_NAME, SECRET_KIND_NAME, SERVICE_KIND_NAME, TCP_ROUTE_KIND_NAME,
};
pub use route::{
    BackendRef, HeaderMatchType, HeaderModifier, HttpBackendRef, HttpHeader, HttpHeaderMatch, HttpPathMatch, HttpQueryParamMatch, HttpRoute, HttpRouteFilter,
    HttpRouteMatch, HttpRouteRule, HttpRouteSpec, ParentReference, PathMatchType, PathModifier, ResolvedRoute, ResolvedService, Route, RouteParentStatus,
    RouteStatus, TcpRoute, TcpRouteRule, TcpRouteSpec, UrlRewrite,
};

pub type Labels = BTreeMap<String, String>;
