use std::fmt::Display;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, Time};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    ListenerConflicted, ListenerDetached, ListenerReady, ListenerResolvedRefs, ResolvedRoute, ResourceKey, StatusCondition, DEFAULT_GROUP_NAME, HTTP_ROUTE_KIND_NAME,
    TCP_ROUTE_KIND_NAME,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("unknown protocol {0}")]
    UnknownProtocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Hash, Eq)]
pub enum ProtocolType {
    Http,
    Https,
    Tcp,
    Tls,
    Udp,
}

impl TryFrom<&str> for ProtocolType {
    type Error = ListenerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(match value.to_uppercase().as_str() {
            "HTTP" => Self::Http,
            "HTTPS" => Self::Https,
            "TCP" => Self::Tcp,
            "TLS" => Self::Tls,
            "UDP" => Self::Udp,
            _ => {
                return Err(ListenerError::UnknownProtocol(value.to_owned()));
            },
        })
    }
}

impl Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut e = format! {"{self:?}"};
        e.make_ascii_uppercase();
        write!(f, "{e}")
    }
}

impl ProtocolType {
    /// Route kinds a listener of this protocol can carry. Empty when the protocol is not served.
    pub fn supported_kinds(self) -> Vec<RouteGroupKind> {
        match self {
            Self::Http | Self::Https => vec![RouteGroupKind::new(HTTP_ROUTE_KIND_NAME)],
            Self::Tcp => vec![RouteGroupKind::new(TCP_ROUTE_KIND_NAME)],
            Self::Tls | Self::Udp => vec![],
        }
    }

    pub fn is_http(self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteGroupKind {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub kind: String,
}

impl RouteGroupKind {
    pub fn new(kind: &str) -> Self {
        Self { group: Some(DEFAULT_GROUP_NAME.to_owned()), kind: kind.to_owned() }
    }

    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(DEFAULT_GROUP_NAME)
    }

    pub fn same_as(&self, other: &RouteGroupKind) -> bool {
        self.group() == other.group() && self.kind == other.kind
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    #[default]
    Terminate,
    Passthrough,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default)]
    pub mode: TlsMode,
    #[serde(default)]
    pub certificate_refs: Vec<SecretObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cipher_suites: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FromNamespaces {
    All,
    Selector,
    #[default]
    Same,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteNamespaces {
    #[serde(default)]
    pub from: FromNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowedRoutes {
    #[serde(default)]
    pub namespaces: RouteNamespaces,
    #[serde(default)]
    pub kinds: Vec<RouteGroupKind>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub port: i32,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_routes: Option<AllowedRoutes>,
}

impl Listener {
    pub fn protocol_type(&self) -> Result<ProtocolType, ListenerError> {
        ProtocolType::try_from(self.protocol.as_str())
    }

    pub fn namespace_policy(&self) -> FromNamespaces {
        self.allowed_routes.as_ref().map(|allowed| allowed.namespaces.from).unwrap_or_default()
    }

    pub fn namespace_selector(&self) -> Option<&LabelSelector> {
        self.allowed_routes.as_ref().and_then(|allowed| allowed.namespaces.selector.as_ref())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerConditions {
    pub conflicted: ListenerConflicted,
    pub detached: ListenerDetached,
    pub ready: ListenerReady,
    pub resolved_refs: ListenerResolvedRefs,
}

impl ListenerConditions {
    /// A listener only accepts routes when none of its conditions carry an error.
    pub fn is_valid(&self) -> bool {
        !(self.conflicted.has_error() || self.detached.has_error() || self.ready.has_error() || self.resolved_refs.has_error())
    }

    pub fn to_conditions(&self, generation: Option<i64>, now: &Time) -> Vec<Condition> {
        vec![
            self.conflicted.to_condition(generation, now),
            self.detached.to_condition(generation, now),
            self.ready.to_condition(generation, now),
            self.resolved_refs.to_condition(generation, now),
        ]
    }
}

/// Kinds served by the protocol, narrowed by the listener's allowed kinds when it lists any.
fn supported_kinds(listener: &Listener, protocol: ProtocolType) -> Vec<RouteGroupKind> {
    let protocol_kinds = protocol.supported_kinds();
    match &listener.allowed_routes {
        Some(allowed) if !allowed.kinds.is_empty() => protocol_kinds.into_iter().filter(|kind| allowed.kinds.iter().any(|allowed| allowed.same_as(kind))).collect(),
        _ => protocol_kinds,
    }
}

/// Key material handed out by the certificate provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub key: ResourceKey,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// A listener after validation, carrying the routes bound to it during one pass.
#[derive(Clone, Debug)]
pub struct ResolvedListener {
    pub listener: Listener,
    pub protocol: Option<ProtocolType>,
    pub supported_kinds: Vec<RouteGroupKind>,
    pub conditions: ListenerConditions,
    pub certificates: Vec<CertificateMaterial>,
    pub bound_routes: usize,
    pub routes: Vec<ResolvedRoute>,
}

impl ResolvedListener {
    pub fn new(listener: Listener) -> Self {
        let protocol = listener.protocol_type().ok();
        let supported_kinds = protocol.map(|protocol| supported_kinds(&listener, protocol)).unwrap_or_default();
        Self {
            listener,
            protocol,
            supported_kinds,
            conditions: ListenerConditions::default(),
            certificates: vec![],
            bound_routes: 0,
            routes: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.listener.name
    }

    pub fn port(&self) -> i32 {
        self.listener.port
    }

    pub fn hostname(&self) -> Option<&str> {
        self.listener.hostname.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.conditions.is_valid()
    }

    /// Records a successful bind.
    pub fn bind(&mut self, route: ResolvedRoute) {
        self.bound_routes += 1;
        self.routes.push(route);
    }
}
