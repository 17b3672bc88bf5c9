use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

pub const INGRESS_GATEWAY_KIND: &str = "ingress-gateway";
pub const SERVICE_ROUTER_KIND: &str = "service-router";
pub const SERVICE_SPLITTER_KIND: &str = "service-splitter";
pub const SERVICE_DEFAULTS_KIND: &str = "service-defaults";

pub const HTTP_PROTOCOL: &str = "http";
pub const TCP_PROTOCOL: &str = "tcp";

pub type Meta = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigEntryKey {
    pub kind: &'static str,
    pub name: String,
}

impl Display for ConfigEntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpHeaderModifiers {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

impl HttpHeaderModifiers {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.set.is_empty() && self.remove.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRouteHttpMatchHeader {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

pub type ServiceRouteHttpMatchQueryParam = ServiceRouteHttpMatchHeader;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRouteHttpMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_exact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<ServiceRouteHttpMatchHeader>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_param: Vec<ServiceRouteHttpMatchQueryParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRouteMatch {
    #[serde(rename = "HTTP")]
    pub http: ServiceRouteHttpMatch,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRouteDestination {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,
    #[serde(default, skip_serializing_if = "HttpHeaderModifiers::is_empty")]
    pub request_headers: HttpHeaderModifiers,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRoute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#match: Option<ServiceRouteMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ServiceRouteDestination>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRouter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub routes: Vec<ServiceRoute>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSplit {
    pub weight: f32,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "HttpHeaderModifiers::is_empty")]
    pub request_headers: HttpHeaderModifiers,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSplitter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub splits: Vec<ServiceSplit>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceDefaults {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatewayTlsSdsConfig {
    pub cluster_name: String,
    pub cert_resource: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatewayTlsConfig {
    pub enabled: bool,
    #[serde(default, rename = "SDS", skip_serializing_if = "Option::is_none")]
    pub sds: Option<GatewayTlsSdsConfig>,
    #[serde(default, rename = "TLSMinVersion", skip_serializing_if = "Option::is_none")]
    pub tls_min_version: Option<String>,
    #[serde(default, rename = "TLSMaxVersion", skip_serializing_if = "Option::is_none")]
    pub tls_max_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cipher_suites: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngressService {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngressListener {
    pub port: i32,
    pub protocol: String,
    #[serde(default)]
    pub services: Vec<IngressService>,
    #[serde(default, rename = "TLS", skip_serializing_if = "Option::is_none")]
    pub tls: Option<GatewayTlsConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngressGateway {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub listeners: Vec<IngressListener>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Meta,
}

/// A downstream configuration object, tagged with its kind on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Kind")]
pub enum ConfigEntry {
    #[serde(rename = "ingress-gateway")]
    IngressGateway(IngressGateway),
    #[serde(rename = "service-router")]
    ServiceRouter(ServiceRouter),
    #[serde(rename = "service-splitter")]
    ServiceSplitter(ServiceSplitter),
    #[serde(rename = "service-defaults")]
    ServiceDefaults(ServiceDefaults),
}

impl ConfigEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigEntry::IngressGateway(_) => INGRESS_GATEWAY_KIND,
            ConfigEntry::ServiceRouter(_) => SERVICE_ROUTER_KIND,
            ConfigEntry::ServiceSplitter(_) => SERVICE_SPLITTER_KIND,
            ConfigEntry::ServiceDefaults(_) => SERVICE_DEFAULTS_KIND,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ConfigEntry::IngressGateway(entry) => &entry.name,
            ConfigEntry::ServiceRouter(entry) => &entry.name,
            ConfigEntry::ServiceSplitter(entry) => &entry.name,
            ConfigEntry::ServiceDefaults(entry) => &entry.name,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            ConfigEntry::IngressGateway(entry) => entry.namespace.as_deref(),
            ConfigEntry::ServiceRouter(entry) => entry.namespace.as_deref(),
            ConfigEntry::ServiceSplitter(entry) => entry.namespace.as_deref(),
            ConfigEntry::ServiceDefaults(entry) => entry.namespace.as_deref(),
        }
    }

    pub fn key(&self) -> ConfigEntryKey {
        ConfigEntryKey { kind: self.kind(), name: self.name().to_owned() }
    }
}
