use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::ParentReference;

pub const DEFAULT_GROUP_NAME: &str = "gateway.networking.k8s.io";
pub const DEFAULT_NAMESPACE_NAME: &str = "default";
pub const DEFAULT_KIND_NAME: &str = "Gateway";
pub const DEFAULT_ROUTE_HOSTNAME: &str = "*";
pub const CORE_GROUP_NAME: &str = "";
pub const SERVICE_KIND_NAME: &str = "Service";
pub const SECRET_KIND_NAME: &str = "Secret";
pub const HTTP_ROUTE_KIND_NAME: &str = "HTTPRoute";
pub const TCP_ROUTE_KIND_NAME: &str = "TCPRoute";

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ResourceKey {
    pub group: String,
    pub namespace: String,
    pub name: String,
    pub kind: String,
}

impl ResourceKey {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned(), ..Default::default() }
    }

    pub fn namespaced(name: &str, namespace: &str) -> Self {
        Self { name: name.to_owned(), namespace: namespace.to_owned(), ..Default::default() }
    }

    #[must_use]
    pub fn with_kind(mut self, group: &str, kind: &str) -> Self {
        group.clone_into(&mut self.group);
        kind.clone_into(&mut self.kind);
        self
    }
}

impl Default for ResourceKey {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP_NAME.to_owned(),
            namespace: DEFAULT_NAMESPACE_NAME.to_owned(),
            name: String::default(),
            kind: DEFAULT_KIND_NAME.to_owned(),
        }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", create_id(&self.name, &self.namespace))
    }
}

impl From<(Option<String>, Option<String>, String, Option<String>)> for ResourceKey {
    fn from((group, namespace, name, kind): (Option<String>, Option<String>, String, Option<String>)) -> Self {
        Self {
            group: group.unwrap_or(DEFAULT_GROUP_NAME.to_owned()),
            namespace: namespace.unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned()),
            name,
            kind: kind.unwrap_or(DEFAULT_KIND_NAME.to_owned()),
        }
    }
}

pub fn create_id(name: &str, namespace: &str) -> String {
    namespace.to_owned() + "." + name
}

/// Identity of a route's parent reference with every default applied.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct RouteRefKey {
    pub resource_key: ResourceKey,
    pub section_name: Option<String>,
    pub port: Option<i32>,
}

impl RouteRefKey {
    /// Stable textual identity used to order and deduplicate parent statuses.
    pub fn canonical(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.resource_key.group,
            self.resource_key.kind,
            self.resource_key.namespace,
            self.resource_key.name,
            self.section_name.as_deref().unwrap_or_default()
        )
    }

    pub fn targets(&self, gateway: &ResourceKey) -> bool {
        self.resource_key.group == DEFAULT_GROUP_NAME
            && self.resource_key.kind == DEFAULT_KIND_NAME
            && self.resource_key.name == gateway.name
            && self.resource_key.namespace == gateway.namespace
    }
}

impl From<(&ParentReference, &str)> for RouteRefKey {
    fn from((route_parent, route_namespace): (&ParentReference, &str)) -> Self {
        Self {
            resource_key: ResourceKey {
                group: route_parent.group.clone().unwrap_or(DEFAULT_GROUP_NAME.to_owned()),
                namespace: route_parent.namespace.clone().unwrap_or(route_namespace.to_owned()),
                name: route_parent.name.clone(),
                kind: route_parent.kind.clone().unwrap_or(DEFAULT_KIND_NAME.to_owned()),
            },
            section_name: route_parent.section_name.clone(),
            port: route_parent.port,
        }
    }
}

impl AsRef<ResourceKey> for RouteRefKey {
    fn as_ref(&self) -> &ResourceKey {
        &self.resource_key
    }
}
