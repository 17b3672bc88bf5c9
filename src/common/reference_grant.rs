use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use super::{ResourceKey, DEFAULT_NAMESPACE_NAME};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGrantFrom {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGrantTo {
    #[serde(default)]
    pub group: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGrantSpec {
    #[serde(default)]
    pub from: Vec<ReferenceGrantFrom>,
    #[serde(default)]
    pub to: Vec<ReferenceGrantTo>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceGrant {
    pub metadata: ObjectMeta,
    pub spec: ReferenceGrantSpec,
}

impl ReferenceGrant {
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE_NAME)
    }

    fn permits(&self, from: &ResourceKey, to: &ResourceKey) -> bool {
        self.namespace() == to.namespace
            && self.spec.from.iter().any(|f| f.group == from.group && f.kind == from.kind && f.namespace == from.namespace)
            && self
                .spec
                .to
                .iter()
                .any(|t| t.group == to.group && t.kind == to.kind && t.name.as_ref().map_or(true, |name| *name == to.name))
    }
}

/// A reference within one namespace is always allowed; across namespaces the target namespace must grant it.
pub fn reference_allowed(grants: &[ReferenceGrant], from: &ResourceKey, to: &ResourceKey) -> bool {
    from.namespace == to.namespace || grants.iter().any(|grant| grant.permits(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CORE_GROUP_NAME, DEFAULT_GROUP_NAME, HTTP_ROUTE_KIND_NAME, SERVICE_KIND_NAME};

    fn grant() -> ReferenceGrant {
        serde_yaml::from_str(
            r"
metadata:
  name: allow-apps
  namespace: backends
spec:
  from:
    - group: gateway.networking.k8s.io
      kind: HTTPRoute
      namespace: apps
  to:
    - kind: Service
      name: echo
",
        )
        .unwrap()
    }

    #[test]
    fn cross_namespace_reference_needs_grant() {
        let from = ResourceKey::namespaced("route", "apps").with_kind(DEFAULT_GROUP_NAME, HTTP_ROUTE_KIND_NAME);
        let echo = ResourceKey::namespaced("echo", "backends").with_kind(CORE_GROUP_NAME, SERVICE_KIND_NAME);
        let other = ResourceKey::namespaced("other", "backends").with_kind(CORE_GROUP_NAME, SERVICE_KIND_NAME);
        let local = ResourceKey::namespaced("local", "apps").with_kind(CORE_GROUP_NAME, SERVICE_KIND_NAME);

        assert!(!reference_allowed(&[], &from, &echo));
        assert!(reference_allowed(&[grant()], &from, &echo));
        assert!(!reference_allowed(&[grant()], &from, &other));
        assert!(reference_allowed(&[], &from, &local));
    }
}
