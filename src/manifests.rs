use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    common::{CertificateMaterial, Gateway, ReferenceGrant, ResourceKey, Route, CORE_GROUP_NAME, DEFAULT_NAMESPACE_NAME, SECRET_KIND_NAME},
    state::InMemoryStore,
    ResourceEvent, Result,
};

const TLS_CERTIFICATE_KEY: &str = "tls.crt";
const TLS_PRIVATE_KEY: &str = "tls.key";
const CONNECT_INJECT_ANNOTATION: &str = "consul.hashicorp.com/connect-inject";

#[derive(Error, Debug)]
enum ManifestError {
    #[error("document {0} has no kind")]
    MissingKind(usize),
    #[error("document {0} ({1}) is invalid {2}")]
    Invalid(usize, String, serde_yaml::Error),
}

fn parse<T: serde::de::DeserializeOwned>(index: usize, kind: &str, document: serde_yaml::Value) -> Result<T> {
    serde_yaml::from_value(document).map_err(|e| ManifestError::Invalid(index, kind.to_owned(), e).into())
}

fn certificate(secret: &Secret) -> CertificateMaterial {
    let namespace = secret.metadata.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE_NAME);
    let name = secret.metadata.name.as_deref().unwrap_or_default();
    let data = secret.data.as_ref();
    let value = |key: &str| data.and_then(|data| data.get(key)).map(|bytes| bytes.0.clone()).unwrap_or_default();
    CertificateMaterial {
        key: ResourceKey::namespaced(name, namespace).with_kind(CORE_GROUP_NAME, SECRET_KIND_NAME),
        certificate: value(TLS_CERTIFICATE_KEY),
        private_key: value(TLS_PRIVATE_KEY),
    }
}

/// Loads a multi-document manifest into the store and returns the events a watch would have produced.
///
/// Routes are announced before gateways so the first pass of each gateway already sees them.
pub fn load(store: &InMemoryStore, content: &str) -> Result<Vec<ResourceEvent>> {
    let mut routes = vec![];
    let mut gateways = vec![];
    let mut pods = vec![];

    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let document = serde_yaml::Value::deserialize(document).map_err(|e| ManifestError::Invalid(index, String::new(), e))?;
        if document.is_null() {
            continue;
        }
        let kind = document.get("kind").and_then(serde_yaml::Value::as_str).ok_or(ManifestError::MissingKind(index))?.to_owned();
        debug!("Loading {kind} from document {index}");
        match kind.as_str() {
            "Namespace" => {
                let namespace: Namespace = parse(index, &kind, document)?;
                let name = namespace.metadata.name.unwrap_or_default();
                store.add_namespace(&name, namespace.metadata.labels.unwrap_or_default())?;
            },
            "Secret" => {
                let secret: Secret = parse(index, &kind, document)?;
                store.add_certificate(certificate(&secret))?;
            },
            "Service" => {
                let service: Service = parse(index, &kind, document)?;
                let namespace = service.metadata.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE_NAME);
                let name = service.metadata.name.as_deref().unwrap_or_default();
                let injected = service.metadata.annotations.as_ref().and_then(|annotations| annotations.get(CONNECT_INJECT_ANNOTATION)).map_or(true, |value| value != "false");
                if injected {
                    store.add_service(name, namespace)?;
                } else {
                    store.add_unregistered_service(name, namespace)?;
                }
            },
            "Pod" => pods.push(ResourceEvent::PodUpdated(Box::new(parse::<Pod>(index, &kind, document)?))),
            "ReferenceGrant" => store.add_reference_grant(parse::<ReferenceGrant>(index, &kind, document)?)?,
            "Gateway" => {
                let gateway: Gateway = parse(index, &kind, document)?;
                gateways.push(ResourceEvent::GatewayUpserted(ResourceKey::from(&gateway)));
                store.save_gateway(gateway)?;
            },
            "HTTPRoute" | "TCPRoute" => {
                let route: Route = parse(index, &kind, document)?;
                store.save_route(route.clone())?;
                routes.push(ResourceEvent::RouteUpserted(Box::new(route)));
            },
            _ => warn!("Ignoring unsupported kind {kind} in document {index}"),
        }
    }

    Ok(routes.into_iter().chain(gateways).chain(pods).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BackendResolver, CertificateProvider, Store};

    const MANIFEST: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: apps
  labels:
    team: web
---
apiVersion: v1
kind: Secret
metadata:
  name: cert
  namespace: default
data:
  tls.crt: Y2VydA==
  tls.key: a2V5
---
apiVersion: v1
kind: Service
metadata:
  name: echo
  namespace: apps
---
apiVersion: v1
kind: Service
metadata:
  name: legacy
  namespace: apps
  annotations:
    consul.hashicorp.com/connect-inject: "false"
---
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gw
  namespace: default
spec:
  gatewayClassName: consul
  listeners:
    - name: http
      port: 80
      protocol: HTTP
---
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: web
  namespace: apps
spec:
  parentRefs:
    - name: gw
      namespace: default
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: ignored
"#;

    #[tokio::test]
    async fn manifests_fill_the_store() {
        let store = InMemoryStore::default();
        let events = load(&store, MANIFEST).unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ResourceEvent::RouteUpserted(route) if route.name() == "web"));
        assert!(matches!(&events[1], ResourceEvent::GatewayUpserted(key) if key.name == "gw"));

        assert_eq!(store.namespace_labels("apps").await.unwrap().get("team").map(String::as_str), Some("web"));
        let secret_key = ResourceKey::namespaced("cert", "default").with_kind(CORE_GROUP_NAME, SECRET_KIND_NAME);
        let material = store.get_certificate_material(&secret_key).await.unwrap();
        assert_eq!(material.certificate, b"cert".to_vec());
        let service_key = ResourceKey::namespaced("echo", "apps").with_kind(CORE_GROUP_NAME, crate::common::SERVICE_KIND_NAME);
        assert_eq!(store.resolve(&service_key).await.unwrap().name, "echo");
        let legacy_key = ResourceKey::namespaced("legacy", "apps").with_kind(CORE_GROUP_NAME, crate::common::SERVICE_KIND_NAME);
        assert!(matches!(store.resolve(&legacy_key).await, Err(crate::controllers::utils::ResolutionError::ConsulServiceNotFound(_))));
        assert!(store.get_gateway(&ResourceKey::namespaced("gw", "default")).await.unwrap().is_some());
    }

    #[test]
    fn documents_without_kind_are_rejected() {
        let store = InMemoryStore::default();
        assert!(load(&store, "metadata:\n  name: nothing\n").is_err());
    }
}
