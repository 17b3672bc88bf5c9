use std::collections::BTreeMap;

use itertools::Itertools;
use kube_core::Selector;
use tracing::debug;
use typed_builder::TypedBuilder;

use super::ListenerTlsConfigValidator;
use crate::{
    common::{
        FromNamespaces, Gateway, ListenerConflicted, ListenerDetached, ListenerReady, ListenerResolvedRefs, ProtocolType, ReferenceGrant, ResolvedListener,
        ResourceKey, TlsMode,
    },
    state::CertificateProvider,
};

/// Produces the validated listener set of a gateway for one reconciliation pass.
#[derive(TypedBuilder)]
pub struct ListenerValidator<'a> {
    gateway: &'a Gateway,
    reference_grants: &'a [ReferenceGrant],
    certificate_provider: &'a dyn CertificateProvider,
    log_context: &'a str,
}

impl ListenerValidator<'_> {
    pub async fn validate(self) -> Vec<ResolvedListener> {
        let gateway_key = ResourceKey::from(self.gateway);
        let mut listeners: Vec<_> = self.gateway.spec.listeners.iter().cloned().map(ResolvedListener::new).collect();

        for listener in &mut listeners {
            Self::validate_protocol(listener);
            Self::validate_route_kinds(listener);
            Self::validate_selector(listener);
        }
        Self::validate_conflicts(&mut listeners);

        let tls_validator = ListenerTlsConfigValidator::builder()
            .gateway_key(&gateway_key)
            .reference_grants(self.reference_grants)
            .certificate_provider(self.certificate_provider)
            .log_context(self.log_context)
            .build();
        for listener in listeners.iter_mut().filter(|listener| listener.protocol == Some(ProtocolType::Https)) {
            tls_validator.validate(listener).await;
        }

        for listener in &listeners {
            debug!("{} Listener {} {:?}", self.log_context, listener.name(), listener.conditions);
        }
        listeners
    }

    fn validate_protocol(listener: &mut ResolvedListener) {
        match listener.protocol {
            Some(ProtocolType::Http | ProtocolType::Https | ProtocolType::Tcp) => {},
            _ => {
                listener.conditions.detached = ListenerDetached::UnsupportedProtocol(format!("unsupported protocol {}", listener.listener.protocol));
                return;
            },
        }

        if !(1..=65535).contains(&listener.port()) {
            listener.conditions.detached = ListenerDetached::PortUnavailable(format!("invalid port {}", listener.port()));
            return;
        }

        if listener.listener.tls.as_ref().is_some_and(|tls| tls.mode == TlsMode::Passthrough) {
            listener.conditions.detached = ListenerDetached::UnsupportedExtension("TLS passthrough is not supported".to_owned());
        }
    }

    fn validate_route_kinds(listener: &mut ResolvedListener) {
        let Some(protocol) = listener.protocol else {
            return;
        };
        let Some(allowed_routes) = &listener.listener.allowed_routes else {
            return;
        };
        let protocol_kinds = protocol.supported_kinds();
        let invalid = allowed_routes
            .kinds
            .iter()
            .filter(|kind| !protocol_kinds.iter().any(|supported| supported.same_as(kind)))
            .map(|kind| kind.kind.clone())
            .collect::<Vec<_>>();
        if !invalid.is_empty() {
            listener.conditions.resolved_refs = ListenerResolvedRefs::InvalidRouteKinds(format!("route kinds not supported by {protocol}: {}", invalid.join(", ")));
        }
    }

    fn validate_selector(listener: &mut ResolvedListener) {
        if listener.listener.namespace_policy() != FromNamespaces::Selector {
            return;
        }
        match listener.listener.namespace_selector() {
            Some(selector) => {
                if let Err(e) = Selector::try_from(selector.clone()) {
                    listener.conditions.ready = ListenerReady::Invalid(format!("invalid namespace selector {e}"));
                }
            },
            None => listener.conditions.ready = ListenerReady::Invalid("namespace selector is missing".to_owned()),
        }
    }

    /// Listeners sharing a port must agree on protocol and use distinct hostnames.
    fn validate_conflicts(listeners: &mut [ResolvedListener]) {
        let by_port: BTreeMap<i32, Vec<usize>> = listeners.iter().enumerate().map(|(index, listener)| (listener.port(), index)).into_group_map().into_iter().collect();

        for indices in by_port.values().filter(|indices| indices.len() > 1) {
            let protocols = indices.iter().map(|index| listeners[*index].listener.protocol.to_uppercase()).unique().count();
            if protocols > 1 {
                for index in indices {
                    let port = listeners[*index].port();
                    listeners[*index].conditions.conflicted = ListenerConflicted::ProtocolConflict(format!("listeners on port {port} use different protocols"));
                }
                continue;
            }

            let hostnames = indices.iter().map(|index| listeners[*index].hostname().unwrap_or_default().to_owned()).counts();
            for index in indices {
                let hostname = listeners[*index].hostname().unwrap_or_default().to_owned();
                if hostnames.get(&hostname).is_some_and(|count| *count > 1) {
                    listeners[*index].conditions.conflicted = ListenerConflicted::HostnameConflict(format!("hostname '{hostname}' is used by another listener"));
                }
            }
        }
    }
}
