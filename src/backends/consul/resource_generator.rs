use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use typed_builder::TypedBuilder;

use super::{
    config_entries::{
        ConfigEntry, GatewayTlsConfig, GatewayTlsSdsConfig, HttpHeaderModifiers, IngressGateway, IngressListener, IngressService, Meta, ServiceDefaults,
        ServiceRoute, ServiceRouteDestination, ServiceRouteHttpMatch, ServiceRouteHttpMatchHeader, ServiceRouteMatch, ServiceRouter, ServiceSplit,
        ServiceSplitter, HTTP_PROTOCOL, TCP_PROTOCOL,
    },
    index::ConfigEntryIndex,
};
use crate::{
    common::{
        HeaderMatchType, HttpBackendRef, HttpHeaderMatch, HttpRoute, HttpRouteFilter, HttpRouteMatch, HttpRouteRule, PathMatchType, ProtocolType, ResolvedListener,
        ResolvedRoute, ResolvedService, ResourceKey, Route, DEFAULT_ROUTE_HOSTNAME,
    },
    controllers::utils::hostnames_match,
    ConsulConfiguration,
};

pub const EXTERNAL_SOURCE_META_KEY: &str = "external-source";
pub const GATEWAY_NAME_META_KEY: &str = "gateway-name";
pub const GATEWAY_NAMESPACE_META_KEY: &str = "gateway-namespace";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("listener {0} has unsupported protocol {1}")]
    UnsupportedProtocol(String, String),
}

/// Everything one gateway needs downstream.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    pub gateway: ConfigEntry,
    pub routers: ConfigEntryIndex,
    pub splitters: ConfigEntryIndex,
    pub defaults: ConfigEntryIndex,
}

const NAME_HASH_LENGTH: usize = 8;

fn name_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("/").as_bytes());
    let mut hash = format!("{:x}", hasher.finalize());
    hash.truncate(NAME_HASH_LENGTH);
    hash
}

/// Kubernetes names may contain dashes, so the readable prefix alone is ambiguous; the suffix hashes the exact identity.
pub fn router_name(gateway_key: &ResourceKey, route_key: &ResourceKey) -> String {
    let hash = name_hash(&["router", route_key.namespace.as_str(), route_key.name.as_str()]);
    format!("{}-{}-{}-{hash}", gateway_key.name, route_key.namespace, route_key.name)
}

pub fn splitter_name(gateway_key: &ResourceKey, route_key: &ResourceKey, rule_index: usize) -> String {
    let index = rule_index.to_string();
    let hash = name_hash(&["splitter", route_key.namespace.as_str(), route_key.name.as_str(), index.as_str()]);
    format!("{}-{}-{}-{index}-{hash}", gateway_key.name, route_key.namespace, route_key.name)
}

fn header_modifiers(filters: &[HttpRouteFilter]) -> HttpHeaderModifiers {
    let mut modifiers = HttpHeaderModifiers::default();
    for filter in filters {
        if let HttpRouteFilter::RequestHeaderModifier { request_header_modifier } = filter {
            modifiers.add.extend(request_header_modifier.add.iter().map(|header| (header.name.clone(), header.value.clone())));
            modifiers.set.extend(request_header_modifier.set.iter().map(|header| (header.name.clone(), header.value.clone())));
            modifiers.remove.extend(request_header_modifier.remove.iter().cloned());
        }
    }
    modifiers
}

fn prefix_rewrite(filters: &[HttpRouteFilter]) -> Option<String> {
    filters.iter().find_map(|filter| match filter {
        HttpRouteFilter::UrlRewrite { url_rewrite } => url_rewrite.prefix_rewrite().map(str::to_owned),
        HttpRouteFilter::RequestHeaderModifier { .. } => None,
    })
}

fn header_match(header: &HttpHeaderMatch) -> ServiceRouteHttpMatchHeader {
    match header.type_ {
        HeaderMatchType::Exact => ServiceRouteHttpMatchHeader { name: header.name.clone(), exact: Some(header.value.clone()), regex: None },
        HeaderMatchType::RegularExpression => ServiceRouteHttpMatchHeader { name: header.name.clone(), exact: None, regex: Some(header.value.clone()) },
    }
}

fn route_match(route_match: &HttpRouteMatch) -> ServiceRouteMatch {
    let mut http = ServiceRouteHttpMatch {
        header: route_match.headers.iter().map(header_match).collect(),
        query_param: route_match.query_params.iter().map(header_match).collect(),
        methods: route_match.method.iter().cloned().collect(),
        ..Default::default()
    };
    if let Some(path) = &route_match.path {
        match path.type_ {
            PathMatchType::Exact => http.path_exact = Some(path.value.clone()),
            PathMatchType::PathPrefix => http.path_prefix = Some(path.value.clone()),
            PathMatchType::RegularExpression => http.path_regex = Some(path.value.clone()),
        }
    }
    ServiceRouteMatch { http }
}

#[derive(TypedBuilder)]
pub struct ResourceGenerator<'a> {
    gateway_key: &'a ResourceKey,
    listeners: &'a [ResolvedListener],
    consul: &'a ConsulConfiguration,
}

impl ResourceGenerator<'_> {
    fn meta(&self) -> Meta {
        Meta::from([
            (EXTERNAL_SOURCE_META_KEY.to_owned(), self.consul.entry_meta_source.clone()),
            (GATEWAY_NAME_META_KEY.to_owned(), self.gateway_key.name.clone()),
            (GATEWAY_NAMESPACE_META_KEY.to_owned(), self.gateway_key.namespace.clone()),
        ])
    }

    fn service_defaults(&self, name: &str) -> ConfigEntry {
        ConfigEntry::ServiceDefaults(ServiceDefaults {
            name: name.to_owned(),
            namespace: self.consul.namespace.clone(),
            protocol: HTTP_PROTOCOL.to_owned(),
            meta: self.meta(),
        })
    }

    pub fn compute_desired(&self) -> Result<DesiredState, SynthesisError> {
        let mut routers = ConfigEntryIndex::new();
        let mut splitters = ConfigEntryIndex::new();
        let mut defaults = ConfigEntryIndex::new();
        let mut ingress_listeners = BTreeMap::<i32, IngressListener>::new();

        for listener in self.listeners.iter().filter(|listener| listener.bound_routes > 0) {
            let protocol = match listener.protocol {
                Some(ProtocolType::Http | ProtocolType::Https) => HTTP_PROTOCOL,
                Some(ProtocolType::Tcp) => TCP_PROTOCOL,
                _ => return Err(SynthesisError::UnsupportedProtocol(listener.name().to_owned(), listener.listener.protocol.clone())),
            };
            let ingress_listener = ingress_listeners.entry(listener.port()).or_insert_with(|| IngressListener {
                port: listener.port(),
                protocol: protocol.to_owned(),
                services: vec![],
                tls: self.listener_tls(listener),
            });

            for resolved in &listener.routes {
                let service = match &resolved.route {
                    Route::Http(http_route) => {
                        let router = self.router(resolved, http_route, &mut splitters);
                        let service = IngressService {
                            name: router.name.clone(),
                            namespace: self.consul.namespace.clone(),
                            hosts: Self::hosts(listener, resolved),
                        };
                        defaults.add(self.service_defaults(&router.name));
                        routers.add(ConfigEntry::ServiceRouter(router));
                        Some(service)
                    },
                    Route::Tcp(_) => resolved
                        .route
                        .backend_refs()
                        .first()
                        .and_then(|backend_ref| resolved.service(backend_ref))
                        .map(|service| IngressService { name: service.name.clone(), namespace: self.consul.namespace.clone(), hosts: vec![] }),
                };

                match service {
                    Some(service) if !ingress_listener.services.iter().any(|existing| existing.name == service.name) => ingress_listener.services.push(service),
                    Some(_) => {},
                    None => debug!("Route {} has no resolved backend on listener {}", resolved.key(), listener.name()),
                }
            }
        }

        for splitter in splitters.entries() {
            defaults.add(self.service_defaults(splitter.name()));
        }

        let gateway = ConfigEntry::IngressGateway(IngressGateway {
            name: self.gateway_key.name.clone(),
            namespace: self.consul.namespace.clone(),
            listeners: ingress_listeners.into_values().collect(),
            meta: self.meta(),
        });
        Ok(DesiredState { gateway, routers, splitters, defaults })
    }

    fn listener_tls(&self, listener: &ResolvedListener) -> Option<GatewayTlsConfig> {
        if listener.protocol != Some(ProtocolType::Https) {
            return None;
        }
        let tls = listener.listener.tls.as_ref();
        Some(GatewayTlsConfig {
            enabled: true,
            sds: listener.certificates.first().map(|certificate| GatewayTlsSdsConfig {
                cluster_name: self.consul.sds_cluster.clone(),
                cert_resource: certificate.key.to_string(),
            }),
            tls_min_version: tls.and_then(|tls| tls.min_version.clone()),
            tls_max_version: tls.and_then(|tls| tls.max_version.clone()),
            cipher_suites: tls.map(|tls| tls.cipher_suites.clone()).unwrap_or_default(),
        })
    }

    /// Route hostnames narrowed to the listener; none means the listener hostname or any host.
    fn hosts(listener: &ResolvedListener, resolved: &ResolvedRoute) -> Vec<String> {
        let hostnames = resolved
            .route
            .hostnames()
            .iter()
            .filter(|hostname| listener.hostname().map_or(true, |listener_hostname| hostnames_match(listener_hostname, hostname)))
            .cloned()
            .collect::<Vec<_>>();
        if !hostnames.is_empty() {
            return hostnames;
        }
        vec![listener.hostname().unwrap_or(DEFAULT_ROUTE_HOSTNAME).to_owned()]
    }

    fn router(&self, resolved: &ResolvedRoute, http_route: &HttpRoute, splitters: &mut ConfigEntryIndex) -> ServiceRouter {
        let name = router_name(self.gateway_key, &resolved.key());
        let mut routes = vec![];
        for (index, rule) in http_route.spec.rules.iter().enumerate() {
            let Some(destination) = self.destination(index, resolved, rule, splitters) else {
                debug!("Rule {index} of {} has no selectable backend", resolved.key());
                continue;
            };
            if rule.matches.is_empty() {
                routes.push(ServiceRoute { r#match: None, destination: Some(destination) });
            } else {
                routes.extend(rule.matches.iter().map(|matches| ServiceRoute { r#match: Some(route_match(matches)), destination: Some(destination.clone()) }));
            }
        }
        ServiceRouter { name, namespace: self.consul.namespace.clone(), routes, meta: self.meta() }
    }

    fn destination(&self, index: usize, resolved: &ResolvedRoute, rule: &HttpRouteRule, splitters: &mut ConfigEntryIndex) -> Option<ServiceRouteDestination> {
        let backends = rule
            .backend_refs
            .iter()
            .filter(|backend| backend.backend_ref.weight() > 0)
            .filter_map(|backend| resolved.service(&backend.backend_ref).map(|service| (backend, service)))
            .collect::<Vec<_>>();

        // a rule listing several backends always goes through a splitter, even when only one is selectable
        let service = match backends.as_slice() {
            [] => return None,
            [(_, service)] if rule.backend_refs.len() == 1 => service.name.clone(),
            _ => {
                let splitter = self.splitter(splitter_name(self.gateway_key, &resolved.key(), index), &backends);
                let name = splitter.name.clone();
                splitters.add(ConfigEntry::ServiceSplitter(splitter));
                name
            },
        };

        Some(ServiceRouteDestination {
            service,
            namespace: self.consul.namespace.clone(),
            prefix_rewrite: prefix_rewrite(&rule.filters),
            request_headers: header_modifiers(&rule.filters),
        })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn splitter(&self, name: String, backends: &[(&HttpBackendRef, &ResolvedService)]) -> ServiceSplitter {
        let total: i64 = backends.iter().map(|(backend, _)| i64::from(backend.backend_ref.weight())).sum();
        let splits = backends
            .iter()
            .map(|(backend, service)| ServiceSplit {
                weight: ((f64::from(backend.backend_ref.weight()) * 100.0) / total as f64) as f32,
                service: service.name.clone(),
                namespace: self.consul.namespace.clone(),
                request_headers: header_modifiers(&backend.filters),
            })
            .collect();
        ServiceSplitter { name, namespace: self.consul.namespace.clone(), splits, meta: self.meta() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::consul::config_entries::SERVICE_SPLITTER_KIND,
        common::test,
    };

    fn consul() -> ConsulConfiguration {
        ConsulConfiguration::builder().sds_cluster("sds".to_owned()).entry_meta_source("gatebinder".to_owned()).build()
    }

    fn bound_listener(routes: Vec<Route>) -> ResolvedListener {
        let gateway = test::http_gateway();
        let mut listener = ResolvedListener::new(gateway.spec.listeners[0].clone());
        for route in routes {
            let mut resolved = ResolvedRoute::new(route.clone());
            for backend in route.backend_refs() {
                let key = backend.resource_key(route.namespace());
                if key.name != "missing" {
                    resolved.services.insert(key, ResolvedService { name: backend.name.clone(), namespace: route.namespace().to_owned() });
                }
            }
            listener.bind(resolved);
        }
        listener
    }

    fn gateway_key() -> ResourceKey {
        ResourceKey::namespaced("gw", "default")
    }

    fn web_key() -> ResourceKey {
        ResourceKey::namespaced("web", "default")
    }

    fn generate(listeners: &[ResolvedListener]) -> DesiredState {
        let gateway_key = gateway_key();
        let consul = consul();
        ResourceGenerator::builder().gateway_key(&gateway_key).listeners(listeners).consul(&consul).build().compute_desired().unwrap()
    }

    fn splits(state: &DesiredState) -> Vec<(String, f32)> {
        state
            .splitters
            .entries()
            .flat_map(|entry| match entry {
                ConfigEntry::ServiceSplitter(splitter) => splitter.splits.iter().map(|split| (split.service.clone(), split.weight)).collect::<Vec<_>>(),
                _ => vec![],
            })
            .collect()
    }

    #[test]
    fn single_backend_routes_directly() {
        let state = generate(&[bound_listener(vec![test::http_route_with_backends("web", &[("echo", 1)])])]);
        assert_eq!(state.routers.len(), 1);
        assert!(state.splitters.is_empty());
        assert_eq!(state.defaults.len(), 1);

        let ConfigEntry::ServiceRouter(router) = state.routers.entries().next().unwrap() else { panic!("expected a router") };
        assert_eq!(router.name, router_name(&gateway_key(), &web_key()));
        assert!(router.name.starts_with("gw-default-web-"));
        assert_eq!(router.routes[0].destination.as_ref().unwrap().service, "echo");

        let ConfigEntry::IngressGateway(gateway) = &state.gateway else { panic!("expected a gateway") };
        assert_eq!(gateway.listeners.len(), 1);
        assert_eq!(gateway.listeners[0].protocol, HTTP_PROTOCOL);
        assert_eq!(gateway.listeners[0].services[0].name, router.name);
        assert_eq!(gateway.listeners[0].services[0].hosts, vec!["*".to_owned()]);
        assert_eq!(gateway.meta[EXTERNAL_SOURCE_META_KEY], "gatebinder");
    }

    #[test]
    fn weighted_backends_go_through_a_splitter() {
        let state = generate(&[bound_listener(vec![test::http_route_with_backends("web", &[("blue", 1), ("green", 3), ("off", 0)])])]);
        assert_eq!(state.splitters.len(), 1);
        assert_eq!(state.splitters.keys().next().unwrap().kind, SERVICE_SPLITTER_KIND);
        assert_eq!(state.splitters.keys().next().unwrap().name, splitter_name(&gateway_key(), &web_key(), 0));
        assert_eq!(splits(&state), vec![("blue".to_owned(), 25.0), ("green".to_owned(), 75.0)]);
        assert_eq!(state.defaults.len(), 2);
    }

    #[test]
    fn zero_weight_rules_have_no_destination() {
        let state = generate(&[bound_listener(vec![test::http_route_with_backends("web", &[("a", 0), ("b", 0)])])]);
        assert!(state.splitters.is_empty());
        let ConfigEntry::ServiceRouter(router) = state.routers.entries().next().unwrap() else { panic!("expected a router") };
        assert!(router.routes.is_empty());
    }

    #[test]
    fn dropped_backends_leave_a_single_split() {
        let state = generate(&[bound_listener(vec![test::http_route_with_backends("web", &[("echo", 1), ("idle", 0)])])]);
        assert_eq!(splits(&state), vec![("echo".to_owned(), 100.0)]);
        let ConfigEntry::ServiceRouter(router) = state.routers.entries().next().unwrap() else { panic!("expected a router") };
        assert_eq!(router.routes.len(), 1);
        assert!(router.routes[0].r#match.is_none());
        assert_eq!(router.routes[0].destination.as_ref().unwrap().service, splitter_name(&gateway_key(), &web_key(), 0));

        let state = generate(&[bound_listener(vec![test::http_route_with_backends("web", &[("echo", 1), ("missing", 1)])])]);
        assert_eq!(splits(&state), vec![("echo".to_owned(), 100.0)]);
    }

    fn route_in(namespace: &str, name: &str, backends: &[(&str, i32)]) -> Route {
        let mut route = test::http_route_with_backends(name, backends);
        if let Route::Http(http_route) = &mut route {
            http_route.metadata.namespace = Some(namespace.to_owned());
            http_route.spec.parent_refs[0].namespace = Some("default".to_owned());
        }
        route
    }

    #[test]
    fn dashed_names_do_not_collide() {
        let state = generate(&[bound_listener(vec![route_in("team-a", "web", &[("a-backend", 1)]), route_in("team", "a-web", &[("b-backend", 1)])])]);
        assert_eq!(state.routers.len(), 2);
        let ConfigEntry::IngressGateway(gateway) = &state.gateway else { panic!("expected a gateway") };
        assert_eq!(gateway.listeners[0].services.len(), 2);
        let destinations = state
            .routers
            .entries()
            .filter_map(|entry| match entry {
                ConfigEntry::ServiceRouter(router) => router.routes[0].destination.as_ref().map(|destination| destination.service.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert!(destinations.contains(&"a-backend".to_owned()));
        assert!(destinations.contains(&"b-backend".to_owned()));
    }

    #[test]
    fn splitter_names_never_shadow_routers() {
        let a = ResourceKey::namespaced("a", "default");
        let a_0 = ResourceKey::namespaced("a-0", "default");
        assert_ne!(splitter_name(&gateway_key(), &a, 0), router_name(&gateway_key(), &a_0));
        assert_ne!(router_name(&gateway_key(), &a), router_name(&gateway_key(), &a_0));

        let state = generate(&[bound_listener(vec![
            test::http_route_with_backends("a", &[("blue", 1), ("green", 1)]),
            test::http_route_with_backends("a-0", &[("red", 1)]),
        ])]);
        assert_eq!(state.routers.len(), 2);
        assert_eq!(state.splitters.len(), 1);
        assert_eq!(state.defaults.len(), 3);
    }

    #[test]
    fn huge_weights_do_not_overflow() {
        let state = generate(&[bound_listener(vec![test::http_route_with_backends("web", &[("blue", i32::MAX), ("green", i32::MAX)])])]);
        assert_eq!(splits(&state), vec![("blue".to_owned(), 50.0), ("green".to_owned(), 50.0)]);
    }

    #[test]
    fn listeners_without_routes_are_skipped() {
        let state = generate(&[bound_listener(vec![])]);
        let ConfigEntry::IngressGateway(gateway) = &state.gateway else { panic!("expected a gateway") };
        assert!(gateway.listeners.is_empty());
        assert!(state.routers.is_empty());
    }

    #[test]
    fn unsupported_protocol_aborts() {
        let mut listener = bound_listener(vec![test::http_route_with_backends("web", &[("echo", 1)])]);
        listener.protocol = Some(ProtocolType::Udp);
        let gateway_key = ResourceKey::namespaced("gw", "default");
        let consul = consul();
        let listeners = [listener];
        let result = ResourceGenerator::builder().gateway_key(&gateway_key).listeners(&listeners).consul(&consul).build().compute_desired();
        assert!(matches!(result, Err(SynthesisError::UnsupportedProtocol(_, _))));
    }
}
