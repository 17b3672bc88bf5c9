use std::{
    collections::{BTreeSet, HashSet},
    mem,
};

use thiserror::Error;
use tracing::{debug, Instrument, Span};
use typed_builder::TypedBuilder;

use crate::{
    common::{reference_allowed, ReferenceGrant, ResolvedRoute, ResolvedService, ResourceKey, Route, RouteResolvedRefs, CORE_GROUP_NAME, SERVICE_KIND_NAME},
    state::BackendResolver,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("service {0} not found")]
    ServiceNotFound(String),
    #[error("service {0} is not registered downstream")]
    ConsulServiceNotFound(String),
    #[error("backend {0} not found")]
    BackendNotFound(String),
    #[error("reference to backend {0} is not permitted")]
    RefNotPermitted(String),
    #[error("backend {0} has unsupported kind")]
    InvalidKind(String),
}

impl ResolutionError {
    fn into_condition(self, message: String) -> RouteResolvedRefs {
        match self {
            ResolutionError::ServiceNotFound(_) => RouteResolvedRefs::ServiceNotFound(message),
            ResolutionError::ConsulServiceNotFound(_) => RouteResolvedRefs::ConsulServiceNotFound(message),
            ResolutionError::BackendNotFound(_) => RouteResolvedRefs::BackendNotFound(message),
            ResolutionError::RefNotPermitted(_) => RouteResolvedRefs::RefNotPermitted(message),
            ResolutionError::InvalidKind(_) => RouteResolvedRefs::InvalidKind(message),
        }
    }
}

/// Collapses per-backend failures into one condition; distinct failure kinds become `Errors`.
fn aggregate(errors: Vec<ResolutionError>) -> RouteResolvedRefs {
    let kinds = errors.iter().map(mem::discriminant).collect::<HashSet<_>>().len();
    let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
    match errors.into_iter().next() {
        None => RouteResolvedRefs::ResolvedRefs,
        Some(first) if kinds == 1 => first.into_condition(message),
        Some(_) => RouteResolvedRefs::Errors(message),
    }
}

#[derive(TypedBuilder)]
pub struct RoutesResolver<'a> {
    backend_resolver: &'a dyn BackendResolver,
    reference_grants: &'a [ReferenceGrant],
}

impl RoutesResolver<'_> {
    pub async fn resolve(&self, route: Route) -> ResolvedRoute {
        let route_key = route.key();
        let route_namespace = route.namespace().to_owned();
        let backend_keys = route.backend_refs().iter().map(|backend| backend.resource_key(&route_namespace)).collect::<BTreeSet<_>>();
        let mut resolved = ResolvedRoute::new(route);
        let mut errors = vec![];

        for backend_key in backend_keys {
            match self.resolve_backend(&route_key, &backend_key).await {
                Ok(service) => {
                    resolved.services.insert(backend_key, service);
                },
                Err(e) => {
                    debug!("Can't resolve backend {backend_key} for {route_key} {e}");
                    errors.push(e);
                },
            }
        }
        resolved.resolved_refs = aggregate(errors);
        resolved
    }

    async fn resolve_backend(&self, route_key: &ResourceKey, backend_key: &ResourceKey) -> Result<ResolvedService, ResolutionError> {
        if backend_key.group != CORE_GROUP_NAME || backend_key.kind != SERVICE_KIND_NAME {
            return Err(ResolutionError::InvalidKind(backend_key.to_string()));
        }
        if !reference_allowed(self.reference_grants, route_key, backend_key) {
            return Err(ResolutionError::RefNotPermitted(backend_key.to_string()));
        }
        self.backend_resolver.resolve(backend_key).instrument(Span::current()).await
    }

    pub async fn resolve_all(&self, routes: Vec<Route>) -> Vec<ResolvedRoute> {
        let futures: Vec<_> = routes.into_iter().map(|route| self.resolve(route)).collect();
        futures::future::join_all(futures).await
    }
}
