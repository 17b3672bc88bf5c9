use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    common::{CertificateMaterial, Gateway, GatewayStatus, Labels, ReferenceGrant, ResolvedService, ResourceKey, Route, RouteStatus, CORE_GROUP_NAME, SERVICE_KIND_NAME},
    controllers::utils::ResolutionError,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("locking error")]
    LockingError,
    #[error("store failure {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("certificate {0} not found")]
    NotFound(String),
    #[error("certificate {0} has no key material")]
    MissingData(String),
}

/// Read and write access to the resource store the gateways and routes live in.
#[async_trait]
pub trait Store: Send + Sync {
    async fn namespace_labels(&self, namespace: &str) -> Result<Labels, StoreError>;
    async fn reference_grants(&self) -> Result<Vec<ReferenceGrant>, StoreError>;
    async fn get_route(&self, key: &ResourceKey) -> Result<Option<Route>, StoreError>;
    async fn get_gateway(&self, key: &ResourceKey) -> Result<Option<Gateway>, StoreError>;
    async fn update_route_status(&self, key: &ResourceKey, status: RouteStatus) -> Result<(), StoreError>;
    async fn update_gateway_status(&self, key: &ResourceKey, status: GatewayStatus) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CertificateProvider: Send + Sync {
    async fn get_certificate_material(&self, key: &ResourceKey) -> Result<CertificateMaterial, CertificateError>;
}

#[async_trait]
pub trait BackendResolver: Send + Sync {
    async fn resolve(&self, backend: &ResourceKey) -> Result<ResolvedService, ResolutionError>;
}

/// Routes known to the controller, shared by every gateway worker.
#[derive(Clone, Default)]
pub struct State {
    routes: Arc<Mutex<BTreeMap<ResourceKey, Route>>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_route(&self, route: Route) -> Result<(), StoreError> {
        let mut lock = self.routes.lock().map_err(|_| StoreError::LockingError)?;
        lock.insert(route.key(), route);
        Ok(())
    }

    pub fn delete_route(&self, key: &ResourceKey) -> Result<Option<Route>, StoreError> {
        let mut lock = self.routes.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.remove(key))
    }

    pub fn routes(&self) -> Result<Vec<Route>, StoreError> {
        let lock = self.routes.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.values().cloned().collect())
    }
}

/// Everything the controller talks to, kept in memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    namespaces: Arc<Mutex<HashMap<String, Labels>>>,
    reference_grants: Arc<Mutex<Vec<ReferenceGrant>>>,
    routes: Arc<Mutex<HashMap<ResourceKey, Route>>>,
    gateways: Arc<Mutex<HashMap<ResourceKey, Gateway>>>,
    certificates: Arc<Mutex<HashMap<ResourceKey, CertificateMaterial>>>,
    services: Arc<Mutex<HashMap<ResourceKey, Option<ResolvedService>>>>,
}

impl InMemoryStore {
    pub fn add_namespace(&self, name: &str, labels: Labels) -> Result<(), StoreError> {
        let mut lock = self.namespaces.lock().map_err(|_| StoreError::LockingError)?;
        lock.insert(name.to_owned(), labels);
        Ok(())
    }

    pub fn add_reference_grant(&self, grant: ReferenceGrant) -> Result<(), StoreError> {
        let mut lock = self.reference_grants.lock().map_err(|_| StoreError::LockingError)?;
        lock.push(grant);
        Ok(())
    }

    pub fn save_route(&self, route: Route) -> Result<(), StoreError> {
        let mut lock = self.routes.lock().map_err(|_| StoreError::LockingError)?;
        lock.insert(route.key(), route);
        Ok(())
    }

    pub fn delete_route(&self, key: &ResourceKey) -> Result<Option<Route>, StoreError> {
        let mut lock = self.routes.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.remove(key))
    }

    pub fn save_gateway(&self, gateway: Gateway) -> Result<(), StoreError> {
        let mut lock = self.gateways.lock().map_err(|_| StoreError::LockingError)?;
        lock.insert(ResourceKey::from(&gateway), gateway);
        Ok(())
    }

    pub fn delete_gateway(&self, key: &ResourceKey) -> Result<Option<Gateway>, StoreError> {
        let mut lock = self.gateways.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.remove(key))
    }

    pub fn add_certificate(&self, material: CertificateMaterial) -> Result<(), StoreError> {
        let mut lock = self.certificates.lock().map_err(|_| StoreError::LockingError)?;
        lock.insert(material.key.clone(), material);
        Ok(())
    }

    /// Registers a service that resolves to a downstream service of the same name.
    pub fn add_service(&self, name: &str, namespace: &str) -> Result<(), StoreError> {
        let mut lock = self.services.lock().map_err(|_| StoreError::LockingError)?;
        lock.insert(
            ResourceKey::namespaced(name, namespace).with_kind(CORE_GROUP_NAME, SERVICE_KIND_NAME),
            Some(ResolvedService { name: name.to_owned(), namespace: namespace.to_owned() }),
        );
        Ok(())
    }

    /// Registers a service that exists in the cluster but has no downstream counterpart.
    pub fn add_unregistered_service(&self, name: &str, namespace: &str) -> Result<(), StoreError> {
        let mut lock = self.services.lock().map_err(|_| StoreError::LockingError)?;
        lock.insert(ResourceKey::namespaced(name, namespace).with_kind(CORE_GROUP_NAME, SERVICE_KIND_NAME), None);
        Ok(())
    }

    pub fn route_status(&self, key: &ResourceKey) -> Result<Option<RouteStatus>, StoreError> {
        let lock = self.routes.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.get(key).map(|route| route.status().clone()))
    }

    pub fn gateway_status(&self, key: &ResourceKey) -> Result<Option<GatewayStatus>, StoreError> {
        let lock = self.gateways.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.get(key).map(|gateway| gateway.status.clone()))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn namespace_labels(&self, namespace: &str) -> Result<Labels, StoreError> {
        let lock = self.namespaces.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.get(namespace).cloned().unwrap_or_default())
    }

    async fn reference_grants(&self) -> Result<Vec<ReferenceGrant>, StoreError> {
        let lock = self.reference_grants.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.clone())
    }

    async fn get_route(&self, key: &ResourceKey) -> Result<Option<Route>, StoreError> {
        let lock = self.routes.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.get(key).cloned())
    }

    async fn get_gateway(&self, key: &ResourceKey) -> Result<Option<Gateway>, StoreError> {
        let lock = self.gateways.lock().map_err(|_| StoreError::LockingError)?;
        Ok(lock.get(key).cloned())
    }

    async fn update_route_status(&self, key: &ResourceKey, status: RouteStatus) -> Result<(), StoreError> {
        let mut lock = self.routes.lock().map_err(|_| StoreError::LockingError)?;
        if let Some(route) = lock.get_mut(key) {
            *route.status_mut() = status;
        }
        Ok(())
    }

    async fn update_gateway_status(&self, key: &ResourceKey, status: GatewayStatus) -> Result<(), StoreError> {
        let mut lock = self.gateways.lock().map_err(|_| StoreError::LockingError)?;
        if let Some(gateway) = lock.get_mut(key) {
            gateway.status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateProvider for InMemoryStore {
    async fn get_certificate_material(&self, key: &ResourceKey) -> Result<CertificateMaterial, CertificateError> {
        let lock = self.certificates.lock().map_err(|_| CertificateError::NotFound(key.to_string()))?;
        let material = lock.get(key).cloned().ok_or_else(|| CertificateError::NotFound(key.to_string()))?;
        if material.certificate.is_empty() || material.private_key.is_empty() {
            return Err(CertificateError::MissingData(key.to_string()));
        }
        Ok(material)
    }
}

#[async_trait]
impl BackendResolver for InMemoryStore {
    async fn resolve(&self, backend: &ResourceKey) -> Result<ResolvedService, ResolutionError> {
        let lock = self.services.lock().map_err(|_| ResolutionError::BackendNotFound(backend.to_string()))?;
        match lock.get(backend) {
            Some(Some(service)) => Ok(service.clone()),
            Some(None) => Err(ResolutionError::ConsulServiceNotFound(backend.to_string())),
            None => Err(ResolutionError::ServiceNotFound(backend.to_string())),
        }
    }
}
