use std::{sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

pub mod backends;
pub mod common;
pub mod controllers;
pub mod manifests;
pub mod services;
pub mod state;

use backends::consul::SyncAdapter;
use common::{ResourceKey, Route};
use services::{GatewayManager, GatewayReconcilerFactory};
use state::{BackendResolver, CertificateProvider, Store};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

const DEFAULT_SYNC_RETRY_DELAY_MS: u64 = 100;

fn default_sync_retry_delay_ms() -> u64 {
    DEFAULT_SYNC_RETRY_DELAY_MS
}

fn default_track_apply_failures() -> bool {
    true
}

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
pub struct ConsulConfiguration {
    #[builder(default)]
    #[serde(default)]
    pub namespace: Option<String>,
    pub sds_cluster: String,
    pub entry_meta_source: String,
}

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
pub struct Configuration {
    pub controller_name: String,
    #[builder(default)]
    pub enable_open_telemetry: Option<bool>,
    pub consul: ConsulConfiguration,
    #[builder(default = DEFAULT_SYNC_RETRY_DELAY_MS)]
    #[serde(default = "default_sync_retry_delay_ms")]
    pub sync_retry_delay_ms: u64,
    #[builder(default = true)]
    #[serde(default = "default_track_apply_failures")]
    pub track_apply_failures: bool,
}

#[derive(Error, Debug)]
enum ConfigurationError {
    #[error("controller name must be not empty")]
    ControllerName,
    #[error("consul sds cluster must be not empty")]
    SdsCluster,
    #[error("sync retry delay must be greater than zero")]
    RetryDelay,
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.controller_name.is_empty() {
            return Err(ConfigurationError::ControllerName.into());
        }
        if self.consul.sds_cluster.is_empty() {
            return Err(ConfigurationError::SdsCluster.into());
        }
        if self.sync_retry_delay_ms == 0 {
            return Err(ConfigurationError::RetryDelay.into());
        }
        Ok(())
    }

    pub fn sync_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sync_retry_delay_ms)
    }
}

/// Changes observed by the watch layer.
#[derive(Clone, Debug)]
pub enum ResourceEvent {
    GatewayUpserted(ResourceKey),
    GatewayDeleted(ResourceKey),
    RouteUpserted(Box<Route>),
    RouteDeleted(ResourceKey),
    PodUpdated(Box<Pod>),
}

/// The collaborators the controller talks to.
#[derive(Clone, TypedBuilder)]
pub struct Collaborators {
    store: Arc<dyn Store>,
    certificate_provider: Arc<dyn CertificateProvider>,
    backend_resolver: Arc<dyn BackendResolver>,
    sync_adapter: Arc<dyn SyncAdapter>,
}

/// Drives gateway workers from the event stream until it closes.
pub async fn start(configuration: Configuration, collaborators: Collaborators, mut events: mpsc::Receiver<ResourceEvent>) -> Result<()> {
    configuration.validate()?;
    info!("Gatebinder started");
    let factory = GatewayReconcilerFactory::builder()
        .configuration(Arc::new(configuration.clone()))
        .store(collaborators.store)
        .certificate_provider(collaborators.certificate_provider)
        .backend_resolver(collaborators.backend_resolver)
        .sync_adapter(collaborators.sync_adapter)
        .build();
    let manager = GatewayManager::new(Arc::new(factory), configuration.sync_retry_delay());

    while let Some(event) = events.recv().await {
        let result = match event {
            ResourceEvent::GatewayUpserted(key) => manager.upsert_gateway(&key),
            ResourceEvent::GatewayDeleted(key) => manager.delete_gateway(&key).map(|_| ()),
            ResourceEvent::RouteUpserted(route) => manager.upsert_route(*route),
            ResourceEvent::RouteDeleted(key) => manager.delete_route(&key),
            ResourceEvent::PodUpdated(pod) => manager.update_pod(&pod),
        };
        if let Err(e) = result {
            warn!("Unable to process event {e}");
        }
    }

    manager.shutdown().await;
    info!("Gatebinder stopped");
    Ok(())
}
