mod reconciler;
mod worker;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
pub use reconciler::{GatewayReconciler, GatewayReconcilerFactory};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use worker::GatewayWorker;

use crate::{
    backends::consul::{SyncError, SynthesisError},
    common::{ResourceKey, Route},
    services::status::PodStatusTracker,
    state::{State, StoreError},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("synchronization failed {0}")]
    Sync(String),
    #[error("reconciliation failed {0}")]
    Internal(String),
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        Self::Sync(e.to_string())
    }
}

impl From<SyncError> for ReconcileError {
    fn from(e: SyncError) -> Self {
        Self::Sync(e.to_string())
    }
}

impl From<SynthesisError> for ReconcileError {
    fn from(e: SynthesisError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// A single gateway's reconciliation pass and its removal.
#[async_trait]
pub trait Reconcile: Send {
    async fn reconcile(&mut self) -> Result<(), ReconcileError>;
    async fn teardown(&mut self) -> Result<(), ReconcileError>;
}

pub trait ReconcilerFactory: Send + Sync {
    fn create(&self, gateway_key: &ResourceKey, state: &State, pod_tracker: &PodStatusTracker) -> Box<dyn Reconcile>;
}

struct WorkerHandle {
    signal: mpsc::Sender<()>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns one worker per gateway and routes change notifications to them.
pub struct GatewayManager {
    workers: Arc<Mutex<HashMap<ResourceKey, WorkerHandle>>>,
    factory: Arc<dyn ReconcilerFactory>,
    state: State,
    pod_tracker: PodStatusTracker,
    shutdown: Arc<watch::Sender<bool>>,
    retry_delay: Duration,
}

impl GatewayManager {
    pub fn new(factory: Arc<dyn ReconcilerFactory>, retry_delay: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
            factory,
            state: State::new(),
            pod_tracker: PodStatusTracker::new(),
            shutdown: Arc::new(shutdown),
            retry_delay,
        }
    }

    fn spawn_worker(&self, gateway_key: &ResourceKey) -> WorkerHandle {
        let (signal_sender, signal_receiver) = mpsc::channel(1);
        let (stop_sender, stop_receiver) = oneshot::channel();
        let worker = GatewayWorker::builder()
            .gateway_key(gateway_key.clone())
            .reconciler(self.factory.create(gateway_key, &self.state, &self.pod_tracker))
            .signal_sender(signal_sender.clone())
            .signal_receiver(signal_receiver)
            .stop_receiver(stop_receiver)
            .shutdown_receiver(self.shutdown.subscribe())
            .retry_delay(self.retry_delay)
            .build();
        let task = tokio::spawn(worker.run());
        WorkerHandle { signal: signal_sender, stop: stop_sender, task }
    }

    fn signal(gateway_key: &ResourceKey, handle: &WorkerHandle) {
        match handle.signal.try_send(()) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(())) => debug!("Pass already pending for {gateway_key}"),
            Err(mpsc::error::TrySendError::Closed(())) => warn!("Worker for {gateway_key} is gone"),
        }
    }

    fn signal_all(&self) -> Result<(), StoreError> {
        let workers = self.workers.lock().map_err(|_| StoreError::LockingError)?;
        for (gateway_key, handle) in workers.iter() {
            Self::signal(gateway_key, handle);
        }
        Ok(())
    }

    /// Starts a worker for the gateway if there is none and schedules a pass.
    pub fn upsert_gateway(&self, gateway_key: &ResourceKey) -> Result<(), StoreError> {
        let mut workers = self.workers.lock().map_err(|_| StoreError::LockingError)?;
        let handle = workers.entry(gateway_key.clone()).or_insert_with(|| {
            info!("Starting worker for {gateway_key}");
            self.spawn_worker(gateway_key)
        });
        Self::signal(gateway_key, handle);
        Ok(())
    }

    /// Stops the gateway's worker, which tears down everything the gateway produced.
    pub fn delete_gateway(&self, gateway_key: &ResourceKey) -> Result<Option<JoinHandle<()>>, StoreError> {
        let handle = self.workers.lock().map_err(|_| StoreError::LockingError)?.remove(gateway_key);
        let Some(handle) = handle else {
            debug!("No worker for {gateway_key}");
            return Ok(None);
        };
        info!("Stopping worker for {gateway_key}");
        if handle.stop.send(()).is_err() {
            warn!("Worker for {gateway_key} exited before stop");
        }
        Ok(Some(handle.task))
    }

    pub fn upsert_route(&self, route: Route) -> Result<(), StoreError> {
        self.state.save_route(route)?;
        self.signal_all()
    }

    pub fn delete_route(&self, route_key: &ResourceKey) -> Result<(), StoreError> {
        if self.state.delete_route(route_key)?.is_none() {
            debug!("Unknown route {route_key}");
        }
        self.signal_all()
    }

    pub fn update_pod(&self, pod: &Pod) -> Result<(), StoreError> {
        let Some(gateway_key) = self.pod_tracker.update_pod(pod)? else {
            return Ok(());
        };
        let workers = self.workers.lock().map_err(|_| StoreError::LockingError)?;
        if let Some(handle) = workers.get(&gateway_key) {
            Self::signal(&gateway_key, handle);
        }
        Ok(())
    }

    pub fn pod_tracker(&self) -> &PodStatusTracker {
        &self.pod_tracker
    }

    /// Stops every worker without touching downstream state.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let tasks = match self.workers.lock() {
            Ok(mut workers) => workers.drain().map(|(_, handle)| handle.task).collect::<Vec<_>>(),
            Err(_) => {
                warn!("Unable to collect workers on shutdown");
                return;
            },
        };
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Worker failed {e}");
            }
        }
    }
}
