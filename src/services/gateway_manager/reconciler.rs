use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use tracing::{debug, info, span, warn, Instrument, Level};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::{Reconcile, ReconcileError, ReconcilerFactory};
use crate::{
    backends::consul::{ConsulSyncer, ResourceGenerator, SyncAdapter},
    common::{now, Gateway, GatewayInSync, Labels, ListenerReady, ResourceKey, Route, RouteRefKey},
    controllers::utils::{bind_routes, ListenerValidator, RoutesResolver},
    services::status::{GatewayStatusBuilder, PodStatusTracker, RouteStatusMerger, RouteStatuses},
    state::{BackendResolver, CertificateProvider, State, Store},
    Configuration,
};

const LISTENER_PENDING_MESSAGE: &str = "Waiting for config entries to be synchronized";

fn references(route: &Route, gateway_key: &ResourceKey) -> bool {
    route.parent_refs().iter().any(|parent_ref| RouteRefKey::from((parent_ref, route.namespace())).targets(gateway_key))
}

/// One gateway's reconciliation: binding, status, synthesis and synchronization.
pub struct GatewayReconciler {
    gateway_key: ResourceKey,
    configuration: Arc<Configuration>,
    store: Arc<dyn Store>,
    certificate_provider: Arc<dyn CertificateProvider>,
    backend_resolver: Arc<dyn BackendResolver>,
    state: State,
    pod_tracker: PodStatusTracker,
    syncer: ConsulSyncer,
}

impl GatewayReconciler {
    async fn namespace_labels(&self, routes: &[Route]) -> Result<BTreeMap<String, Labels>, ReconcileError> {
        let mut labels = BTreeMap::new();
        for namespace in routes.iter().map(|route| route.namespace().to_owned()).collect::<BTreeSet<_>>() {
            let namespace_labels = self.store.namespace_labels(&namespace).await?;
            labels.insert(namespace, namespace_labels);
        }
        Ok(labels)
    }

    /// Writes this gateway's outcomes onto every known route, dropping entries of routes that left it.
    async fn update_route_statuses(&self, route_statuses: &RouteStatuses) -> Result<(), ReconcileError> {
        let now = now();
        let merger = RouteStatusMerger::builder().controller_name(&self.configuration.controller_name).gateway_key(&self.gateway_key).now(&now).build();
        for cached in self.state.routes()? {
            let key = cached.key();
            let Some(route) = self.store.get_route(&key).await? else {
                continue;
            };
            let (status, changed) = merger.merge(&route, &route_statuses.outcomes(&key));
            if changed {
                debug!("Updating status of {key}");
                self.store.update_route_status(&key, status).await?;
            }
        }
        Ok(())
    }

    async fn reconcile_gateway(&mut self, gateway: Gateway) -> Result<(), ReconcileError> {
        let log_context = format!("{}", self.gateway_key);
        let reference_grants = self.store.reference_grants().await?;
        let mut listeners = ListenerValidator::builder()
            .gateway(&gateway)
            .reference_grants(&reference_grants)
            .certificate_provider(self.certificate_provider.as_ref())
            .log_context(&log_context)
            .build()
            .validate()
            .await;

        let routes = self.state.routes()?.into_iter().filter(|route| references(route, &self.gateway_key)).collect::<Vec<_>>();
        let namespace_labels = self.namespace_labels(&routes).await?;
        let resolver = RoutesResolver::builder().backend_resolver(self.backend_resolver.as_ref()).reference_grants(&reference_grants).build();
        let resolved_routes = resolver.resolve_all(routes).await;

        let mut route_statuses = RouteStatuses::new();
        for outcome in bind_routes(&self.gateway_key, &mut listeners, resolved_routes, &namespace_labels) {
            route_statuses.add(outcome);
        }

        let desired = ResourceGenerator::builder().gateway_key(&self.gateway_key).listeners(&listeners).consul(&self.configuration.consul).build().compute_desired()?;
        let sync_result = self.syncer.apply(desired).await;
        let in_sync = match &sync_result {
            Ok(()) => GatewayInSync::InSync,
            Err(e) => {
                for listener in listeners.iter_mut().filter(|listener| listener.conditions.ready == ListenerReady::Ready) {
                    listener.conditions.ready = ListenerReady::Pending(LISTENER_PENDING_MESSAGE.to_owned());
                }
                GatewayInSync::SyncError(e.to_string())
            },
        };

        self.update_route_statuses(&route_statuses).await?;

        let scheduled = self.pod_tracker.scheduled_condition(&self.gateway_key)?;
        let now = now();
        let (status, changed) =
            GatewayStatusBuilder::builder().gateway(&gateway).listeners(&listeners).scheduled(scheduled.as_ref()).in_sync(&in_sync).now(&now).build().status();
        if changed {
            debug!("Updating gateway status");
            self.store.update_gateway_status(&self.gateway_key, status).await?;
        }

        sync_result?;
        Ok(())
    }
}

#[async_trait]
impl Reconcile for GatewayReconciler {
    async fn reconcile(&mut self) -> Result<(), ReconcileError> {
        let span = span!(Level::INFO, "GatewayReconciler", id = %self.gateway_key, pass = %Uuid::new_v4());
        async {
            let Some(gateway) = self.store.get_gateway(&self.gateway_key).await? else {
                debug!("Gateway is gone, nothing to do");
                return Ok(());
            };
            self.reconcile_gateway(gateway).await?;
            info!("Reconciled");
            Ok(())
        }
        .instrument(span.clone())
        .await
    }

    async fn teardown(&mut self) -> Result<(), ReconcileError> {
        let span = span!(Level::INFO, "GatewayReconciler", id = %self.gateway_key, pass = %Uuid::new_v4());
        async {
            let synced = self.syncer.delete_gateway().await;
            if let Err(e) = &synced {
                warn!("Unable to remove config entries {e}");
            }
            self.update_route_statuses(&RouteStatuses::new()).await?;
            self.pod_tracker.delete_status(&self.gateway_key)?;
            synced?;
            Ok(())
        }
        .instrument(span.clone())
        .await
    }
}

/// Builds a reconciler per gateway, all sharing the same collaborators.
#[derive(Clone, TypedBuilder)]
pub struct GatewayReconcilerFactory {
    configuration: Arc<Configuration>,
    store: Arc<dyn Store>,
    certificate_provider: Arc<dyn CertificateProvider>,
    backend_resolver: Arc<dyn BackendResolver>,
    sync_adapter: Arc<dyn SyncAdapter>,
}

impl ReconcilerFactory for GatewayReconcilerFactory {
    fn create(&self, gateway_key: &ResourceKey, state: &State, pod_tracker: &PodStatusTracker) -> Box<dyn Reconcile> {
        Box::new(GatewayReconciler {
            gateway_key: gateway_key.clone(),
            configuration: Arc::clone(&self.configuration),
            store: Arc::clone(&self.store),
            certificate_provider: Arc::clone(&self.certificate_provider),
            backend_resolver: Arc::clone(&self.backend_resolver),
            state: state.clone(),
            pod_tracker: pod_tracker.clone(),
            syncer: ConsulSyncer::new(Arc::clone(&self.sync_adapter), self.configuration.track_apply_failures),
        })
    }
}
