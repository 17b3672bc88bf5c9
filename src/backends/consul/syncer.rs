use std::{collections::BTreeSet, mem, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    config_entries::{ConfigEntry, ConfigEntryKey, SERVICE_DEFAULTS_KIND, SERVICE_ROUTER_KIND, SERVICE_SPLITTER_KIND},
    index::ConfigEntryIndex,
    resource_generator::DesiredState,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncAdapterError {
    #[error("unable to write {0}: {1}")]
    Write(ConfigEntryKey, String),
    #[error("unable to delete {0}: {1}")]
    Delete(ConfigEntryKey, String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("{0} config entries failed to synchronize")]
    Incomplete(usize),
}

/// Writes config entries to the downstream control plane.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    async fn set_entry(&self, entry: &ConfigEntry) -> Result<(), SyncAdapterError>;
    async fn delete_entry(&self, key: &ConfigEntryKey, namespace: Option<&str>) -> Result<(), SyncAdapterError>;
}

/// Keeps the downstream entries of one gateway in line with what was last computed.
pub struct ConsulSyncer {
    adapter: Arc<dyn SyncAdapter>,
    track_apply_failures: bool,
    gateway: Option<ConfigEntry>,
    routers: ConfigEntryIndex,
    splitters: ConfigEntryIndex,
    defaults: ConfigEntryIndex,
    failed_writes: BTreeSet<ConfigEntryKey>,
    failed_deletes: ConfigEntryIndex,
}

impl ConsulSyncer {
    pub fn new(adapter: Arc<dyn SyncAdapter>, track_apply_failures: bool) -> Self {
        Self {
            adapter,
            track_apply_failures,
            gateway: None,
            routers: ConfigEntryIndex::new(),
            splitters: ConfigEntryIndex::new(),
            defaults: ConfigEntryIndex::new(),
            failed_writes: BTreeSet::new(),
            failed_deletes: ConfigEntryIndex::new(),
        }
    }

    fn retry_write(&self, entry: &ConfigEntry) -> bool {
        self.track_apply_failures && self.failed_writes.contains(&entry.key())
    }

    async fn write(&self, entry: &ConfigEntry, failed: &mut BTreeSet<ConfigEntryKey>) {
        match self.adapter.set_entry(entry).await {
            Ok(()) => debug!("Config entry {} written", entry.key()),
            Err(e) => {
                warn!("{e}");
                failed.insert(entry.key());
            },
        }
    }

    async fn write_all(&self, desired: &ConfigEntryIndex, previous: &ConfigEntryIndex, failed: &mut BTreeSet<ConfigEntryKey>) {
        let unchanged_but_failed = desired.entries().filter(|entry| previous.get(&entry.key()) == Some(*entry) && self.retry_write(entry));
        for entry in desired.changed(previous).chain(unchanged_but_failed) {
            self.write(entry, failed).await;
        }
    }

    async fn delete_all(&self, stale: &ConfigEntryIndex, failed: &mut ConfigEntryIndex) {
        for entry in stale.entries() {
            match self.adapter.delete_entry(&entry.key(), entry.namespace()).await {
                Ok(()) => debug!("Config entry {} deleted", entry.key()),
                Err(e) => {
                    warn!("{e}");
                    failed.add(entry.clone());
                },
            }
        }
    }

    fn stale(&self, previous: &ConfigEntryIndex, desired: &ConfigEntryIndex, kind: &str) -> ConfigEntryIndex {
        let previous = if self.track_apply_failures { previous.merge(&self.failed_deletes.of_kind(kind)) } else { previous.clone() };
        previous.difference(desired)
    }

    /// Writes referenced entries first, then the gateway, then removes what is no longer computed.
    /// Individual failures never stop the batch.
    pub async fn apply(&mut self, desired: DesiredState) -> Result<(), SyncError> {
        let mut failed_writes = BTreeSet::new();
        let mut failed_deletes = ConfigEntryIndex::new();

        self.write_all(&desired.defaults, &self.defaults, &mut failed_writes).await;
        self.write_all(&desired.splitters, &self.splitters, &mut failed_writes).await;
        self.write_all(&desired.routers, &self.routers, &mut failed_writes).await;

        if self.gateway.as_ref() != Some(&desired.gateway) || self.retry_write(&desired.gateway) {
            self.write(&desired.gateway, &mut failed_writes).await;
        }

        let stale_routers = self.stale(&self.routers, &desired.routers, SERVICE_ROUTER_KIND);
        let stale_splitters = self.stale(&self.splitters, &desired.splitters, SERVICE_SPLITTER_KIND);
        let stale_defaults = self.stale(&self.defaults, &desired.defaults, SERVICE_DEFAULTS_KIND);
        self.delete_all(&stale_routers, &mut failed_deletes).await;
        self.delete_all(&stale_splitters, &mut failed_deletes).await;
        self.delete_all(&stale_defaults, &mut failed_deletes).await;

        let failures = failed_writes.len() + failed_deletes.len();
        self.gateway = Some(desired.gateway);
        self.routers = desired.routers;
        self.splitters = desired.splitters;
        self.defaults = desired.defaults;
        if self.track_apply_failures {
            self.failed_writes = failed_writes;
            self.failed_deletes = failed_deletes;
        }

        if failures > 0 {
            return Err(SyncError::Incomplete(failures));
        }
        info!("Config entries in sync");
        Ok(())
    }

    /// Removes everything this gateway wrote, the gateway entry first.
    pub async fn delete_gateway(&mut self) -> Result<(), SyncError> {
        let mut failed = ConfigEntryIndex::new();
        if let Some(gateway) = self.gateway.take() {
            if let Err(e) = self.adapter.delete_entry(&gateway.key(), gateway.namespace()).await {
                warn!("{e}");
                failed.add(gateway);
            }
        }

        let retried = mem::take(&mut self.failed_deletes);
        let routers = mem::take(&mut self.routers).merge(&retried.of_kind(SERVICE_ROUTER_KIND));
        let splitters = mem::take(&mut self.splitters).merge(&retried.of_kind(SERVICE_SPLITTER_KIND));
        let defaults = mem::take(&mut self.defaults).merge(&retried.of_kind(SERVICE_DEFAULTS_KIND));
        self.delete_all(&routers, &mut failed).await;
        self.delete_all(&splitters, &mut failed).await;
        self.delete_all(&defaults, &mut failed).await;
        self.failed_writes.clear();

        if failed.is_empty() {
            info!("Config entries removed");
            Ok(())
        } else {
            Err(SyncError::Incomplete(failed.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::consul::{
        config_entries::{IngressGateway, ServiceDefaults, ServiceRouter, ServiceSplitter, HTTP_PROTOCOL, INGRESS_GATEWAY_KIND},
        test::{Operation, RecordingSyncAdapter},
    };

    fn desired(routers: &[&str], splitters: &[&str]) -> DesiredState {
        let defaults = routers
            .iter()
            .chain(splitters)
            .map(|name| ConfigEntry::ServiceDefaults(ServiceDefaults { name: (*name).to_owned(), protocol: HTTP_PROTOCOL.to_owned(), ..Default::default() }))
            .collect();
        DesiredState {
            gateway: ConfigEntry::IngressGateway(IngressGateway { name: "gw".to_owned(), ..Default::default() }),
            routers: routers.iter().map(|name| ConfigEntry::ServiceRouter(ServiceRouter { name: (*name).to_owned(), ..Default::default() })).collect(),
            splitters: splitters.iter().map(|name| ConfigEntry::ServiceSplitter(ServiceSplitter { name: (*name).to_owned(), ..Default::default() })).collect(),
            defaults,
        }
    }

    fn set(kind: &'static str, name: &str) -> Operation {
        Operation::Set(ConfigEntryKey { kind, name: name.to_owned() })
    }

    fn delete(kind: &'static str, name: &str) -> Operation {
        Operation::Delete(ConfigEntryKey { kind, name: name.to_owned() })
    }

    #[tokio::test]
    async fn apply_writes_before_gateway_and_deletes_after() {
        let adapter = Arc::new(RecordingSyncAdapter::default());
        let mut syncer = ConsulSyncer::new(adapter.clone(), true);

        syncer.apply(desired(&["r1"], &["s1"])).await.unwrap();
        assert_eq!(
            adapter.take_operations(),
            vec![
                set(SERVICE_DEFAULTS_KIND, "r1"),
                set(SERVICE_DEFAULTS_KIND, "s1"),
                set(SERVICE_SPLITTER_KIND, "s1"),
                set(SERVICE_ROUTER_KIND, "r1"),
                set(INGRESS_GATEWAY_KIND, "gw"),
            ]
        );

        syncer.apply(desired(&["r2"], &[])).await.unwrap();
        assert_eq!(
            adapter.take_operations(),
            vec![
                set(SERVICE_DEFAULTS_KIND, "r2"),
                set(SERVICE_ROUTER_KIND, "r2"),
                delete(SERVICE_ROUTER_KIND, "r1"),
                delete(SERVICE_SPLITTER_KIND, "s1"),
                delete(SERVICE_DEFAULTS_KIND, "r1"),
                delete(SERVICE_DEFAULTS_KIND, "s1"),
            ]
        );

        syncer.apply(desired(&["r2"], &[])).await.unwrap();
        assert!(adapter.take_operations().is_empty());
    }

    #[tokio::test]
    async fn failed_writes_are_retried_when_tracking() {
        let adapter = Arc::new(RecordingSyncAdapter::default());
        adapter.fail_on("r1");
        let mut syncer = ConsulSyncer::new(adapter.clone(), true);

        assert_eq!(syncer.apply(desired(&["r1"], &[])).await, Err(SyncError::Incomplete(2)));
        adapter.take_operations();
        adapter.clear_failures();

        syncer.apply(desired(&["r1"], &[])).await.unwrap();
        assert_eq!(adapter.take_operations(), vec![set(SERVICE_DEFAULTS_KIND, "r1"), set(SERVICE_ROUTER_KIND, "r1")]);
    }

    #[tokio::test]
    async fn failed_writes_are_forgotten_without_tracking() {
        let adapter = Arc::new(RecordingSyncAdapter::default());
        adapter.fail_on("r1");
        let mut syncer = ConsulSyncer::new(adapter.clone(), false);

        assert!(syncer.apply(desired(&["r1"], &[])).await.is_err());
        adapter.take_operations();
        adapter.clear_failures();

        syncer.apply(desired(&["r1"], &[])).await.unwrap();
        assert!(adapter.take_operations().is_empty());
    }

    #[tokio::test]
    async fn failed_gateway_write_is_resent_when_tracking() {
        let adapter = Arc::new(RecordingSyncAdapter::default());
        adapter.fail_on("gw");
        let mut syncer = ConsulSyncer::new(adapter.clone(), true);

        assert_eq!(syncer.apply(desired(&["r1"], &[])).await, Err(SyncError::Incomplete(1)));
        adapter.take_operations();
        adapter.clear_failures();

        syncer.apply(desired(&["r1"], &[])).await.unwrap();
        assert_eq!(adapter.take_operations(), vec![set(INGRESS_GATEWAY_KIND, "gw")]);
        assert!(adapter.entry(INGRESS_GATEWAY_KIND, "gw").is_some());

        syncer.apply(desired(&["r1"], &[])).await.unwrap();
        assert!(adapter.take_operations().is_empty());
    }

    #[tokio::test]
    async fn failed_gateway_write_is_forgotten_without_tracking() {
        let adapter = Arc::new(RecordingSyncAdapter::default());
        adapter.fail_on("gw");
        let mut syncer = ConsulSyncer::new(adapter.clone(), false);

        assert!(syncer.apply(desired(&["r1"], &[])).await.is_err());
        adapter.take_operations();
        adapter.clear_failures();

        syncer.apply(desired(&["r1"], &[])).await.unwrap();
        assert!(adapter.take_operations().is_empty());
        assert!(adapter.entry(INGRESS_GATEWAY_KIND, "gw").is_none());
    }

    #[tokio::test]
    async fn failed_deletes_are_retried_when_tracking() {
        let adapter = Arc::new(RecordingSyncAdapter::default());
        let mut syncer = ConsulSyncer::new(adapter.clone(), true);
        syncer.apply(desired(&["r1", "r2"], &[])).await.unwrap();
        adapter.take_operations();

        adapter.fail_on("r1");
        assert_eq!(syncer.apply(desired(&["r2"], &[])).await, Err(SyncError::Incomplete(2)));
        assert_eq!(adapter.take_operations(), vec![delete(SERVICE_ROUTER_KIND, "r1"), delete(SERVICE_DEFAULTS_KIND, "r1")]);
        assert!(adapter.entry(SERVICE_ROUTER_KIND, "r1").is_some());
        adapter.clear_failures();

        syncer.apply(desired(&["r2"], &[])).await.unwrap();
        assert_eq!(adapter.take_operations(), vec![delete(SERVICE_ROUTER_KIND, "r1"), delete(SERVICE_DEFAULTS_KIND, "r1")]);
        assert!(adapter.entry(SERVICE_ROUTER_KIND, "r1").is_none());
        assert!(adapter.entry(SERVICE_DEFAULTS_KIND, "r1").is_none());

        syncer.apply(desired(&["r2"], &[])).await.unwrap();
        assert!(adapter.take_operations().is_empty());
    }

    #[tokio::test]
    async fn failed_deletes_are_forgotten_without_tracking() {
        let adapter = Arc::new(RecordingSyncAdapter::default());
        let mut syncer = ConsulSyncer::new(adapter.clone(), false);
        syncer.apply(desired(&["r1", "r2"], &[])).await.unwrap();

        adapter.fail_on("r1");
        assert!(syncer.apply(desired(&["r2"], &[])).await.is_err());
        adapter.take_operations();
        adapter.clear_failures();

        syncer.apply(desired(&["r2"], &[])).await.unwrap();
        assert!(adapter.take_operations().is_empty());
        assert!(adapter.entry(SERVICE_ROUTER_KIND, "r1").is_some());
    }

    #[tokio::test]
    async fn delete_gateway_removes_gateway_first() {
        let adapter = Arc::new(RecordingSyncAdapter::default());
        let mut syncer = ConsulSyncer::new(adapter.clone(), true);
        syncer.apply(desired(&["r1"], &["s1"])).await.unwrap();
        adapter.take_operations();

        syncer.delete_gateway().await.unwrap();
        assert_eq!(
            adapter.take_operations(),
            vec![
                delete(INGRESS_GATEWAY_KIND, "gw"),
                delete(SERVICE_ROUTER_KIND, "r1"),
                delete(SERVICE_SPLITTER_KIND, "s1"),
                delete(SERVICE_DEFAULTS_KIND, "r1"),
                delete(SERVICE_DEFAULTS_KIND, "s1"),
            ]
        );
    }
}
