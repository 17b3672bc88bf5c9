use async_trait::async_trait;
use tracing::info;

use super::{ConfigEntry, ConfigEntryKey, SyncAdapter, SyncAdapterError};

/// Prints every entry instead of writing it anywhere.
#[derive(Clone, Debug, Default)]
pub struct LoggingSyncAdapter;

#[async_trait]
impl SyncAdapter for LoggingSyncAdapter {
    async fn set_entry(&self, entry: &ConfigEntry) -> Result<(), SyncAdapterError> {
        let json = serde_json::to_string_pretty(entry).map_err(|e| SyncAdapterError::Write(entry.key(), e.to_string()))?;
        info!("set {}\n{json}", entry.key());
        Ok(())
    }

    async fn delete_entry(&self, key: &ConfigEntryKey, namespace: Option<&str>) -> Result<(), SyncAdapterError> {
        info!("delete {key} namespace={}", namespace.unwrap_or_default());
        Ok(())
    }
}
