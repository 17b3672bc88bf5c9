mod config_entries;
mod dry_run;
mod index;
mod resource_generator;
mod syncer;

pub use config_entries::{
    ConfigEntry, ConfigEntryKey, GatewayTlsConfig, GatewayTlsSdsConfig, HttpHeaderModifiers, IngressGateway, IngressListener, IngressService, ServiceDefaults,
    ServiceRoute, ServiceRouteDestination, ServiceRouteHttpMatch, ServiceRouteMatch, ServiceRouter, ServiceSplit, ServiceSplitter, HTTP_PROTOCOL,
    INGRESS_GATEWAY_KIND, SERVICE_DEFAULTS_KIND, SERVICE_ROUTER_KIND, SERVICE_SPLITTER_KIND, TCP_PROTOCOL,
};
pub use dry_run::LoggingSyncAdapter;
pub use index::ConfigEntryIndex;
pub use resource_generator::{router_name, splitter_name, DesiredState, ResourceGenerator, SynthesisError};
pub use syncer::{ConsulSyncer, SyncAdapter, SyncAdapterError, SyncError};
