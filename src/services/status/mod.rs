mod gateway_status;
mod pod_tracker;
mod route_status;

pub use gateway_status::GatewayStatusBuilder;
pub use pod_tracker::{owning_gateway, pod_conditions, scheduled, PodStatusTracker, TrackedPodStatus, GATEWAY_NAME_LABEL};
pub use route_status::{ParentOutcome, RouteStatusMerger, RouteStatuses};
