pub mod gateway_manager;
pub mod status;

pub use gateway_manager::{GatewayManager, GatewayReconcilerFactory, Reconcile, ReconcileError, ReconcilerFactory};
