use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use k8s_openapi::{
    api::core::v1::{Pod, PodCondition},
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
};
use tracing::debug;

use crate::{
    common::{now, GatewayScheduled, ResourceKey, StatusCondition, DEFAULT_NAMESPACE_NAME},
    state::StoreError,
};

/// Label the data plane deployment puts on every gateway pod.
pub const GATEWAY_NAME_LABEL: &str = "gateway.networking.k8s.io/gateway-name";

const POD_READY_CONDITION: &str = "Ready";
const POD_SCHEDULED_CONDITION: &str = "PodScheduled";

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedPodStatus {
    pub created_at: Time,
    pub generation: i64,
    pub conditions: Vec<Condition>,
}

fn conditions_differ(this: &[Condition], other: &[Condition]) -> bool {
    this.len() != other.len()
        || this
            .iter()
            .zip(other)
            .any(|(this, other)| this.type_ != other.type_ || this.status != other.status || this.reason != other.reason)
}

/// Latest pod-derived conditions per gateway, guarding against stale or reordered updates.
#[derive(Clone, Default)]
pub struct PodStatusTracker {
    records: Arc<Mutex<HashMap<ResourceKey, TrackedPodStatus>>>,
}

impl PodStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the update replaced the tracked record.
    pub fn update_status(&self, gateway: &ResourceKey, generation: i64, created_at: Time, conditions: Vec<Condition>) -> Result<bool, StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::LockingError)?;
        let accept = match records.get(gateway) {
            None => true,
            Some(tracked) if created_at < tracked.created_at => false,
            Some(tracked) if generation < tracked.generation => false,
            Some(tracked) => created_at > tracked.created_at || conditions_differ(&conditions, &tracked.conditions),
        };
        if accept {
            records.insert(gateway.clone(), TrackedPodStatus { created_at, generation, conditions });
        } else {
            debug!("Discarding stale pod status for {gateway} generation {generation}");
        }
        Ok(accept)
    }

    pub fn delete_status(&self, gateway: &ResourceKey) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::LockingError)?;
        records.remove(gateway);
        Ok(())
    }

    pub fn conditions(&self, gateway: &ResourceKey) -> Result<Option<Vec<Condition>>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::LockingError)?;
        Ok(records.get(gateway).map(|tracked| tracked.conditions.clone()))
    }

    pub fn scheduled_condition(&self, gateway: &ResourceKey) -> Result<Option<Condition>, StoreError> {
        let conditions = self.conditions(gateway)?;
        Ok(conditions.and_then(|conditions| conditions.into_iter().find(|condition| condition.type_ == "Scheduled")))
    }

    /// Feeds a pod observation into the tracker; returns the owning gateway when its record changed.
    pub fn update_pod(&self, pod: &Pod) -> Result<Option<ResourceKey>, StoreError> {
        let Some(gateway) = owning_gateway(pod) else {
            return Ok(None);
        };
        let generation = pod.metadata.generation.unwrap_or_default();
        let created_at = pod.metadata.creation_timestamp.clone().unwrap_or_else(now);
        let changed = self.update_status(&gateway, generation, created_at, pod_conditions(pod, &now()))?;
        Ok(changed.then_some(gateway))
    }
}

pub fn owning_gateway(pod: &Pod) -> Option<ResourceKey> {
    let name = pod.metadata.labels.as_ref()?.get(GATEWAY_NAME_LABEL)?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE_NAME);
    Some(ResourceKey::namespaced(name, namespace))
}

fn pod_condition<'a>(pod: &'a Pod, type_: &str) -> Option<&'a PodCondition> {
    pod.status.as_ref()?.conditions.as_ref()?.iter().find(|condition| condition.type_ == type_)
}

/// Maps the pod lifecycle onto the gateway Scheduled condition.
pub fn scheduled(pod: &Pod) -> GatewayScheduled {
    let phase = pod.status.as_ref().and_then(|status| status.phase.as_deref());
    match phase {
        Some("Pending") => match pod_condition(pod, POD_SCHEDULED_CONDITION) {
            Some(condition) if condition.status == "False" && condition.reason.as_deref() == Some("Unschedulable") => {
                let message = condition.message.clone().unwrap_or_default();
                if message.contains("Insufficient") {
                    GatewayScheduled::NoResources(message)
                } else {
                    GatewayScheduled::Unschedulable(message)
                }
            },
            _ => GatewayScheduled::NotReconciled("Pod is pending".to_owned()),
        },
        Some("Running") => GatewayScheduled::Scheduled,
        Some("Succeeded") => GatewayScheduled::PodFailed("Pod exited unexpectedly".to_owned()),
        Some("Failed") => {
            let message = pod.status.as_ref().and_then(|status| status.message.clone()).unwrap_or_else(|| "Pod failed".to_owned());
            GatewayScheduled::PodFailed(message)
        },
        _ => GatewayScheduled::NotReconciled("Pod status is unknown".to_owned()),
    }
}

pub fn pod_conditions(pod: &Pod, now: &Time) -> Vec<Condition> {
    let generation = pod.metadata.generation;
    let mut conditions = vec![scheduled(pod).to_condition(generation, now)];
    if let Some(ready) = pod_condition(pod, POD_READY_CONDITION) {
        conditions.push(Condition {
            last_transition_time: ready.last_transition_time.clone().unwrap_or_else(|| now.clone()),
            message: ready.message.clone().unwrap_or_default(),
            observed_generation: generation,
            reason: ready.reason.clone().unwrap_or_else(|| POD_READY_CONDITION.to_owned()),
            status: ready.status.clone(),
            type_: POD_READY_CONDITION.to_owned(),
        });
    }
    conditions
}

#[cfg(test)]
mod tests {
    use k8s_openapi::chrono::{TimeZone, Utc};

    use super::*;
    use crate::common::STATUS_TRUE;

    fn time(seconds: i64) -> Time {
        Time(Utc.timestamp_opt(seconds, 0).single().unwrap())
    }

    fn conditions(scheduled: GatewayScheduled) -> Vec<Condition> {
        vec![scheduled.to_condition(None, &time(0))]
    }

    #[test]
    fn stale_updates_are_rejected() {
        let tracker = PodStatusTracker::new();
        let gateway = ResourceKey::namespaced("gw", "default");

        assert!(tracker.update_status(&gateway, 2, time(100), conditions(GatewayScheduled::default())).unwrap());
        // older pod
        assert!(!tracker.update_status(&gateway, 3, time(50), conditions(GatewayScheduled::Scheduled)).unwrap());
        // older generation
        assert!(!tracker.update_status(&gateway, 1, time(100), conditions(GatewayScheduled::Scheduled)).unwrap());
        // same pod, nothing new
        assert!(!tracker.update_status(&gateway, 2, time(100), conditions(GatewayScheduled::default())).unwrap());
        // same pod, conditions moved on
        assert!(tracker.update_status(&gateway, 2, time(100), conditions(GatewayScheduled::Scheduled)).unwrap());
        // newer pod always wins
        assert!(tracker.update_status(&gateway, 2, time(200), conditions(GatewayScheduled::Scheduled)).unwrap());

        let scheduled = tracker.scheduled_condition(&gateway).unwrap().unwrap();
        assert_eq!(scheduled.status, STATUS_TRUE);

        tracker.delete_status(&gateway).unwrap();
        assert!(tracker.conditions(&gateway).unwrap().is_none());
    }

    #[test]
    fn pods_map_to_scheduled_conditions() {
        let pod: Pod = serde_yaml::from_str(
            r"
apiVersion: v1
kind: Pod
metadata:
  name: gw-abc
  namespace: default
  labels:
    gateway.networking.k8s.io/gateway-name: gw
status:
  phase: Pending
  conditions:
    - type: PodScheduled
      status: 'False'
      reason: Unschedulable
      message: '0/3 nodes are available: 3 Insufficient cpu.'
",
        )
        .unwrap();
        assert_eq!(scheduled(&pod), GatewayScheduled::NoResources("0/3 nodes are available: 3 Insufficient cpu.".to_owned()));
        assert_eq!(owning_gateway(&pod), Some(ResourceKey::namespaced("gw", "default")));

        let tracker = PodStatusTracker::new();
        assert_eq!(tracker.update_pod(&pod).unwrap(), Some(ResourceKey::namespaced("gw", "default")));

        let running: Pod = serde_yaml::from_str(
            r"
apiVersion: v1
kind: Pod
metadata:
  name: gw-abc
status:
  phase: Running
  conditions:
    - type: Ready
      status: 'True'
",
        )
        .unwrap();
        assert_eq!(scheduled(&running), GatewayScheduled::Scheduled);
        assert_eq!(pod_conditions(&running, &time(0)).len(), 2);
        assert_eq!(tracker.update_pod(&running).unwrap(), None);
    }
}
