use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use typed_builder::TypedBuilder;

use crate::common::{
    carry_transition_times, sort_conditions, Gateway, GatewayInSync, GatewayReady, GatewayScheduled, GatewayStatus, ListenerReady, ListenerStatus,
    ResolvedListener, StatusCondition,
};

fn canonical_status(mut status: GatewayStatus) -> GatewayStatus {
    sort_conditions(&mut status.conditions);
    for listener in &mut status.listeners {
        sort_conditions(&mut listener.conditions);
    }
    status.listeners.sort_by(|this, other| this.name.cmp(&other.name));
    status
}

/// Builds the status document of a gateway from the listeners validated in one pass.
#[derive(TypedBuilder)]
pub struct GatewayStatusBuilder<'a> {
    gateway: &'a Gateway,
    listeners: &'a [ResolvedListener],
    #[builder(default)]
    scheduled: Option<&'a Condition>,
    in_sync: &'a GatewayInSync,
    now: &'a Time,
}

impl GatewayStatusBuilder<'_> {
    fn ready(&self, addresses_assigned: bool) -> GatewayReady {
        let invalid = self
            .listeners
            .iter()
            .filter(|listener| {
                let conditions = &listener.conditions;
                conditions.conflicted.has_error()
                    || conditions.detached.has_error()
                    || conditions.resolved_refs.has_error()
                    || matches!(conditions.ready, ListenerReady::Invalid(_))
            })
            .map(ResolvedListener::name)
            .collect::<Vec<_>>();
        if !invalid.is_empty() {
            return GatewayReady::ListenersNotValid(format!("Invalid listeners: {}", invalid.join(", ")));
        }

        let pending = self.listeners.iter().filter(|listener| matches!(listener.conditions.ready, ListenerReady::Pending(_))).map(ResolvedListener::name).collect::<Vec<_>>();
        if !pending.is_empty() {
            return GatewayReady::ListenersNotReady(format!("Listeners not ready: {}", pending.join(", ")));
        }

        if !addresses_assigned {
            return GatewayReady::AddressNotAssigned("No addresses have been assigned to the gateway".to_owned());
        }
        GatewayReady::Ready
    }

    fn scheduled(&self, generation: Option<i64>) -> Condition {
        match self.scheduled {
            Some(condition) => Condition { observed_generation: generation, ..condition.clone() },
            None => GatewayScheduled::default().to_condition(generation, self.now),
        }
    }

    /// Returns the new status and whether it differs from the persisted one.
    pub fn status(&self) -> (GatewayStatus, bool) {
        let generation = self.gateway.generation();
        let prior = canonical_status(self.gateway.status.clone());
        let addresses = prior.addresses.clone();

        let mut conditions =
            vec![self.scheduled(generation), self.ready(!addresses.is_empty()).to_condition(generation, self.now), self.in_sync.to_condition(generation, self.now)];
        carry_transition_times(&mut conditions, &prior.conditions);

        let listeners = self
            .listeners
            .iter()
            .map(|listener| {
                let mut conditions = listener.conditions.to_conditions(generation, self.now);
                if let Some(previous) = prior.listeners.iter().find(|status| status.name == listener.name()) {
                    carry_transition_times(&mut conditions, &previous.conditions);
                }
                ListenerStatus {
                    name: listener.name().to_owned(),
                    supported_kinds: listener.supported_kinds.clone(),
                    attached_routes: i32::try_from(listener.bound_routes).unwrap_or(i32::MAX),
                    conditions,
                }
            })
            .collect();

        let status = canonical_status(GatewayStatus { addresses, conditions, listeners });
        let changed = status != prior;
        (status, changed)
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::chrono::{TimeZone, Utc};

    use super::*;
    use crate::common::{test, ListenerConflicted, STATUS_TRUE, STATUS_UNKNOWN};

    fn time(seconds: i64) -> Time {
        Time(Utc.timestamp_opt(seconds, 0).single().unwrap())
    }

    fn condition<'a>(status: &'a GatewayStatus, type_: &str) -> &'a Condition {
        status.conditions.iter().find(|condition| condition.type_ == type_).unwrap()
    }

    #[test]
    fn healthy_gateway_is_ready() {
        let gateway = test::http_gateway();
        let mut listeners = gateway.spec.listeners.iter().cloned().map(ResolvedListener::new).collect::<Vec<_>>();
        listeners[0].bound_routes = 2;
        let now = time(10);
        let (status, changed) = GatewayStatusBuilder::builder().gateway(&gateway).listeners(&listeners).in_sync(&GatewayInSync::InSync).now(&now).build().status();

        assert!(changed);
        assert_eq!(condition(&status, "Ready").status, STATUS_TRUE);
        assert_eq!(condition(&status, "Scheduled").status, STATUS_UNKNOWN);
        assert_eq!(condition(&status, "InSync").status, STATUS_TRUE);
        assert_eq!(status.listeners[0].attached_routes, 2);
        assert_eq!(status.listeners[0].conditions.len(), 4);
        assert_eq!(status.addresses, gateway.status.addresses);
    }

    #[test]
    fn conflicting_listener_is_not_valid() {
        let gateway = test::http_gateway();
        let mut listeners = gateway.spec.listeners.iter().cloned().map(ResolvedListener::new).collect::<Vec<_>>();
        listeners[0].conditions.conflicted = ListenerConflicted::ProtocolConflict("conflict".to_owned());
        let now = time(10);
        let in_sync = GatewayInSync::SyncError("consul unavailable".to_owned());
        let (status, _) = GatewayStatusBuilder::builder().gateway(&gateway).listeners(&listeners).in_sync(&in_sync).now(&now).build().status();

        assert_eq!(condition(&status, "Ready").reason, "ListenersNotValid");
        assert_eq!(condition(&status, "InSync").reason, "SyncError");
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let mut gateway = test::http_gateway();
        let listeners = gateway.spec.listeners.iter().cloned().map(ResolvedListener::new).collect::<Vec<_>>();
        let scheduled = GatewayScheduled::Scheduled.to_condition(Some(7), &time(1));
        let first = time(10);
        let (status, _) =
            GatewayStatusBuilder::builder().gateway(&gateway).listeners(&listeners).scheduled(Some(&scheduled)).in_sync(&GatewayInSync::InSync).now(&first).build().status();
        assert_eq!(condition(&status, "Scheduled").observed_generation, gateway.generation());
        gateway.status = status.clone();

        let later = time(20);
        let (again, changed) =
            GatewayStatusBuilder::builder().gateway(&gateway).listeners(&listeners).scheduled(Some(&scheduled)).in_sync(&GatewayInSync::InSync).now(&later).build().status();
        assert!(!changed);
        assert_eq!(again, status);
    }
}
