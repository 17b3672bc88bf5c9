use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use typed_builder::TypedBuilder;

use crate::{
    common::{
        carry_transition_times, sort_conditions, ParentReference, ResourceKey, Route, RouteAccepted, RouteParentStatus, RouteRefKey, RouteResolvedRefs, RouteStatus,
        StatusCondition,
    },
    controllers::utils::BindOutcome,
};

/// Outcome of one pass for one parent reference.
#[derive(Clone, Debug, PartialEq)]
pub struct ParentOutcome {
    pub parent_ref: ParentReference,
    pub generation: Option<i64>,
    pub accepted: RouteAccepted,
    pub resolved_refs: RouteResolvedRefs,
}

/// Per-route outcomes computed during one pass, keyed by canonical parent identity.
#[derive(Clone, Debug, Default)]
pub struct RouteStatuses {
    routes: BTreeMap<ResourceKey, BTreeMap<(String, Option<i32>), ParentOutcome>>,
}

impl RouteStatuses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, outcome: BindOutcome) {
        let parent_key = RouteRefKey::from((&outcome.parent_ref, outcome.route.namespace.as_str()));
        self.routes.entry(outcome.route).or_default().insert(
            (parent_key.canonical(), parent_key.port),
            ParentOutcome { parent_ref: outcome.parent_ref, generation: outcome.generation, accepted: outcome.accepted, resolved_refs: outcome.resolved_refs },
        );
    }

    pub fn outcomes(&self, route: &ResourceKey) -> Vec<&ParentOutcome> {
        self.routes.get(route).map(|outcomes| outcomes.values().collect()).unwrap_or_default()
    }

    pub fn routes(&self) -> impl Iterator<Item = &ResourceKey> {
        self.routes.keys()
    }
}

fn parent_sort_key(parent: &RouteParentStatus, route_namespace: &str) -> (String, Option<i32>, String) {
    let parent_key = RouteRefKey::from((&parent.parent_ref, route_namespace));
    (parent_key.canonical(), parent_key.port, parent.controller_name.clone())
}

fn canonical_status(mut status: RouteStatus, route_namespace: &str) -> RouteStatus {
    for parent in &mut status.parents {
        sort_conditions(&mut parent.conditions);
    }
    status.parents.sort_by_key(|parent| parent_sort_key(parent, route_namespace));
    status
}

/// Merges this controller's outcomes for one gateway into a route's persisted status.
#[derive(TypedBuilder)]
pub struct RouteStatusMerger<'a> {
    controller_name: &'a str,
    gateway_key: &'a ResourceKey,
    now: &'a Time,
}

impl RouteStatusMerger<'_> {
    /// Returns the new status and whether it differs from what the route carries.
    pub fn merge(&self, route: &Route, outcomes: &[&ParentOutcome]) -> (RouteStatus, bool) {
        let route_namespace = route.namespace();
        let prior = canonical_status(route.status().clone(), route_namespace);
        let listed = route.parent_refs().iter().map(|parent_ref| RouteRefKey::from((parent_ref, route_namespace))).collect::<Vec<_>>();

        let mut parents = prior
            .parents
            .iter()
            .filter(|parent| {
                if parent.controller_name != self.controller_name {
                    return true;
                }
                let parent_key = RouteRefKey::from((&parent.parent_ref, route_namespace));
                !parent_key.targets(self.gateway_key) && listed.contains(&parent_key)
            })
            .cloned()
            .collect::<Vec<_>>();

        for outcome in outcomes {
            let mut conditions =
                vec![outcome.accepted.to_condition(outcome.generation, self.now), outcome.resolved_refs.to_condition(outcome.generation, self.now)];
            let parent_key = RouteRefKey::from((&outcome.parent_ref, route_namespace));
            if let Some(previous) = prior
                .parents
                .iter()
                .find(|parent| parent.controller_name == self.controller_name && RouteRefKey::from((&parent.parent_ref, route_namespace)) == parent_key)
            {
                carry_transition_times(&mut conditions, &previous.conditions);
            }
            parents.push(RouteParentStatus { parent_ref: outcome.parent_ref.clone(), controller_name: self.controller_name.to_owned(), conditions });
        }

        let status = canonical_status(RouteStatus { parents }, route_namespace);
        let changed = status != prior;
        (status, changed)
    }
}
