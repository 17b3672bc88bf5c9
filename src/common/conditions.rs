use std::borrow::Cow;

use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    chrono::Utc,
};

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

pub const ROUTE_ACCEPTED_MESSAGE: &str = "Route accepted.";

/// A typed condition: one "no error" variant plus the reasons it can fail with.
pub trait StatusCondition {
    fn condition_type(&self) -> &'static str;
    fn status(&self) -> &'static str;
    fn reason(&self) -> &'static str;
    fn message(&self) -> Cow<'_, str>;

    fn to_condition(&self, observed_generation: Option<i64>, now: &Time) -> Condition {
        Condition {
            last_transition_time: now.clone(),
            message: self.message().into_owned(),
            observed_generation,
            reason: self.reason().to_owned(),
            status: self.status().to_owned(),
            type_: self.condition_type().to_owned(),
        }
    }
}

pub fn now() -> Time {
    Time(Utc::now())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ListenerConflicted {
    #[default]
    NoConflicts,
    HostnameConflict(String),
    ProtocolConflict(String),
}

impl ListenerConflicted {
    pub fn has_error(&self) -> bool {
        *self != Self::NoConflicts
    }
}

impl StatusCondition for ListenerConflicted {
    fn condition_type(&self) -> &'static str {
        "Conflicted"
    }

    fn status(&self) -> &'static str {
        if self.has_error() {
            STATUS_TRUE
        } else {
            STATUS_FALSE
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::NoConflicts => "NoConflicts",
            Self::HostnameConflict(_) => "HostnameConflict",
            Self::ProtocolConflict(_) => "ProtocolConflict",
        }
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::NoConflicts => Cow::Borrowed("No conflicts"),
            Self::HostnameConflict(message) | Self::ProtocolConflict(message) => Cow::Borrowed(message),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ListenerDetached {
    #[default]
    Attached,
    PortUnavailable(String),
    UnsupportedExtension(String),
    UnsupportedProtocol(String),
}

impl ListenerDetached {
    pub fn has_error(&self) -> bool {
        *self != Self::Attached
    }
}

impl StatusCondition for ListenerDetached {
    fn condition_type(&self) -> &'static str {
        "Detached"
    }

    fn status(&self) -> &'static str {
        if self.has_error() {
            STATUS_TRUE
        } else {
            STATUS_FALSE
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Attached => "Attached",
            Self::PortUnavailable(_) => "PortUnavailable",
            Self::UnsupportedExtension(_) => "UnsupportedExtension",
            Self::UnsupportedProtocol(_) => "UnsupportedProtocol",
        }
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::Attached => Cow::Borrowed("Listener attached"),
            Self::PortUnavailable(message) | Self::UnsupportedExtension(message) | Self::UnsupportedProtocol(message) => Cow::Borrowed(message),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ListenerReady {
    #[default]
    Ready,
    Invalid(String),
    Pending(String),
}

impl ListenerReady {
    pub fn has_error(&self) -> bool {
        *self != Self::Ready
    }
}

impl StatusCondition for ListenerReady {
    fn condition_type(&self) -> &'static str {
        "Ready"
    }

    fn status(&self) -> &'static str {
        if self.has_error() {
            STATUS_FALSE
        } else {
            STATUS_TRUE
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Invalid(_) => "Invalid",
            Self::Pending(_) => "Pending",
        }
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::Ready => Cow::Borrowed("Listener ready"),
            Self::Invalid(message) | Self::Pending(message) => Cow::Borrowed(message),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ListenerResolvedRefs {
    #[default]
    ResolvedRefs,
    InvalidCertificateRef(String),
    InvalidRouteKinds(String),
    RefNotPermitted(String),
}

impl ListenerResolvedRefs {
    pub fn has_error(&self) -> bool {
        *self != Self::ResolvedRefs
    }
}

impl StatusCondition for ListenerResolvedRefs {
    fn condition_type(&self) -> &'static str {
        "ResolvedRefs"
    }

    fn status(&self) -> &'static str {
        if self.has_error() {
            STATUS_FALSE
        } else {
            STATUS_TRUE
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::ResolvedRefs => "ResolvedRefs",
            Self::InvalidCertificateRef(_) => "InvalidCertificateRef",
            Self::InvalidRouteKinds(_) => "InvalidRouteKinds",
            Self::RefNotPermitted(_) => "RefNotPermitted",
        }
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::ResolvedRefs => Cow::Borrowed("Listener references resolved"),
            Self::InvalidCertificateRef(message) | Self::InvalidRouteKinds(message) | Self::RefNotPermitted(message) => Cow::Borrowed(message),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RouteAccepted {
    #[default]
    Accepted,
    InvalidRouteKind(String),
    ListenerNamespacePolicy(String),
    ListenerHostnameMismatch(String),
    BindError(String),
}

impl StatusCondition for RouteAccepted {
    fn condition_type(&self) -> &'static str {
        "Accepted"
    }

    fn status(&self) -> &'static str {
        if *self == Self::Accepted {
            STATUS_TRUE
        } else {
            STATUS_FALSE
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::InvalidRouteKind(_) => "InvalidRouteKind",
            Self::ListenerNamespacePolicy(_) => "ListenerNamespacePolicy",
            Self::ListenerHostnameMismatch(_) => "ListenerHostnameMismatch",
            Self::BindError(_) => "BindError",
        }
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::Accepted => Cow::Borrowed(ROUTE_ACCEPTED_MESSAGE),
            Self::InvalidRouteKind(message) | Self::ListenerNamespacePolicy(message) | Self::ListenerHostnameMismatch(message) | Self::BindError(message) => {
                Cow::Borrowed(message)
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RouteResolvedRefs {
    #[default]
    ResolvedRefs,
    Errors(String),
    ServiceNotFound(String),
    ConsulServiceNotFound(String),
    RefNotPermitted(String),
    InvalidKind(String),
    BackendNotFound(String),
}

impl StatusCondition for RouteResolvedRefs {
    fn condition_type(&self) -> &'static str {
        "ResolvedRefs"
    }

    fn status(&self) -> &'static str {
        if *self == Self::ResolvedRefs {
            STATUS_TRUE
        } else {
            STATUS_FALSE
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::ResolvedRefs => "ResolvedRefs",
            Self::Errors(_) => "Errors",
            Self::ServiceNotFound(_) => "ServiceNotFound",
            Self::ConsulServiceNotFound(_) => "ConsulServiceNotFound",
            Self::RefNotPermitted(_) => "RefNotPermitted",
            Self::InvalidKind(_) => "InvalidKind",
            Self::BackendNotFound(_) => "BackendNotFound",
        }
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::ResolvedRefs => Cow::Borrowed("References resolved"),
            Self::Errors(message)
            | Self::ServiceNotFound(message)
            | Self::ConsulServiceNotFound(message)
            | Self::RefNotPermitted(message)
            | Self::InvalidKind(message)
            | Self::BackendNotFound(message) => Cow::Borrowed(message),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayScheduled {
    Scheduled,
    NotReconciled(String),
    PodFailed(String),
    Unschedulable(String),
    NoResources(String),
}

impl Default for GatewayScheduled {
    fn default() -> Self {
        Self::NotReconciled("Waiting for controller".to_owned())
    }
}

impl StatusCondition for GatewayScheduled {
    fn condition_type(&self) -> &'static str {
        "Scheduled"
    }

    fn status(&self) -> &'static str {
        match self {
            Self::Scheduled => STATUS_TRUE,
            Self::NotReconciled(_) => STATUS_UNKNOWN,
            _ => STATUS_FALSE,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::NotReconciled(_) => "NotReconciled",
            Self::PodFailed(_) => "PodFailed",
            Self::Unschedulable(_) => "Unschedulable",
            Self::NoResources(_) => "NoResources",
        }
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::Scheduled => Cow::Borrowed("Gateway scheduled"),
            Self::NotReconciled(message) | Self::PodFailed(message) | Self::Unschedulable(message) | Self::NoResources(message) => Cow::Borrowed(message),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GatewayReady {
    #[default]
    Ready,
    ListenersNotValid(String),
    ListenersNotReady(String),
    AddressNotAssigned(String),
}

impl StatusCondition for GatewayReady {
    fn condition_type(&self) -> &'static str {
        "Ready"
    }

    fn status(&self) -> &'static str {
        if *self == Self::Ready {
            STATUS_TRUE
        } else {
            STATUS_FALSE
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::ListenersNotValid(_) => "ListenersNotValid",
            Self::ListenersNotReady(_) => "ListenersNotReady",
            Self::AddressNotAssigned(_) => "AddressNotAssigned",
        }
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::Ready => Cow::Borrowed("Gateway ready"),
            Self::ListenersNotValid(message) | Self::ListenersNotReady(message) | Self::AddressNotAssigned(message) => Cow::Borrowed(message),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GatewayInSync {
    #[default]
    InSync,
    SyncError(String),
}

impl StatusCondition for GatewayInSync {
    fn condition_type(&self) -> &'static str {
        "InSync"
    }

    fn status(&self) -> &'static str {
        if *self == Self::InSync {
            STATUS_TRUE
        } else {
            STATUS_FALSE
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::InSync => "InSync",
            Self::SyncError(_) => "SyncError",
        }
    }

    fn message(&self) -> Cow<'_, str> {
        match self {
            Self::InSync => Cow::Borrowed("Gateway in sync"),
            Self::SyncError(message) => Cow::Borrowed(message),
        }
    }
}

fn same_condition(this: &Condition, other: &Condition) -> bool {
    this.type_ == other.type_
        && this.status == other.status
        && this.reason == other.reason
        && this.message == other.message
        && this.observed_generation == other.observed_generation
}

/// Orders conditions by their content so equal states serialize identically.
pub fn sort_conditions(conditions: &mut [Condition]) {
    conditions.sort_by(|this, other| {
        (&this.type_, &this.status, &this.reason, &this.message).cmp(&(&other.type_, &other.status, &other.reason, &other.message))
    });
}

/// Keeps the previous transition time for every condition that did not change.
pub fn carry_transition_times(conditions: &mut [Condition], prior: &[Condition]) {
    for condition in conditions {
        if let Some(previous) = prior.iter().find(|previous| same_condition(condition, previous)) {
            condition.last_transition_time = previous.last_transition_time.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn route_accepted_uses_literal_message() {
        let time = Time(Utc.timestamp_opt(0, 0).single().unwrap_or_default());
        let condition = RouteAccepted::Accepted.to_condition(Some(3), &time);
        assert_eq!(condition.type_, "Accepted");
        assert_eq!(condition.status, STATUS_TRUE);
        assert_eq!(condition.reason, "Accepted");
        assert_eq!(condition.message, "Route accepted.");
        assert_eq!(condition.observed_generation, Some(3));
    }

    #[test]
    fn error_conditions_flip_status() {
        assert_eq!(ListenerConflicted::ProtocolConflict("x".to_owned()).status(), STATUS_TRUE);
        assert_eq!(ListenerConflicted::NoConflicts.status(), STATUS_FALSE);
        assert_eq!(ListenerDetached::UnsupportedProtocol("x".to_owned()).status(), STATUS_TRUE);
        assert_eq!(ListenerReady::Invalid("x".to_owned()).status(), STATUS_FALSE);
        assert_eq!(ListenerResolvedRefs::InvalidRouteKinds("x".to_owned()).reason(), "InvalidRouteKinds");
        assert_eq!(GatewayScheduled::default().status(), STATUS_UNKNOWN);
        assert_eq!(RouteResolvedRefs::Errors("x".to_owned()).status(), STATUS_FALSE);
    }

    #[test]
    fn transition_times_survive_unchanged_conditions() {
        let old = Time(Utc.timestamp_opt(10, 0).single().unwrap_or_default());
        let new = Time(Utc.timestamp_opt(20, 0).single().unwrap_or_default());
        let prior = vec![GatewayReady::Ready.to_condition(Some(1), &old), GatewayInSync::InSync.to_condition(Some(1), &old)];
        let mut conditions =
            vec![GatewayReady::Ready.to_condition(Some(1), &new), GatewayInSync::SyncError("boom".to_owned()).to_condition(Some(1), &new)];
        carry_transition_times(&mut conditions, &prior);
        assert_eq!(conditions[0].last_transition_time, old);
        assert_eq!(conditions[1].last_transition_time, new);
    }
}
