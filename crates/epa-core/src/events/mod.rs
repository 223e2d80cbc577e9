// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Control-plane notification dispatch.
//!
//! A [`DispatchTable`] built at startup maps `event_type` strings to an
//! [`EventAction`]; [`EventHandlers`] applies an action to a payload and
//! [`NotificationConsumer`] drives both from a channel.

mod consumer;
mod handlers;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use consumer::{AgentConsumer, AgentEvent, NotificationConsumer, Outcome, AGENTS_NEW};
pub use handlers::{payload_id, stack_id, EventHandlers};

/// One notification from the control plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Dot-delimited event type (`port.create.end`).
    pub event_type: String,
    /// Domain-specific body.
    #[serde(default)]
    pub payload: Value,
}

impl Notification {
    /// Notification of `event_type` carrying `payload`.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Resource family an event is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventDomain {
    /// Compute instance.
    Instance,
    /// Floating IP.
    FloatingIp,
    /// Network port.
    Port,
    /// Router.
    Router,
    /// Router interface add/remove.
    RouterInterface,
    /// Network.
    Network,
    /// Block volume.
    Volume,
    /// Volume snapshot.
    Snapshot,
    /// Orchestration stack.
    Stack,
}

impl EventDomain {
    /// Payload key carrying the resource id (`<key>.id` or `<key>_id`).
    pub const fn payload_key(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::FloatingIp => "floatingip",
            Self::Port => "port",
            Self::Router => "router",
            Self::RouterInterface => "router_interface",
            Self::Network => "network",
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
            Self::Stack => "stack",
        }
    }
}

/// What happened to the resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventOp {
    /// Created.
    Create,
    /// Changed.
    Update,
    /// Removed.
    Delete,
}

/// Handling for one event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventAction {
    /// Resource family.
    pub domain: EventDomain,
    /// Change.
    pub op: EventOp,
}

impl EventAction {
    /// `op` on `domain`.
    pub const fn new(domain: EventDomain, op: EventOp) -> Self {
        Self { domain, op }
    }
}

/// `event_type` -> action.
#[derive(Clone, Debug, Default)]
pub struct DispatchTable {
    actions: BTreeMap<String, EventAction>,
}

impl DispatchTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event type the controller reacts to.
    pub fn standard() -> Self {
        use EventDomain as D;
        use EventOp::{Create, Delete, Update};

        let mut table = Self::new();
        table.register(D::Instance, Create, &["compute.instance.create.end"]);
        table.register(
            D::Instance,
            Update,
            &[
                "compute.instance.resize.revert.end",
                "compute.instance.finish_resize.end",
                "compute.instance.rebuild.end",
                "compute.instance.update",
                "compute.instance.exists",
            ],
        );
        table.register(D::Instance, Delete, &["compute.instance.delete.end"]);
        for (domain, prefix) in [
            (D::FloatingIp, "floatingip"),
            (D::Port, "port"),
            (D::Router, "router"),
            (D::Network, "network"),
        ] {
            table.register(domain, Create, &[format!("{prefix}.create.end").as_str()]);
            table.register(domain, Update, &[format!("{prefix}.update.end").as_str()]);
            table.register(domain, Delete, &[format!("{prefix}.delete.end").as_str()]);
        }
        table.register(
            D::RouterInterface,
            Update,
            &["router.interface.create", "router.interface.delete"],
        );
        table.register(D::Volume, Create, &["volume.create.end"]);
        table.register(
            D::Volume,
            Update,
            &[
                "volume.update.end",
                "volume.resize.end",
                "volume.attach.end",
                "volume.detach.end",
            ],
        );
        table.register(D::Volume, Delete, &["volume.delete.end"]);
        table.register(D::Snapshot, Create, &["snapshot.create.end"]);
        table.register(D::Snapshot, Update, &["snapshot.update.end"]);
        table.register(D::Snapshot, Delete, &["snapshot.delete.end"]);
        table.register(D::Stack, Create, &["orchestration.stack.create.end"]);
        table.register(
            D::Stack,
            Update,
            &[
                "orchestration.stack.update.end",
                "orchestration.stack.resume.end",
                "orchestration.stack.suspend.end",
            ],
        );
        table.register(D::Stack, Delete, &["orchestration.stack.delete.end"]);
        table
    }

    /// Map each of `event_types` to `op` on `domain`.
    pub fn register(&mut self, domain: EventDomain, op: EventOp, event_types: &[&str]) {
        for event_type in event_types {
            self.actions
                .insert((*event_type).to_owned(), EventAction::new(domain, op));
        }
    }

    /// Action for `event_type`.
    pub fn get(&self, event_type: &str) -> Option<EventAction> {
        self.actions.get(event_type).copied()
    }

    /// Number of registered event types.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Registered event types.
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_covers_every_domain() {
        let table = DispatchTable::standard();
        assert_eq!(table.len(), 35);
        assert_eq!(
            table.get("router.interface.delete"),
            Some(EventAction::new(EventDomain::RouterInterface, EventOp::Update))
        );
        assert_eq!(
            table.get("compute.instance.exists"),
            Some(EventAction::new(EventDomain::Instance, EventOp::Update))
        );
        assert_eq!(
            table.get("floatingip.delete.end"),
            Some(EventAction::new(EventDomain::FloatingIp, EventOp::Delete))
        );
        assert!(table.get("identity.project.created").is_none());
    }
}
