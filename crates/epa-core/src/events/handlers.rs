// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

use epa_graph::NodeIndex;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{EventAction, EventDomain, EventOp};
use crate::error::EpaError;
use crate::kind::ResourceKind;
use crate::sync::VirtualSync;

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Resource id in `payload`: `payload[key].id`, else `payload[key_id]`.
pub fn payload_id<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    non_empty(payload.get(key).and_then(|nested| nested.get("id")))
        .or_else(|| non_empty(payload.get(format!("{key}_id").as_str())))
}

/// Stack id: the last `/` segment of `stack_identity`.
pub fn stack_id(payload: &Value) -> Option<&str> {
    non_empty(payload.get("stack_identity"))
        .and_then(|identity| identity.rsplit('/').next())
        .filter(|id| !id.is_empty())
}

/// Applies [`EventAction`]s by re-reading the affected resource from the
/// inventory source.
#[derive(Clone)]
pub struct EventHandlers {
    sync: VirtualSync,
}

impl EventHandlers {
    /// Handlers writing through `sync`.
    pub fn new(sync: VirtualSync) -> Self {
        Self { sync }
    }

    /// Apply `action` to the resource named in `payload`.
    #[instrument(skip(self, payload))]
    pub async fn handle(&self, action: EventAction, payload: &Value) -> Result<(), EpaError> {
        let id = match action.domain {
            EventDomain::Stack => stack_id(payload),
            domain => payload_id(payload, domain.payload_key()),
        }
        .ok_or_else(|| {
            EpaError::InvalidRequest(format!(
                "{:?} event without a {} id",
                action.domain,
                action.domain.payload_key()
            ))
        })?;
        let sync = &self.sync;
        let store = sync.store();
        let update = action.op == EventOp::Update;

        match (action.domain, action.op) {
            (domain, EventOp::Delete)
                if !matches!(domain, EventDomain::Router | EventDomain::RouterInterface) =>
            {
                store.remove(&NodeIndex::virtual_resource(id)).await?;
                if action.domain == EventDomain::Instance {
                    self.refresh_hypervisor(payload).await?;
                }
            }
            (EventDomain::Instance, _) => {
                sync.add_instances(Some(id), update).await?;
                self.refresh_hypervisor(payload).await?;
            }
            (EventDomain::FloatingIp, _) => {
                sync.add_floating_ips(Some(id), update).await?;
            }
            (EventDomain::Port, EventOp::Create) => {
                sync.add_ports(Some(id), false).await?;
                let port = store.graph().get(&NodeIndex::virtual_resource(id)).await?;
                if let Some(net) = port.as_ref().and_then(|p| p.attribute_str("network_id")) {
                    sync.add_networks(Some(net), true).await?;
                }
            }
            (EventDomain::Port, _) => {
                sync.add_ports(Some(id), true).await?;
            }
            (EventDomain::Router, EventOp::Create) => {
                sync.add_routers(Some(id), false).await?;
            }
            (EventDomain::Router, EventOp::Delete) => {
                self.drop_router(id).await?;
            }
            (EventDomain::Router | EventDomain::RouterInterface, _) => {
                self.drop_router(id).await?;
                sync.add_routers(Some(id), false).await?;
            }
            (EventDomain::Network, _) => {
                sync.add_networks(Some(id), update).await?;
            }
            (EventDomain::Volume, EventOp::Create) => {
                sync.add_volumes(Some(id), false).await?;
            }
            (EventDomain::Volume, _) => {
                let index = NodeIndex::virtual_resource(id);
                let stack = store.get_stack(&index).await?;
                store.remove(&index).await?;
                sync.add_volumes(Some(id), false).await?;
                if let Some(stack) = stack {
                    sync.add_stacks(Some(stack.identifier()), false).await?;
                }
            }
            (EventDomain::Snapshot, EventOp::Create) => {
                sync.add_snapshots(Some(id), false).await?;
            }
            (EventDomain::Snapshot, _) => {
                store.remove(&NodeIndex::virtual_resource(id)).await?;
                sync.add_snapshots(Some(id), false).await?;
            }
            (EventDomain::Stack, EventOp::Create) => {
                sync.add_stacks(Some(id), false).await?;
            }
            (EventDomain::Stack, _) => {
                store.remove(&NodeIndex::virtual_resource(id)).await?;
                sync.add_stacks(Some(id), false).await?;
            }
        }
        debug!(id, "event applied");
        Ok(())
    }

    async fn drop_router(&self, id: &str) -> Result<(), EpaError> {
        let store = self.sync.store();
        let index = NodeIndex::virtual_resource(id);
        store
            .remove_neighbours(&index, Some(ResourceKind::Port.as_str()))
            .await?;
        store.remove(&index).await?;
        Ok(())
    }

    async fn refresh_hypervisor(&self, payload: &Value) -> Result<(), EpaError> {
        if let Some(host) = non_empty(payload.get("host")) {
            self.sync.add_hypervisors(Some(host)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_come_from_nested_or_flat_keys() {
        assert_eq!(
            payload_id(&json!({"port": {"id": "p1"}}), "port"),
            Some("p1")
        );
        assert_eq!(payload_id(&json!({"port_id": "p2"}), "port"), Some("p2"));
        assert_eq!(
            payload_id(&json!({"instance_id": "vm-1", "host": "cn1"}), "instance"),
            Some("vm-1")
        );
        assert_eq!(payload_id(&json!({"port": {"id": ""}}), "port"), None);
        assert_eq!(payload_id(&json!({}), "port"), None);
    }

    #[test]
    fn stack_id_is_last_identity_segment() {
        let payload = json!({
            "stack_identity": "arn:openstack:heat::t1:stacks/web/5b4c-11e5"
        });
        assert_eq!(stack_id(&payload), Some("5b4c-11e5"));
        assert_eq!(stack_id(&json!({"stack_identity": "plain"})), Some("plain"));
        assert_eq!(stack_id(&json!({"stack_identity": "trailing/"})), None);
    }
}
