// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted SDN controller.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use epa_core::sdn::{inventory_path, SdnEndpoint, TopologyFetcher, HOST_PREFIX, TOPOLOGY_PATH};
use epa_core::SdnError;
use serde_json::{json, Value};

/// Endpoint whose URL nothing listens on.
pub fn test_endpoint() -> SdnEndpoint {
    SdnEndpoint {
        url: "http://odl.test:8181/restconf/operational".into(),
        username: "admin".into(),
        password: "admin".into(),
    }
}

/// [`TopologyFetcher`] answering from switches, ports and host links
/// declared up front.
///
/// Paths other than the topology document and the declared switches'
/// inventories answer `{}`, like a controller returning 404.
#[derive(Debug, Default)]
pub struct ScriptedTopology {
    nodes: Vec<String>,
    links: Vec<Value>,
    inventories: Vec<(String, Value)>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

fn node_of_port(port: &str) -> &str {
    port.rsplit_once(':').map_or(port, |(node, _)| node)
}

impl ScriptedTopology {
    /// Controller with nothing in it.
    pub fn new() -> Self {
        Self::default()
    }

    fn switch(mut self, id: &str, serial: &str, description: &str, ports: &[&str]) -> Self {
        let connectors: Vec<Value> = ports
            .iter()
            .enumerate()
            .map(|(n, port)| {
                json!({
                    "id": port,
                    "flow-node-inventory:name": format!("eth{n}"),
                    "flow-node-inventory:port-number": n.to_string(),
                    "flow-node-inventory:current-speed": 10_000_000,
                    "flow-node-inventory:hardware-address": format!("02:00:00:00:00:{n:02x}"),
                    "flow-node-inventory:state": {"link-down": false, "blocked": false},
                })
            })
            .collect();
        self.nodes.push(id.to_owned());
        self.inventories.push((
            id.to_owned(),
            json!({"node": [{
                "id": id,
                "flow-node-inventory:serial-number": serial,
                "flow-node-inventory:description": description,
                "flow-node-inventory:manufacturer": "Acme Networks",
                "flow-node-inventory:hardware": "T-48",
                "flow-node-inventory:software": "1.2.3",
                "flow-node-inventory:ip-address": "10.0.0.1",
                "node-connector": connectors,
            }]}),
        ));
        self
    }

    /// A switch reporting `serial`, with `ports` (`<id>:<n>`).
    pub fn physical_switch(self, id: &str, serial: &str, ports: &[&str]) -> Self {
        self.switch(id, serial, &format!("{id} top-of-rack"), ports)
    }

    /// A switch reporting no serial number.
    pub fn software_switch(self, id: &str, ports: &[&str]) -> Self {
        self.switch(id, "None", "ovs", ports)
    }

    /// Cable from `port` to the host with `mac`, reported switch-to-host.
    pub fn host_link(mut self, port: &str, mac: &str) -> Self {
        let host = format!("{HOST_PREFIX}{mac}");
        self.nodes.push(host.clone());
        self.links.push(json!({
            "source": {"source-node": node_of_port(port), "source-tp": port},
            "destination": {"dest-node": host, "dest-tp": host},
        }));
        self
    }

    /// Cable from the host with `mac` to `port`, reported host-to-switch.
    pub fn host_link_reversed(mut self, mac: &str, port: &str) -> Self {
        let host = format!("{HOST_PREFIX}{mac}");
        self.nodes.push(host.clone());
        self.links.push(json!({
            "source": {"source-node": host, "source-tp": host},
            "destination": {"dest-node": node_of_port(port), "dest-tp": port},
        }));
        self
    }

    /// Make every request fail with [`SdnError::Unreachable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests served so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn topology(&self) -> Value {
        let nodes: Vec<Value> = self
            .nodes
            .iter()
            .map(|id| json!({"node-id": id}))
            .collect();
        json!({"network-topology": {"topology": [{
            "topology-id": "flow:1",
            "node": nodes,
            "link": self.links,
        }]}})
    }
}

#[async_trait]
impl TopologyFetcher for ScriptedTopology {
    async fn get_json(&self, endpoint: &SdnEndpoint, path: &str) -> Result<Value, SdnError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SdnError::Unreachable(format!("{}/{path}", endpoint.url)));
        }
        if path == TOPOLOGY_PATH {
            return Ok(self.topology());
        }
        Ok(self
            .inventories
            .iter()
            .find(|(id, _)| inventory_path(id) == path)
            .map_or_else(|| json!({}), |(_, doc)| doc.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use epa_core::SdnCorrelator;
    use std::sync::Arc;

    #[tokio::test]
    async fn scripted_documents_drive_the_correlator() {
        let script = Arc::new(
            ScriptedTopology::new()
                .physical_switch("openflow:1", "SN-1", &["openflow:1:1", "openflow:1:2"])
                .software_switch("openflow:9", &["openflow:9:1"])
                .host_link("openflow:1:2", "aa:bb:cc:dd:ee:ff"),
        );
        let sdn = SdnCorrelator::new(script.clone(), test_endpoint());
        assert_eq!(sdn.switch_ids().await.unwrap(), vec!["openflow:1"]);
        assert_eq!(
            sdn.interface_by_mac("aa:bb:cc:dd:ee:ff").await.unwrap().as_deref(),
            Some("openflow:1:2")
        );
    }

    #[tokio::test]
    async fn offline_controller_is_unreachable() {
        let script = ScriptedTopology::new();
        script.set_offline(true);
        let err = script
            .get_json(&test_endpoint(), TOPOLOGY_PATH)
            .await
            .unwrap_err();
        assert!(matches!(err, SdnError::Unreachable(_)));
        assert_eq!(script.calls(), 1);
    }
}
