// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! SDN controller topology correlation.
//!
//! The controller's REST API exposes a topology document (nodes and
//! inter-node links) and a per-node inventory document (features and
//! connectors). A node is a physical switch only when its inventory reports
//! a serial number; software switches report none or the literal `None`.
//! Hosts show up as `host:<MAC>` nodes at the far end of links, which is how
//! switch ports are tied back to OS devices.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use epa_graph::Properties;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::error::SdnError;

/// Path of the topology document, relative to the controller base URL.
pub const TOPOLOGY_PATH: &str = "network-topology:network-topology/";
/// Prefix of host nodes and host termination points.
pub const HOST_PREFIX: &str = "host:";

const INVENTORY_NS: &str = "flow-node-inventory:";
const SERIAL_KEY: &str = "flow-node-inventory:serial-number";
const SWITCH_FIELDS: [&str; 6] = [
    "software",
    "hardware",
    "ip-address",
    "serial-number",
    "manufacturer",
    "switch-features",
];
const INTERFACE_FIELDS: [&str; 10] = [
    "port-number",
    "current-speed",
    "advertised-features",
    "configuration",
    "hardware-address",
    "maximum-speed",
    "state",
    "supported",
    "current-feature",
    "peer-features",
];
const PORT_STATISTICS_KEY: &str =
    "opendaylight-port-statistics:flow-capable-node-connector-statistics";

/// Path of one node's inventory document.
pub fn inventory_path(node_id: &str) -> String {
    format!("opendaylight-inventory:nodes/node/{node_id}")
}

/// Where and how to reach a facility's SDN controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdnEndpoint {
    /// Base URL of the REST API.
    pub url: String,
    /// Basic-auth user.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
}

/// Fetches JSON documents from an SDN controller.
#[async_trait]
pub trait TopologyFetcher: Send + Sync {
    /// GET `path` under `endpoint.url`. An empty body reads as `{}`.
    async fn get_json(&self, endpoint: &SdnEndpoint, path: &str) -> Result<Value, SdnError>;
}

/// [`TopologyFetcher`] over HTTP with basic auth.
#[derive(Clone, Debug)]
pub struct HttpTopologyFetcher {
    http: Client,
}

impl HttpTopologyFetcher {
    /// Client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, SdnError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SdnError::Unreachable(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl TopologyFetcher for HttpTopologyFetcher {
    async fn get_json(&self, endpoint: &SdnEndpoint, path: &str) -> Result<Value, SdnError> {
        let url = format!("{}/{path}", endpoint.url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .basic_auth(&endpoint.username, Some(&endpoint.password))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| SdnError::Unreachable(format!("{url}: {e}")))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Value::Object(Properties::new()));
        }
        if !status.is_success() {
            return Err(SdnError::Unreachable(format!("{url}: status {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SdnError::Unreachable(format!("{url}: {e}")))?;
        if body.trim().is_empty() {
            return Ok(Value::Object(Properties::new()));
        }
        serde_json::from_str(&body).map_err(|e| SdnError::Decode(format!("{url}: {e}")))
    }
}

#[derive(Debug, Default, Deserialize)]
struct TopologyDoc {
    #[serde(rename = "network-topology", default)]
    network_topology: NetworkTopology,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkTopology {
    #[serde(default)]
    topology: Vec<Topology>,
}

/// One topology of the controller.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Topology {
    /// Nodes.
    #[serde(default)]
    pub node: Vec<TopologyNode>,
    /// Inter-node links.
    #[serde(default)]
    pub link: Vec<TopologyLink>,
}

/// Topology node reference.
#[derive(Clone, Debug, Deserialize)]
pub struct TopologyNode {
    /// Node id (`openflow:1`, `host:aa:bb:..`).
    #[serde(rename = "node-id")]
    pub node_id: String,
}

/// Directed inter-node link.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TopologyLink {
    /// Source side.
    #[serde(default)]
    pub source: LinkSource,
    /// Destination side.
    #[serde(default)]
    pub destination: LinkDestination,
}

/// Source side of a link.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LinkSource {
    /// Source node id.
    #[serde(rename = "source-node", default)]
    pub source_node: String,
    /// Source termination point.
    #[serde(rename = "source-tp", default)]
    pub source_tp: String,
}

/// Destination side of a link.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LinkDestination {
    /// Destination node id.
    #[serde(rename = "dest-node", default)]
    pub dest_node: String,
    /// Destination termination point.
    #[serde(rename = "dest-tp", default)]
    pub dest_tp: String,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryDoc {
    #[serde(default)]
    node: Vec<InventoryNode>,
}

/// Inventory of one node.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InventoryNode {
    /// Node id.
    #[serde(default)]
    pub id: String,
    /// Ports.
    #[serde(rename = "node-connector", default)]
    pub connectors: Vec<Connector>,
    /// Everything else, keys still namespaced.
    #[serde(flatten)]
    pub fields: Properties,
}

impl InventoryNode {
    /// Non-empty serial number other than `None`.
    pub fn serial_number(&self) -> Option<&str> {
        self.fields
            .get(SERIAL_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "None")
    }
}

/// One switch port.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Connector {
    /// Connector id (`openflow:1:2`).
    #[serde(default)]
    pub id: String,
    /// Everything else.
    #[serde(flatten)]
    pub fields: Properties,
}

/// A confirmed physical switch with its inventory.
#[derive(Clone, Debug)]
pub struct PhysicalSwitch {
    /// Topology node id.
    pub id: String,
    /// Inventory entries reported for it.
    pub inventory: Vec<InventoryNode>,
}

impl PhysicalSwitch {
    fn connectors(&self) -> impl Iterator<Item = &Connector> {
        self.inventory.iter().flat_map(|n| n.connectors.iter())
    }
}

fn field_text(fields: &Properties, key: &str) -> Value {
    fields
        .get(&format!("{INVENTORY_NS}{key}"))
        .cloned()
        .unwrap_or_else(|| Value::from(""))
}

fn host_mac(tp: &str) -> Option<&str> {
    tp.strip_prefix(HOST_PREFIX).filter(|mac| !mac.is_empty())
}

fn same_host(tp: &str, mac: &str) -> bool {
    host_mac(tp).is_some_and(|m| m.eq_ignore_ascii_case(mac))
}

/// Read-only view of one controller, with documents cached for the
/// lifetime of the value.
///
/// Build one per read request; nothing here is invalidated.
pub struct SdnCorrelator {
    fetcher: Arc<dyn TopologyFetcher>,
    endpoint: SdnEndpoint,
    topology: OnceCell<Vec<Topology>>,
    switches: OnceCell<Vec<PhysicalSwitch>>,
}

impl SdnCorrelator {
    /// Correlator for `endpoint`.
    pub fn new(fetcher: Arc<dyn TopologyFetcher>, endpoint: SdnEndpoint) -> Self {
        Self {
            fetcher,
            endpoint,
            topology: OnceCell::new(),
            switches: OnceCell::new(),
        }
    }

    /// Controller endpoint.
    pub fn endpoint(&self) -> &SdnEndpoint {
        &self.endpoint
    }

    /// Every topology the controller reports.
    pub async fn topology(&self) -> Result<&[Topology], SdnError> {
        let topology = self
            .topology
            .get_or_try_init(|| async {
                let raw = self.fetcher.get_json(&self.endpoint, TOPOLOGY_PATH).await?;
                let doc: TopologyDoc = serde_json::from_value(raw)
                    .map_err(|e| SdnError::Decode(format!("topology: {e}")))?;
                Ok::<_, SdnError>(doc.network_topology.topology)
            })
            .await?;
        Ok(topology.as_slice())
    }

    async fn inventory(&self, node_id: &str) -> Result<Vec<InventoryNode>, SdnError> {
        let raw = self
            .fetcher
            .get_json(&self.endpoint, &inventory_path(node_id))
            .await?;
        let doc: InventoryDoc = serde_json::from_value(raw)
            .map_err(|e| SdnError::Decode(format!("inventory {node_id}: {e}")))?;
        Ok(doc.node)
    }

    /// Topology nodes whose inventory reports a serial number.
    #[instrument(skip(self), fields(url = %self.endpoint.url))]
    pub async fn physical_switches(&self) -> Result<&[PhysicalSwitch], SdnError> {
        let switches = self
            .switches
            .get_or_try_init(|| async {
                let mut found = Vec::new();
                let mut seen = HashSet::new();
                for topology in self.topology().await? {
                    for node in &topology.node {
                        if node.node_id.starts_with(HOST_PREFIX)
                            || !seen.insert(node.node_id.as_str())
                        {
                            continue;
                        }
                        let inventory = self.inventory(&node.node_id).await?;
                        if inventory.iter().any(|n| n.serial_number().is_some()) {
                            found.push(PhysicalSwitch {
                                id: node.node_id.clone(),
                                inventory,
                            });
                        } else {
                            debug!(node = %node.node_id, "not a physical switch");
                        }
                    }
                }
                Ok::<_, SdnError>(found)
            })
            .await?;
        Ok(switches.as_slice())
    }

    /// Ids of the physical switches.
    pub async fn switch_ids(&self) -> Result<Vec<String>, SdnError> {
        Ok(self
            .physical_switches()
            .await?
            .iter()
            .map(|s| s.id.clone())
            .collect())
    }

    async fn physical_switch(&self, id: &str) -> Result<Option<&PhysicalSwitch>, SdnError> {
        Ok(self.physical_switches().await?.iter().find(|s| s.id == id))
    }

    /// Connector ids of `switch_id`, empty when it is not a physical switch.
    pub async fn interfaces_of(&self, switch_id: &str) -> Result<Vec<String>, SdnError> {
        Ok(self
            .physical_switch(switch_id)
            .await?
            .map(|s| s.connectors().map(|c| c.id.clone()).collect())
            .unwrap_or_default())
    }

    /// Connector ids of every physical switch.
    pub async fn all_interfaces(&self) -> Result<Vec<String>, SdnError> {
        Ok(self
            .physical_switches()
            .await?
            .iter()
            .flat_map(|s| s.connectors().map(|c| c.id.clone()))
            .collect())
    }

    /// Physical switch owning `interface_id`.
    pub async fn switch_of_interface(
        &self,
        interface_id: &str,
    ) -> Result<Option<String>, SdnError> {
        Ok(self
            .physical_switches()
            .await?
            .iter()
            .find(|s| s.connectors().any(|c| c.id == interface_id))
            .map(|s| s.id.clone()))
    }

    /// Switch interface linked to the host with `mac`.
    ///
    /// A link whose destination is `host:<mac>` yields its source port; the
    /// reverse direction yields the destination port. The port only counts
    /// when its switch prefix is a physical switch.
    pub async fn interface_by_mac(&self, mac: &str) -> Result<Option<String>, SdnError> {
        let mac = mac.trim();
        if mac.is_empty() {
            return Ok(None);
        }
        let switches: HashSet<String> = self.switch_ids().await?.into_iter().collect();
        for topology in self.topology().await? {
            for link in &topology.link {
                let candidate = if same_host(&link.destination.dest_node, mac)
                    || same_host(&link.destination.dest_tp, mac)
                {
                    &link.source.source_tp
                } else if same_host(&link.source.source_node, mac)
                    || same_host(&link.source.source_tp, mac)
                {
                    &link.destination.dest_tp
                } else {
                    continue;
                };
                if let Some((switch, _port)) = candidate.rsplit_once(':') {
                    if switches.contains(switch) {
                        return Ok(Some(candidate.clone()));
                    }
                }
            }
        }
        Ok(None)
    }

    /// MAC of the host linked to `interface_id`, if any.
    pub async fn peer_mac_of_interface(
        &self,
        interface_id: &str,
    ) -> Result<Option<String>, SdnError> {
        for topology in self.topology().await? {
            for link in &topology.link {
                let peer = if link.source.source_tp == interface_id {
                    host_mac(&link.destination.dest_node)
                        .or_else(|| host_mac(&link.destination.dest_tp))
                } else if link.destination.dest_tp == interface_id {
                    host_mac(&link.source.source_node).or_else(|| host_mac(&link.source.source_tp))
                } else {
                    None
                };
                if let Some(mac) = peer {
                    return Ok(Some(mac.to_owned()));
                }
            }
        }
        Ok(None)
    }

    /// `name` plus feature `attributes` of a physical switch.
    pub async fn switch_details(&self, switch_id: &str) -> Result<Option<Properties>, SdnError> {
        let Some(switch) = self.physical_switch(switch_id).await? else {
            return Ok(None);
        };
        let Some(node) = switch.inventory.first() else {
            return Ok(None);
        };
        let mut attributes = Properties::new();
        for key in SWITCH_FIELDS {
            attributes.insert(key.into(), field_text(&node.fields, key));
        }
        let mut details = Properties::new();
        details.insert("name".into(), field_text(&node.fields, "description"));
        details.insert("attributes".into(), Value::Object(attributes));
        Ok(Some(details))
    }

    /// `name` plus port `attributes` of a physical switch interface.
    pub async fn interface_details(
        &self,
        interface_id: &str,
    ) -> Result<Option<Properties>, SdnError> {
        let connector = self
            .physical_switches()
            .await?
            .iter()
            .flat_map(PhysicalSwitch::connectors)
            .find(|c| c.id == interface_id);
        let Some(connector) = connector else {
            return Ok(None);
        };
        let mut attributes = Properties::new();
        for key in INTERFACE_FIELDS {
            attributes.insert(key.into(), field_text(&connector.fields, key));
        }
        attributes.insert(
            "flow-capable-node-connector-statistics".into(),
            connector
                .fields
                .get(PORT_STATISTICS_KEY)
                .cloned()
                .unwrap_or_else(|| Value::from("")),
        );
        let mut details = Properties::new();
        details.insert("name".into(), field_text(&connector.fields, "name"));
        details.insert("attributes".into(), Value::Object(attributes));
        Ok(Some(details))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Canned {
        docs: HashMap<String, Value>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TopologyFetcher for Canned {
        async fn get_json(&self, _endpoint: &SdnEndpoint, path: &str) -> Result<Value, SdnError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.docs.get(path).cloned().unwrap_or_else(|| json!({})))
        }
    }

    fn canned() -> Arc<Canned> {
        let mut docs = HashMap::new();
        docs.insert(
            TOPOLOGY_PATH.to_owned(),
            json!({"network-topology": {"topology": [{
                "node": [
                    {"node-id": "openflow:1"},
                    {"node-id": "openflow:2"},
                    {"node-id": "host:aa:bb:cc:dd:ee:ff"}
                ],
                "link": [
                    {"source": {"source-node": "openflow:1", "source-tp": "openflow:1:2"},
                     "destination": {"dest-node": "host:aa:bb:cc:dd:ee:ff",
                                     "dest-tp": "host:aa:bb:cc:dd:ee:ff"}},
                    {"source": {"source-node": "host:11:22:33:44:55:66",
                                "source-tp": "host:11:22:33:44:55:66"},
                     "destination": {"dest-node": "openflow:1", "dest-tp": "openflow:1:3"}},
                    {"source": {"source-node": "openflow:2", "source-tp": "openflow:2:1"},
                     "destination": {"dest-node": "host:de:ad:be:ef:00:01",
                                     "dest-tp": "host:de:ad:be:ef:00:01"}}
                ]
            }]}}),
        );
        docs.insert(
            inventory_path("openflow:1"),
            json!({"node": [{
                "id": "openflow:1",
                "flow-node-inventory:serial-number": "SN-42",
                "flow-node-inventory:description": "tor-1",
                "flow-node-inventory:manufacturer": "acme",
                "node-connector": [
                    {"id": "openflow:1:2", "flow-node-inventory:name": "eth2",
                     "flow-node-inventory:state": {"link-down": false}},
                    {"id": "openflow:1:3", "flow-node-inventory:name": "eth3"}
                ]
            }]}),
        );
        docs.insert(
            inventory_path("openflow:2"),
            json!({"node": [{
                "id": "openflow:2",
                "flow-node-inventory:serial-number": "None",
                "node-connector": [{"id": "openflow:2:1"}]
            }]}),
        );
        Arc::new(Canned {
            docs,
            calls: AtomicUsize::new(0),
        })
    }

    fn correlator(fetcher: Arc<Canned>) -> SdnCorrelator {
        SdnCorrelator::new(
            fetcher,
            SdnEndpoint {
                url: "http://odl:8181/restconf/operational".into(),
                username: "admin".into(),
                password: "admin".into(),
            },
        )
    }

    #[tokio::test]
    async fn software_switches_are_filtered_out() {
        let sdn = correlator(canned());
        assert_eq!(sdn.switch_ids().await.unwrap(), vec!["openflow:1"]);
        assert_eq!(
            sdn.interfaces_of("openflow:1").await.unwrap(),
            vec!["openflow:1:2", "openflow:1:3"]
        );
        assert!(sdn.interfaces_of("openflow:2").await.unwrap().is_empty());
        assert_eq!(sdn.all_interfaces().await.unwrap().len(), 2);
        assert_eq!(
            sdn.switch_of_interface("openflow:1:3").await.unwrap().as_deref(),
            Some("openflow:1")
        );
    }

    #[tokio::test]
    async fn documents_are_fetched_once_per_correlator() {
        let fetcher = canned();
        let sdn = correlator(fetcher.clone());
        sdn.switch_ids().await.unwrap();
        sdn.all_interfaces().await.unwrap();
        sdn.interface_by_mac("aa:bb:cc:dd:ee:ff").await.unwrap();
        // topology + two switch inventories
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn mac_lookup_matches_either_direction_ignoring_case() {
        let sdn = correlator(canned());
        assert_eq!(
            sdn.interface_by_mac("AA:BB:CC:DD:EE:FF").await.unwrap().as_deref(),
            Some("openflow:1:2")
        );
        assert_eq!(
            sdn.interface_by_mac("11:22:33:44:55:66").await.unwrap().as_deref(),
            Some("openflow:1:3")
        );
        // linked only to a software switch
        assert!(sdn
            .interface_by_mac("de:ad:be:ef:00:01")
            .await
            .unwrap()
            .is_none());
        assert!(sdn.interface_by_mac("").await.unwrap().is_none());
        assert_eq!(
            sdn.peer_mac_of_interface("openflow:1:3").await.unwrap().as_deref(),
            Some("11:22:33:44:55:66")
        );
    }

    #[tokio::test]
    async fn details_strip_inventory_namespace() {
        let sdn = correlator(canned());
        let switch = sdn.switch_details("openflow:1").await.unwrap().unwrap();
        assert_eq!(switch["name"], "tor-1");
        assert_eq!(switch["attributes"]["manufacturer"], "acme");
        assert_eq!(switch["attributes"]["serial-number"], "SN-42");
        assert_eq!(switch["attributes"]["software"], "");
        let iface = sdn.interface_details("openflow:1:2").await.unwrap().unwrap();
        assert_eq!(iface["name"], "eth2");
        assert_eq!(iface["attributes"]["state"], json!({"link-down": false}));
        assert!(sdn.switch_details("openflow:2").await.unwrap().is_none());
    }
}
