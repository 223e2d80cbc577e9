// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource reconciliation store.
//!
//! [`ResourceStore::store`] is the single write path for control-plane
//! resources. It upserts (or updates) the node, then wires the declared
//! in/out edges, host attachments, hypervisors and controller services.
//! Every public mutation holds the [`GraphWriter`] lock for its whole
//! duration, and a failed store undoes the writes it already made.

use std::collections::BTreeMap;

use epa_graph::{
    Direction, Edge, EdgeRef, GraphError, GraphStore, IndexFamily, Node, NodeIndex, NodeQuery,
    NodeRef, Properties, HOSTNAME_KEY, POP_KEY, RESOURCE_TYPE_KEY, TYPE_KEY,
};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::EpaError;
use crate::kind::ResourceKind;
use crate::writer::GraphWriter;

/// Label for resource -> host machine and resource -> PCI device edges.
pub const RUNS_ON: &str = "runs_on";
/// Label for resource -> hypervisor edges.
pub const DEPLOYED_ON: &str = "deployed_on";
/// Label for controller service -> resource edges.
pub const MANAGES: &str = "manages";
/// Label for stack -> member edges.
pub const HAS_RESOURCE: &str = "has_resource";
/// `resource_type` of orchestration stacks.
pub const VNF: &str = "vnf";

/// Index of the placeholder machine node for `hostname`.
///
/// Matches the name the hardware importer gives the hwloc `Machine` object,
/// so host attachments land on the imported machine once it exists.
pub fn host_machine_index(hostname: &str) -> NodeIndex {
    NodeIndex::physical(format!("{hostname}_Machine_0"))
}

/// How to treat one declared edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeSpec {
    /// Create the far node as a placeholder when it is absent.
    pub mandatory: bool,
    /// Relationship label.
    pub label: String,
    /// Family the far node is indexed under.
    pub family: IndexFamily,
    /// Type written onto a placeholder.
    pub kind: Option<ResourceKind>,
}

impl EdgeSpec {
    /// Edge whose target is created if missing.
    pub fn mandatory(label: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            mandatory: true,
            label: label.into(),
            family: IndexFamily::VirtualResource,
            kind: Some(kind),
        }
    }

    /// Edge added only when the target already exists.
    pub fn optional(label: impl Into<String>) -> Self {
        Self {
            mandatory: false,
            label: label.into(),
            family: IndexFamily::VirtualResource,
            kind: None,
        }
    }

    /// Target lives in another family.
    pub fn in_family(mut self, family: IndexFamily) -> Self {
        self.family = family;
        self
    }
}

/// The relationships the controller writes, each with a fixed policy.
///
/// Mandatory relations point at resources that must exist for the source
/// to make sense (a port's network, a snapshot's volume); the target is
/// created as a typed placeholder when its own event has not arrived yet.
/// Optional relations are only drawn when both ends are already known,
/// because the other side re-draws them when it is synced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// port -> network.
    NetworkOfPort,
    /// floating ip -> network.
    NetworkOfFloatingIp,
    /// floating ip -> fixed port.
    PortOfFloatingIp,
    /// port -> floating ip.
    FloatingIpOfPort,
    /// router -> port.
    PortOfRouter,
    /// instance -> port.
    PortOfInstance,
    /// instance -> port, drawn from the port side.
    DeviceOfPort,
    /// volume -> snapshot.
    SnapshotOfVolume,
    /// volume -> snapshot, drawn from the snapshot side.
    VolumeOfSnapshot,
    /// volume -> volume service.
    ServiceOfVolume,
    /// instance -> volume, drawn from the volume side.
    InstanceOfVolume,
    /// stack -> member resource.
    ResourceOfStack,
}

impl Relation {
    /// Every relation.
    pub const ALL: [Self; 12] = [
        Self::NetworkOfPort,
        Self::NetworkOfFloatingIp,
        Self::PortOfFloatingIp,
        Self::FloatingIpOfPort,
        Self::PortOfRouter,
        Self::PortOfInstance,
        Self::DeviceOfPort,
        Self::SnapshotOfVolume,
        Self::VolumeOfSnapshot,
        Self::ServiceOfVolume,
        Self::InstanceOfVolume,
        Self::ResourceOfStack,
    ];

    /// Edge label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::NetworkOfPort | Self::NetworkOfFloatingIp => "on_network",
            Self::PortOfFloatingIp => "associated_with",
            Self::FloatingIpOfPort => "has_floatingip",
            Self::PortOfRouter | Self::PortOfInstance | Self::DeviceOfPort => "has_port",
            Self::SnapshotOfVolume | Self::VolumeOfSnapshot => "has_snapshot",
            Self::ServiceOfVolume => DEPLOYED_ON,
            Self::InstanceOfVolume => "has_volume",
            Self::ResourceOfStack => HAS_RESOURCE,
        }
    }

    /// Kind of the node on the far side, when fixed.
    pub const fn target_kind(self) -> Option<ResourceKind> {
        match self {
            Self::NetworkOfPort | Self::NetworkOfFloatingIp => Some(ResourceKind::Net),
            Self::PortOfFloatingIp | Self::PortOfRouter | Self::PortOfInstance => {
                Some(ResourceKind::Port)
            }
            Self::FloatingIpOfPort => Some(ResourceKind::FloatingIp),
            Self::DeviceOfPort | Self::InstanceOfVolume => Some(ResourceKind::Vm),
            Self::SnapshotOfVolume => Some(ResourceKind::Snapshot),
            Self::VolumeOfSnapshot => Some(ResourceKind::Volume),
            Self::ServiceOfVolume => Some(ResourceKind::CinderVolume),
            Self::ResourceOfStack => None,
        }
    }

    /// Policy.
    pub const fn mandatory(self) -> bool {
        !matches!(
            self,
            Self::PortOfInstance | Self::DeviceOfPort | Self::ResourceOfStack
        )
    }

    /// The edge spec for this relation.
    pub fn spec(self) -> EdgeSpec {
        match (self.mandatory(), self.target_kind()) {
            (true, Some(kind)) => EdgeSpec::mandatory(self.label(), kind),
            _ => EdgeSpec::optional(self.label()),
        }
    }
}

/// Far-node identifier -> edge spec.
pub type EdgeMap = BTreeMap<String, EdgeSpec>;

/// One call to [`ResourceStore::store`].
#[derive(Clone, Debug)]
pub struct StoreRequest {
    /// Node to write.
    pub index: NodeIndex,
    /// Properties merged into the node.
    pub properties: Properties,
    /// Write time.
    pub timestamp: f64,
    /// Edges ending at this node, keyed by their source.
    pub in_edges: EdgeMap,
    /// Edges starting at this node, keyed by their target.
    pub out_edges: EdgeMap,
    /// Hosts this resource runs on.
    pub host_nodes: Vec<String>,
    /// Controller services managing this resource.
    pub controller_services: Vec<String>,
    /// Hypervisors this resource is deployed on.
    pub hypervisors: Vec<String>,
    /// Only merge into an existing node; never create.
    pub update: bool,
}

impl StoreRequest {
    /// Request to upsert `index`.
    pub fn new(index: NodeIndex, properties: Properties, timestamp: f64) -> Self {
        Self {
            index,
            properties,
            timestamp,
            in_edges: EdgeMap::new(),
            out_edges: EdgeMap::new(),
            host_nodes: Vec::new(),
            controller_services: Vec::new(),
            hypervisors: Vec::new(),
            update: false,
        }
    }

    /// Declare `source -> self`.
    pub fn in_edge(mut self, source: impl Into<String>, spec: EdgeSpec) -> Self {
        self.in_edges.insert(source.into(), spec);
        self
    }

    /// Declare `self -> target`.
    pub fn out_edge(mut self, target: impl Into<String>, spec: EdgeSpec) -> Self {
        self.out_edges.insert(target.into(), spec);
        self
    }

    /// Attach to a host machine.
    pub fn host(mut self, hostname: impl Into<String>) -> Self {
        self.host_nodes.push(hostname.into());
        self
    }

    /// Attach to a hypervisor.
    pub fn hypervisor(mut self, hostname: impl Into<String>) -> Self {
        self.hypervisors.push(hostname.into());
        self
    }

    /// Attach a managing controller service.
    pub fn controller_service(mut self, name: impl Into<String>) -> Self {
        self.controller_services.push(name.into());
        self
    }

    /// Switch to update-only.
    pub fn update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }
}

/// Graph writes of one store call, kept so they can be undone.
struct Tracked<'a> {
    graph: &'a dyn GraphStore,
    created_nodes: Vec<NodeRef>,
    merged_nodes: Vec<Node>,
    created_edges: Vec<EdgeRef>,
    relabeled_edges: Vec<Edge>,
}

impl<'a> Tracked<'a> {
    fn new(graph: &'a dyn GraphStore) -> Self {
        Self {
            graph,
            created_nodes: Vec::new(),
            merged_nodes: Vec::new(),
            created_edges: Vec::new(),
            relabeled_edges: Vec::new(),
        }
    }

    async fn upsert(
        &mut self,
        index: &NodeIndex,
        ts: f64,
        properties: Properties,
    ) -> Result<Node, GraphError> {
        let prior = self.graph.get(index).await?;
        let node = self.graph.upsert(index, ts, properties).await?;
        match prior {
            Some(prior) => self.merged_nodes.push(prior),
            None => self.created_nodes.push(node.id),
        }
        Ok(node)
    }

    async fn update(
        &mut self,
        index: &NodeIndex,
        ts: f64,
        properties: Properties,
    ) -> Result<Option<Node>, GraphError> {
        let Some(prior) = self.graph.get(index).await? else {
            return Ok(None);
        };
        let node = self.graph.update(index, ts, properties).await?;
        self.merged_nodes.push(prior);
        Ok(node)
    }

    async fn add_edge(
        &mut self,
        src: NodeRef,
        dst: NodeRef,
        ts: f64,
        label: &str,
    ) -> Result<Edge, GraphError> {
        let prior = self.graph.get_edge(src, dst).await?;
        let edge = self
            .graph
            .add_edge(src, dst, ts, label, Properties::new())
            .await?;
        match prior {
            Some(prior) => self.relabeled_edges.push(prior),
            None => self.created_edges.push(edge.id),
        }
        Ok(edge)
    }

    /// Undo every recorded write, newest first. Failures are logged; the
    /// caller still reports `cause`.
    async fn rollback(self, cause: &EpaError) {
        warn!(%cause, "store failed; undoing partial writes");
        let graph = self.graph;
        for prior in self.relabeled_edges.iter().rev() {
            let ts = prior.timestamp().unwrap_or_default();
            if let Err(err) = graph
                .add_edge(prior.src, prior.dst, ts, &prior.label, Properties::new())
                .await
            {
                warn!(%err, edge = ?prior.id, "edge label not restored");
            }
        }
        for id in self.created_edges.iter().rev() {
            if let Err(err) = graph.delete_edge(*id).await {
                warn!(%err, edge = ?id, "edge not removed");
            }
        }
        for id in self.created_nodes.iter().rev() {
            if let Err(err) = graph.delete_node(*id).await {
                warn!(%err, node = ?id, "node not removed");
            }
        }
        for prior in self.merged_nodes.iter().rev() {
            if let Err(err) = restore(graph, prior).await {
                warn!(%err, index = %prior.index, "node not restored");
            }
        }
    }
}

/// Put `prior`'s properties back, dropping keys written since.
async fn restore(graph: &dyn GraphStore, prior: &Node) -> Result<(), GraphError> {
    let Some(current) = graph.get(&prior.index).await? else {
        return Ok(());
    };
    let mut properties = prior.properties.clone();
    for key in current.properties.keys() {
        if !properties.contains_key(key) {
            properties.insert(key.clone(), Value::Null);
        }
    }
    graph
        .update(&prior.index, prior.timestamp, properties)
        .await?;
    Ok(())
}

/// Write path for one facility's graph.
#[derive(Clone)]
pub struct ResourceStore {
    writer: GraphWriter,
    pop: String,
}

impl ResourceStore {
    /// Store for facility `pop`, sharing `writer`'s lock.
    pub fn new(writer: GraphWriter, pop: impl Into<String>) -> Self {
        Self {
            writer,
            pop: pop.into(),
        }
    }

    /// Facility this store writes into.
    pub fn pop(&self) -> &str {
        &self.pop
    }

    /// Underlying graph, for reads.
    pub fn graph(&self) -> &dyn GraphStore {
        self.writer.graph()
    }

    /// Upsert a resource and its declared relationships.
    ///
    /// Returns `None` when `update` was requested and the node is absent.
    /// When any write fails, the writes this call already made are undone
    /// before the error is returned.
    #[instrument(skip(self, request), fields(index = %request.index))]
    pub async fn store(&self, request: StoreRequest) -> Result<Option<Node>, EpaError> {
        let _guard = self.writer.lock().await;
        let mut tx = Tracked::new(self.writer.graph());
        match self.apply(request, &mut tx).await {
            Ok(node) => Ok(node),
            Err(err) => {
                tx.rollback(&err).await;
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        request: StoreRequest,
        tx: &mut Tracked<'_>,
    ) -> Result<Option<Node>, EpaError> {
        let ts = request.timestamp;
        let mut properties = request.properties;
        properties.insert(POP_KEY.into(), Value::from(self.pop.as_str()));
        let node = if request.update {
            tx.update(&request.index, ts, properties).await?
        } else {
            Some(tx.upsert(&request.index, ts, properties).await?)
        };
        let Some(node) = node else {
            debug!("update skipped: node absent");
            return Ok(None);
        };

        for (source, spec) in &request.in_edges {
            if let Some(other) = self.endpoint(tx, source, spec, ts).await? {
                tx.add_edge(other.id, node.id, ts, &spec.label).await?;
            }
        }
        for (target, spec) in &request.out_edges {
            if let Some(other) = self.endpoint(tx, target, spec, ts).await? {
                tx.add_edge(node.id, other.id, ts, &spec.label).await?;
            }
        }
        for hostname in &request.host_nodes {
            let machine = self.host_machine(tx, hostname, ts).await?;
            tx.add_edge(node.id, machine.id, ts, RUNS_ON).await?;
        }
        for hostname in &request.hypervisors {
            match tx
                .graph
                .get(&NodeIndex::hypervisor(hostname.as_str()))
                .await?
            {
                Some(hv) => {
                    tx.add_edge(node.id, hv.id, ts, DEPLOYED_ON).await?;
                }
                None => debug!(hostname, "hypervisor not stored; edge skipped"),
            }
        }
        for name in &request.controller_services {
            match tx
                .graph
                .get(&NodeIndex::controller_service(name.as_str()))
                .await?
            {
                Some(svc) => {
                    tx.add_edge(svc.id, node.id, ts, MANAGES).await?;
                }
                None => debug!(service = name, "controller service not stored; edge skipped"),
            }
        }
        if node
            .kind()
            .is_some_and(|k| k.eq_ignore_ascii_case(ResourceKind::Port.as_str()))
        {
            self.link_port_to_pci_device(tx, &node, ts).await?;
        }
        Ok(Some(node))
    }

    async fn endpoint(
        &self,
        tx: &mut Tracked<'_>,
        identifier: &str,
        spec: &EdgeSpec,
        ts: f64,
    ) -> Result<Option<Node>, EpaError> {
        let index = NodeIndex::new(spec.family, identifier);
        if let Some(node) = tx.graph.get(&index).await? {
            return Ok(Some(node));
        }
        if !spec.mandatory {
            debug!(target = identifier, label = %spec.label, "optional edge target absent");
            return Ok(None);
        }
        let mut placeholder = Properties::new();
        placeholder.insert(POP_KEY.into(), Value::from(self.pop.as_str()));
        if let Some(kind) = spec.kind {
            placeholder.insert(TYPE_KEY.into(), Value::from(kind.as_str()));
        }
        debug!(target = identifier, label = %spec.label, "creating placeholder");
        Ok(Some(tx.upsert(&index, ts, placeholder).await?))
    }

    async fn host_machine(
        &self,
        tx: &mut Tracked<'_>,
        hostname: &str,
        ts: f64,
    ) -> Result<Node, EpaError> {
        let index = host_machine_index(hostname);
        if let Some(node) = tx.graph.get(&index).await? {
            return Ok(node);
        }
        let mut placeholder = Properties::new();
        placeholder.insert(TYPE_KEY.into(), Value::from("Machine"));
        placeholder.insert(HOSTNAME_KEY.into(), Value::from(hostname));
        placeholder.insert(POP_KEY.into(), Value::from(self.pop.as_str()));
        Ok(tx.upsert(&index, ts, placeholder).await?)
    }

    /// Ports bound to an SR-IOV/passthrough slot run on that PCI device.
    async fn link_port_to_pci_device(
        &self,
        tx: &mut Tracked<'_>,
        port: &Node,
        ts: f64,
    ) -> Result<(), EpaError> {
        let Some(slot) = port_pci_slot(port) else {
            return Ok(());
        };
        let Some(hostname) = port.str_prop(HOSTNAME_KEY) else {
            debug!(port = port.identifier(), "port with pci slot has no hostname");
            return Ok(());
        };
        let devices = tx
            .graph
            .query(
                &NodeQuery::new()
                    .family(IndexFamily::PhysicalResource)
                    .eq(HOSTNAME_KEY, hostname)
                    .kind(ResourceKind::PciDev.as_str())
                    .attribute_eq("pci_busid", slot.as_str()),
            )
            .await?;
        match devices.as_slice() {
            [device] => {
                tx.add_edge(port.id, device.id, ts, RUNS_ON).await?;
            }
            other => debug!(
                port = port.identifier(),
                slot = %slot,
                matches = other.len(),
                "no unique pci device for port"
            ),
        }
        Ok(())
    }

    /// Store a hypervisor and attach it to its host machine.
    pub async fn store_hypervisor(
        &self,
        hostname: &str,
        mut properties: Properties,
        ts: f64,
    ) -> Result<Node, EpaError> {
        let _guard = self.writer.lock().await;
        properties.insert(POP_KEY.into(), Value::from(self.pop.as_str()));
        properties.insert(
            TYPE_KEY.into(),
            Value::from(ResourceKind::Hypervisor.as_str()),
        );
        let mut tx = Tracked::new(self.writer.graph());
        let index = NodeIndex::hypervisor(hostname);
        let result = self
            .attach_to_host(&mut tx, &index, Some(hostname), properties, ts)
            .await;
        if let Err(err) = &result {
            tx.rollback(err).await;
        }
        result
    }

    /// Store a controller service and attach it to the host in its
    /// `hostname` property.
    pub async fn store_controller_service(
        &self,
        name: &str,
        mut properties: Properties,
        ts: f64,
    ) -> Result<Node, EpaError> {
        let _guard = self.writer.lock().await;
        properties.insert(POP_KEY.into(), Value::from(self.pop.as_str()));
        properties.insert(
            TYPE_KEY.into(),
            Value::from(ResourceKind::ControllerService.as_str()),
        );
        let hostname = properties
            .get(HOSTNAME_KEY)
            .and_then(Value::as_str)
            .map(str::to_owned);
        let mut tx = Tracked::new(self.writer.graph());
        let index = NodeIndex::controller_service(name);
        let result = self
            .attach_to_host(&mut tx, &index, hostname.as_deref(), properties, ts)
            .await;
        if let Err(err) = &result {
            tx.rollback(err).await;
        }
        result
    }

    async fn attach_to_host(
        &self,
        tx: &mut Tracked<'_>,
        index: &NodeIndex,
        hostname: Option<&str>,
        properties: Properties,
        ts: f64,
    ) -> Result<Node, EpaError> {
        let node = tx.upsert(index, ts, properties).await?;
        if let Some(hostname) = hostname {
            let machine = self.host_machine(tx, hostname, ts).await?;
            tx.add_edge(node.id, machine.id, ts, RUNS_ON).await?;
        }
        Ok(node)
    }

    /// Delete a resource and every edge touching it. Absent is a no-op.
    #[instrument(skip(self))]
    pub async fn remove(&self, index: &NodeIndex) -> Result<Option<Node>, EpaError> {
        let _guard = self.writer.lock().await;
        Ok(self.writer.graph().delete(index).await?)
    }

    /// Delete every directly connected node, optionally only those whose
    /// `type` matches `neighbour_type`. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn remove_neighbours(
        &self,
        index: &NodeIndex,
        neighbour_type: Option<&str>,
    ) -> Result<usize, EpaError> {
        let _guard = self.writer.lock().await;
        let graph = self.writer.graph();
        let Some(node) = graph.get(index).await? else {
            return Ok(0);
        };
        let mut removed = 0;
        for edge in graph.neighbors(node.id, Direction::Both).await? {
            let Some(other) = graph.node(edge.other(node.id)).await? else {
                continue;
            };
            let wanted = neighbour_type
                .is_none_or(|t| other.kind().is_some_and(|k| k.eq_ignore_ascii_case(t)));
            if wanted && graph.delete_node(other.id).await?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete every node of `family` owned by this facility.
    pub async fn remove_all(&self, family: IndexFamily) -> Result<usize, EpaError> {
        let _guard = self.writer.lock().await;
        Ok(self
            .writer
            .graph()
            .delete_all_matching(family.label(), POP_KEY, &self.pop)
            .await?)
    }

    /// The stack (a `vnf` node with a `has_resource` edge into `index`).
    pub async fn get_stack(&self, index: &NodeIndex) -> Result<Option<Node>, EpaError> {
        let graph = self.writer.graph();
        let Some(node) = graph.get(index).await? else {
            return Ok(None);
        };
        for edge in graph.neighbors(node.id, Direction::Incoming).await? {
            if edge.label != HAS_RESOURCE {
                continue;
            }
            if let Some(stack) = graph.node(edge.src).await? {
                if stack.str_prop(RESOURCE_TYPE_KEY) == Some(VNF) {
                    return Ok(Some(stack));
                }
            }
        }
        Ok(None)
    }
}

/// `attributes.profile.pci_slot`, where `profile` may be a map or JSON text.
fn port_pci_slot(port: &Node) -> Option<String> {
    let profile = port.attributes()?.get("profile")?;
    let parsed;
    let profile = match profile {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).ok()?;
            &parsed
        }
        other => other,
    };
    profile
        .get("pci_slot")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .filter(|slot| !slot.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use epa_graph::MemoryGraph;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> (Arc<MemoryGraph>, ResourceStore) {
        let graph = Arc::new(MemoryGraph::new());
        let writer = GraphWriter::new(graph.clone());
        (graph, ResourceStore::new(writer, "pop-1"))
    }

    fn props(v: Value) -> Properties {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn relation_policy_table() {
        assert!(Relation::NetworkOfPort.mandatory());
        assert!(Relation::PortOfFloatingIp.mandatory());
        assert!(!Relation::PortOfInstance.mandatory());
        assert!(!Relation::ResourceOfStack.mandatory());
        assert!(!Relation::ResourceOfStack.spec().mandatory);
        for rel in Relation::ALL {
            if rel.mandatory() {
                assert!(rel.target_kind().is_some(), "{rel:?} needs a placeholder kind");
            }
        }
    }

    #[tokio::test]
    async fn mandatory_out_edge_creates_typed_placeholder() {
        let (graph, store) = store();
        let req = StoreRequest::new(
            NodeIndex::virtual_resource("port-1"),
            props(json!({"type": "port"})),
            1.0,
        )
        .out_edge("net-1", Relation::NetworkOfPort.spec())
        .out_edge("fip-9", EdgeSpec::optional("has_floatingip"));
        store.store(req).await.unwrap().unwrap();

        let net = graph
            .get(&NodeIndex::virtual_resource("net-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(net.kind(), Some("net"));
        assert_eq!(net.str_prop("pop"), Some("pop-1"));
        assert!(graph
            .get(&NodeIndex::virtual_resource("fip-9"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges()[0].label, "on_network");
    }

    #[tokio::test]
    async fn update_of_absent_resource_returns_none() {
        let (graph, store) = store();
        let out = store
            .store(
                StoreRequest::new(NodeIndex::virtual_resource("x"), Properties::new(), 1.0)
                    .update(true)
                    .out_edge("net-1", Relation::NetworkOfPort.spec()),
            )
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(graph.node_count(), 0);
    }

    #[tokio::test]
    async fn hypervisor_and_service_attachments_need_existing_nodes() {
        let (graph, store) = store();
        store
            .store_hypervisor("compute-1", Properties::new(), 1.0)
            .await
            .unwrap();
        let vm = store
            .store(
                StoreRequest::new(
                    NodeIndex::virtual_resource("vm-1"),
                    props(json!({"type": "vm"})),
                    2.0,
                )
                .hypervisor("compute-1")
                .hypervisor("compute-missing")
                .controller_service("compute"),
            )
            .await
            .unwrap()
            .unwrap();
        let out = graph
            .neighbors(vm.id, Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, DEPLOYED_ON);
        // hypervisor -> machine placeholder
        assert!(graph
            .get(&host_machine_index("compute-1"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn port_with_pci_slot_runs_on_matching_device() {
        let (graph, store) = store();
        graph
            .upsert(
                &NodeIndex::physical("cn1_PCIDev_4"),
                1.0,
                props(json!({
                    "type": "PCIDev",
                    "hostname": "cn1",
                    "attributes": {"pci_busid": "0000:05:00.1"}
                })),
            )
            .await
            .unwrap();
        let port = store
            .store(StoreRequest::new(
                NodeIndex::virtual_resource("port-7"),
                props(json!({
                    "type": "port",
                    "hostname": "cn1",
                    "attributes": {"profile": "{\"pci_slot\": \"0000:05:00.1\"}"}
                })),
                2.0,
            ))
            .await
            .unwrap()
            .unwrap();
        let out = graph
            .neighbors(port.id, Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, RUNS_ON);
    }

    #[tokio::test]
    async fn remove_neighbours_filters_by_type() {
        let (graph, store) = store();
        store
            .store(
                StoreRequest::new(
                    NodeIndex::virtual_resource("r1"),
                    props(json!({"type": "router"})),
                    1.0,
                )
                .out_edge("p1", Relation::PortOfRouter.spec())
                .out_edge("p2", Relation::PortOfRouter.spec())
                .out_edge("n1", Relation::NetworkOfPort.spec()),
            )
            .await
            .unwrap();
        let removed = store
            .remove_neighbours(&NodeIndex::virtual_resource("r1"), Some("port"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(graph.node_count(), 2);
        store
            .remove(&NodeIndex::virtual_resource("r1"))
            .await
            .unwrap();
        assert_eq!(graph.edge_count(), 0);
        // idempotent
        assert!(store
            .remove(&NodeIndex::virtual_resource("r1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn get_stack_follows_has_resource_from_vnf() {
        let (_graph, store) = store();
        store
            .store(StoreRequest::new(
                NodeIndex::virtual_resource("vm-1"),
                props(json!({"type": "vm"})),
                1.0,
            ))
            .await
            .unwrap();
        store
            .store(
                StoreRequest::new(
                    NodeIndex::virtual_resource("stack-1"),
                    props(json!({"type": "stack", "resource_type": "vnf"})),
                    1.0,
                )
                .out_edge("vm-1", Relation::ResourceOfStack.spec()),
            )
            .await
            .unwrap();
        let stack = store
            .get_stack(&NodeIndex::virtual_resource("vm-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stack.identifier(), "stack-1");
    }
}
