// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process graph backend.
//!
//! Rows are stored flattened (see [`crate::codec`]) so that this backend
//! behaves like a property-only database: nested values round-trip through
//! JSON text.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::trace;

use crate::codec::{self, ScalarMap};
use crate::model::{
    Direction, Edge, EdgeRef, Node, NodeIndex, NodeQuery, NodeRef, Properties, TIMESTAMP_KEY,
};
use crate::store::{GraphConnector, GraphError, GraphStore};

#[derive(Debug, Clone)]
struct NodeRow {
    index: NodeIndex,
    timestamp: f64,
    props: ScalarMap,
}

#[derive(Debug, Clone)]
struct EdgeRow {
    src: NodeRef,
    dst: NodeRef,
    label: String,
    props: ScalarMap,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    nodes: BTreeMap<NodeRef, NodeRow>,
    by_index: HashMap<NodeIndex, NodeRef>,
    edges: BTreeMap<EdgeRef, EdgeRow>,
    edges_from: BTreeMap<NodeRef, Vec<EdgeRef>>,
    edges_to: BTreeMap<NodeRef, Vec<EdgeRef>>,
}

impl Inner {
    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn inflate_node(id: NodeRef, row: &NodeRow) -> Node {
        Node {
            id,
            index: row.index.clone(),
            timestamp: row.timestamp,
            properties: codec::inflate(&row.props),
        }
    }

    fn inflate_edge(id: EdgeRef, row: &EdgeRow) -> Edge {
        Edge {
            id,
            src: row.src,
            dst: row.dst,
            label: row.label.clone(),
            properties: codec::inflate(&row.props),
        }
    }

    fn merge(row: &mut NodeRow, timestamp: f64, properties: &Properties) {
        row.timestamp = timestamp;
        for (key, value) in properties {
            match codec::flatten_value(value) {
                Some(scalar) => {
                    row.props.insert(key.clone(), scalar);
                }
                None if key != row.index.family.key() => {
                    row.props.remove(key);
                }
                None => {}
            }
        }
        row.props
            .insert(TIMESTAMP_KEY.to_owned(), codec::Scalar::Float(timestamp));
    }

    fn edge_between(&self, src: NodeRef, dst: NodeRef) -> Option<EdgeRef> {
        self.edges_from
            .get(&src)
            .into_iter()
            .flatten()
            .copied()
            .find(|e| self.edges.get(e).is_some_and(|row| row.dst == dst))
    }

    fn remove_edge(&mut self, id: EdgeRef) -> Option<EdgeRow> {
        let row = self.edges.remove(&id)?;
        if let Some(list) = self.edges_from.get_mut(&row.src) {
            list.retain(|e| *e != id);
        }
        if let Some(list) = self.edges_to.get_mut(&row.dst) {
            list.retain(|e| *e != id);
        }
        Some(row)
    }

    fn remove_node_cascade(&mut self, id: NodeRef) -> Option<Node> {
        let row = self.nodes.remove(&id)?;
        self.by_index.remove(&row.index);
        let mut touching = self.edges_from.remove(&id).unwrap_or_default();
        touching.extend(self.edges_to.remove(&id).unwrap_or_default());
        for edge in touching {
            self.remove_edge(edge);
        }
        trace!(index = %row.index, "node removed");
        Some(Self::inflate_node(id, &row))
    }

    fn node_matches_text(row: &NodeRow, key: &str, value: &str) -> bool {
        if row.index.family.key() == key && row.index.value == value {
            return true;
        }
        row.props
            .get(key)
            .is_some_and(|v| codec::scalar_text(v) == value)
    }
}

/// Thread-safe in-memory [`GraphStore`].
#[derive(Debug, Default)]
pub struct MemoryGraph {
    inner: RwLock<Inner>,
}

impl MemoryGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Number of stored edges.
    pub fn edge_count(&self) -> usize {
        self.read().edges.len()
    }

    /// Snapshot of every stored edge.
    pub fn edges(&self) -> Vec<Edge> {
        let inner = self.read();
        inner
            .edges
            .iter()
            .map(|(id, row)| Inner::inflate_edge(*id, row))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn upsert(
        &self,
        index: &NodeIndex,
        timestamp: f64,
        properties: Properties,
    ) -> Result<Node, GraphError> {
        let mut inner = self.write();
        let id = if let Some(id) = inner.by_index.get(index).copied() {
            id
        } else {
            let id = NodeRef(inner.alloc());
            let mut props = ScalarMap::new();
            props.insert(
                index.family.key().to_owned(),
                codec::Scalar::Str(index.value.clone()),
            );
            inner.nodes.insert(
                id,
                NodeRow {
                    index: index.clone(),
                    timestamp,
                    props,
                },
            );
            inner.by_index.insert(index.clone(), id);
            id
        };
        let row = inner
            .nodes
            .get_mut(&id)
            .ok_or_else(|| GraphError::Codec(format!("dangling index entry for {index}")))?;
        Inner::merge(row, timestamp, &properties);
        Ok(Inner::inflate_node(id, row))
    }

    async fn update(
        &self,
        index: &NodeIndex,
        timestamp: f64,
        properties: Properties,
    ) -> Result<Option<Node>, GraphError> {
        let mut inner = self.write();
        let Some(id) = inner.by_index.get(index).copied() else {
            return Ok(None);
        };
        Ok(inner.nodes.get_mut(&id).map(|row| {
            Inner::merge(row, timestamp, &properties);
            Inner::inflate_node(id, row)
        }))
    }

    async fn delete(&self, index: &NodeIndex) -> Result<Option<Node>, GraphError> {
        let mut inner = self.write();
        let Some(id) = inner.by_index.get(index).copied() else {
            return Ok(None);
        };
        Ok(inner.remove_node_cascade(id))
    }

    async fn delete_node(&self, node: NodeRef) -> Result<Option<Node>, GraphError> {
        Ok(self.write().remove_node_cascade(node))
    }

    async fn get(&self, index: &NodeIndex) -> Result<Option<Node>, GraphError> {
        let inner = self.read();
        Ok(inner
            .by_index
            .get(index)
            .and_then(|id| inner.nodes.get(id).map(|row| Inner::inflate_node(*id, row))))
    }

    async fn node(&self, node: NodeRef) -> Result<Option<Node>, GraphError> {
        let inner = self.read();
        Ok(inner
            .nodes
            .get(&node)
            .map(|row| Inner::inflate_node(node, row)))
    }

    async fn get_by_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<Node>, GraphError> {
        let inner = self.read();
        Ok(inner
            .nodes
            .iter()
            .find(|(_, row)| {
                row.index.family.label() == label && Inner::node_matches_text(row, key, value)
            })
            .map(|(id, row)| Inner::inflate_node(*id, row)))
    }

    async fn query(&self, query: &NodeQuery) -> Result<Vec<Node>, GraphError> {
        let inner = self.read();
        Ok(inner
            .nodes
            .iter()
            .filter(|(_, row)| query.family.is_none_or(|f| f == row.index.family))
            .map(|(id, row)| Inner::inflate_node(*id, row))
            .filter(|node| query.matches(node))
            .collect())
    }

    async fn add_edge(
        &self,
        src: NodeRef,
        dst: NodeRef,
        timestamp: f64,
        label: &str,
        properties: Properties,
    ) -> Result<Edge, GraphError> {
        let mut inner = self.write();
        if !inner.nodes.contains_key(&src) || !inner.nodes.contains_key(&dst) {
            return Err(GraphError::Codec(format!(
                "edge endpoint missing: {src:?} -> {dst:?}"
            )));
        }
        let mut props = codec::flatten(&properties);
        props.insert(TIMESTAMP_KEY.to_owned(), codec::Scalar::Float(timestamp));

        if let Some(id) = inner.edge_between(src, dst) {
            if let Some(row) = inner.edges.get_mut(&id) {
                row.label = label.to_owned();
                row.props.extend(props);
                return Ok(Inner::inflate_edge(id, row));
            }
        }
        let id = EdgeRef(inner.alloc());
        let row = EdgeRow {
            src,
            dst,
            label: label.to_owned(),
            props,
        };
        let edge = Inner::inflate_edge(id, &row);
        inner.edges.insert(id, row);
        inner.edges_from.entry(src).or_default().push(id);
        inner.edges_to.entry(dst).or_default().push(id);
        Ok(edge)
    }

    async fn get_edge(&self, src: NodeRef, dst: NodeRef) -> Result<Option<Edge>, GraphError> {
        let inner = self.read();
        Ok(inner.edge_between(src, dst).and_then(|id| {
            inner
                .edges
                .get(&id)
                .map(|row| Inner::inflate_edge(id, row))
        }))
    }

    async fn delete_edge(&self, edge: EdgeRef) -> Result<bool, GraphError> {
        Ok(self.write().remove_edge(edge).is_some())
    }

    async fn find_edges(&self, key: &str, value: &str) -> Result<Vec<Edge>, GraphError> {
        let inner = self.read();
        Ok(inner
            .edges
            .iter()
            .filter(|(_, row)| {
                row.props
                    .get(key)
                    .is_some_and(|v| codec::scalar_text(v) == value)
            })
            .map(|(id, row)| Inner::inflate_edge(*id, row))
            .collect())
    }

    async fn neighbors(
        &self,
        node: NodeRef,
        direction: Direction,
    ) -> Result<Vec<Edge>, GraphError> {
        let inner = self.read();
        let outgoing = inner.edges_from.get(&node).into_iter().flatten();
        let incoming = inner.edges_to.get(&node).into_iter().flatten();
        let ids: Vec<EdgeRef> = match direction {
            Direction::Outgoing => outgoing.copied().collect(),
            Direction::Incoming => incoming.copied().collect(),
            Direction::Both => outgoing.chain(incoming).copied().collect(),
        };
        Ok(ids
            .into_iter()
            .filter_map(|id| inner.edges.get(&id).map(|row| Inner::inflate_edge(id, row)))
            .collect())
    }

    async fn delete_all_matching(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<usize, GraphError> {
        let mut inner = self.write();
        let doomed: Vec<NodeRef> = inner
            .nodes
            .iter()
            .filter(|(_, row)| {
                row.index.family.label() == label && Inner::node_matches_text(row, key, value)
            })
            .map(|(id, _)| *id)
            .collect();
        let count = doomed.len();
        for id in doomed {
            inner.remove_node_cascade(id);
        }
        Ok(count)
    }
}

/// Keeps one [`MemoryGraph`] per URL.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    graphs: Mutex<HashMap<String, Arc<MemoryGraph>>>,
}

impl MemoryConnector {
    /// Empty connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// The concrete graph behind `url`, created on first use.
    pub fn graph(&self, url: &str) -> Arc<MemoryGraph> {
        let mut graphs = self.graphs.lock().unwrap_or_else(|e| e.into_inner());
        graphs
            .entry(url.to_owned())
            .or_insert_with(|| Arc::new(MemoryGraph::new()))
            .clone()
    }
}

impl GraphConnector for MemoryConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn GraphStore>, GraphError> {
        if url.trim().is_empty() {
            return Err(GraphError::Unreachable("empty graph url".into()));
        }
        Ok(self.graph(url))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(v: serde_json::Value) -> Properties {
        v.as_object().cloned().unwrap()
    }

    // ── 1. Upsert ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_merges_into_existing_node() {
        let g = MemoryGraph::new();
        let idx = NodeIndex::virtual_resource("net-1");
        g.upsert(&idx, 1.0, props(json!({"type": "net", "name": "a"})))
            .await
            .unwrap();
        let n = g
            .upsert(&idx, 2.0, props(json!({"name": "b"})))
            .await
            .unwrap();
        assert_eq!(g.node_count(), 1);
        assert_eq!(n.timestamp, 2.0);
        assert_eq!(n.str_prop("name"), Some("b"));
        assert_eq!(n.kind(), Some("net"));
        assert_eq!(n.str_prop("openstack_uuid"), Some("net-1"));
    }

    #[tokio::test]
    async fn strings_read_back_as_written() {
        let g = MemoryGraph::new();
        let idx = NodeIndex::virtual_resource("net-1");
        g.upsert(
            &idx,
            1.0,
            props(json!({"name": "[1,2]", "description": "{}", "attributes": {"mtu": 1500}})),
        )
        .await
        .unwrap();
        let n = g.get(&idx).await.unwrap().unwrap();
        assert_eq!(n.str_prop("name"), Some("[1,2]"));
        assert_eq!(n.str_prop("description"), Some("{}"));
        assert_eq!(n.attributes().unwrap()["mtu"], json!(1500));
    }

    #[tokio::test]
    async fn null_removes_a_property_but_not_the_index_key() {
        let g = MemoryGraph::new();
        let idx = NodeIndex::virtual_resource("net-1");
        g.upsert(&idx, 1.0, props(json!({"name": "a", "status": "up"})))
            .await
            .unwrap();
        let n = g
            .upsert(&idx, 2.0, props(json!({"status": null, "openstack_uuid": null})))
            .await
            .unwrap();
        assert_eq!(n.str_prop("name"), Some("a"));
        assert!(!n.properties.contains_key("status"));
        assert_eq!(n.str_prop("openstack_uuid"), Some("net-1"));
    }

    #[tokio::test]
    async fn update_of_absent_index_is_none() {
        let g = MemoryGraph::new();
        let out = g
            .update(&NodeIndex::virtual_resource("nope"), 1.0, Properties::new())
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(g.node_count(), 0);
    }

    // ── 2. Edges ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn readding_an_edge_relabels_it() {
        let g = MemoryGraph::new();
        let a = g
            .upsert(&NodeIndex::physical("a"), 1.0, Properties::new())
            .await
            .unwrap();
        let b = g
            .upsert(&NodeIndex::physical("b"), 1.0, Properties::new())
            .await
            .unwrap();
        g.add_edge(a.id, b.id, 1.0, "INTERNAL", Properties::new())
            .await
            .unwrap();
        let e = g
            .add_edge(a.id, b.id, 5.0, "runs_on", Properties::new())
            .await
            .unwrap();
        assert_eq!(g.edge_count(), 1);
        assert_eq!(e.label, "runs_on");
        assert_eq!(e.timestamp(), Some(5.0));

        // reverse direction is a different edge
        g.add_edge(b.id, a.id, 1.0, "INTERNAL", Properties::new())
            .await
            .unwrap();
        assert_eq!(g.edge_count(), 2);
    }

    #[tokio::test]
    async fn delete_cascades_to_touching_edges() {
        let g = MemoryGraph::new();
        let a = g
            .upsert(&NodeIndex::physical("a"), 1.0, Properties::new())
            .await
            .unwrap();
        let b = g
            .upsert(&NodeIndex::physical("b"), 1.0, Properties::new())
            .await
            .unwrap();
        let c = g
            .upsert(&NodeIndex::physical("c"), 1.0, Properties::new())
            .await
            .unwrap();
        g.add_edge(a.id, b.id, 1.0, "x", Properties::new())
            .await
            .unwrap();
        g.add_edge(c.id, b.id, 1.0, "x", Properties::new())
            .await
            .unwrap();
        g.add_edge(a.id, c.id, 1.0, "x", Properties::new())
            .await
            .unwrap();

        let gone = g.delete(&NodeIndex::physical("b")).await.unwrap();
        assert!(gone.is_some());
        assert_eq!(g.edge_count(), 1);
        assert!(g
            .edges()
            .iter()
            .all(|e| e.src != b.id && e.dst != b.id));
        assert!(g.delete(&NodeIndex::physical("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_all_matching_uses_label_and_property() {
        let g = MemoryGraph::new();
        g.upsert(
            &NodeIndex::virtual_resource("v1"),
            1.0,
            props(json!({"pop": "p1"})),
        )
        .await
        .unwrap();
        g.upsert(&NodeIndex::physical("h1"), 1.0, props(json!({"pop": "p1"})))
            .await
            .unwrap();
        let n = g
            .delete_all_matching("virtual_resource", "pop", "p1")
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn connector_reuses_graph_per_url() {
        let c = MemoryConnector::new();
        let a = c.graph("mem://pop-a");
        let b = c.graph("mem://pop-a");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(c.connect("  ").is_err());
    }
}
