// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph store adapter contract.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    Direction, Edge, EdgeRef, IndexFamily, Node, NodeIndex, NodeQuery, NodeRef, Properties,
};

/// Errors raised by a graph backend.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The backend could not be reached or refused the operation.
    #[error("[GRAPH_UNREACHABLE] {0}")]
    Unreachable(String),
    /// A stored row could not be encoded or decoded.
    #[error("[GRAPH_CODEC] {0}")]
    Codec(String),
}

/// Operations the core needs from a labeled property graph.
///
/// Node identity is the [`NodeIndex`]: upserting an index that already
/// exists merges into the stored node. Edges are unique per ordered
/// (src, dst) pair.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the node if absent, otherwise merge `properties` into it.
    /// A null value removes that property. The timestamp is always replaced.
    async fn upsert(
        &self,
        index: &NodeIndex,
        timestamp: f64,
        properties: Properties,
    ) -> Result<Node, GraphError>;

    /// Merge into an existing node. `None` when the index is absent.
    async fn update(
        &self,
        index: &NodeIndex,
        timestamp: f64,
        properties: Properties,
    ) -> Result<Option<Node>, GraphError>;

    /// Delete the node and every edge touching it.
    async fn delete(&self, index: &NodeIndex) -> Result<Option<Node>, GraphError>;

    /// Delete by handle, cascading like [`GraphStore::delete`].
    async fn delete_node(&self, node: NodeRef) -> Result<Option<Node>, GraphError>;

    /// Lookup by index.
    async fn get(&self, index: &NodeIndex) -> Result<Option<Node>, GraphError>;

    /// Lookup by handle. `None` for handles that no longer resolve.
    async fn node(&self, node: NodeRef) -> Result<Option<Node>, GraphError>;

    /// First node under `label` whose property `key` equals `value`.
    async fn get_by_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<Node>, GraphError>;

    /// Nodes matching `query`.
    async fn query(&self, query: &NodeQuery) -> Result<Vec<Node>, GraphError>;

    /// Create or relabel the edge `src -> dst`.
    async fn add_edge(
        &self,
        src: NodeRef,
        dst: NodeRef,
        timestamp: f64,
        label: &str,
        properties: Properties,
    ) -> Result<Edge, GraphError>;

    /// The edge `src -> dst`, if any.
    async fn get_edge(&self, src: NodeRef, dst: NodeRef) -> Result<Option<Edge>, GraphError>;

    /// Remove one edge. Returns whether it existed.
    async fn delete_edge(&self, edge: EdgeRef) -> Result<bool, GraphError>;

    /// Edges whose property `key` equals `value`.
    async fn find_edges(&self, key: &str, value: &str) -> Result<Vec<Edge>, GraphError>;

    /// Edges touching `node` in `direction`.
    async fn neighbors(&self, node: NodeRef, direction: Direction)
        -> Result<Vec<Edge>, GraphError>;

    /// Delete every node under `label` whose `key` equals `value`.
    async fn delete_all_matching(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<usize, GraphError>;
}

/// Lookup by bare identifier across every family, in [`IndexFamily::ALL`] order.
pub async fn resolve_identifier(
    store: &dyn GraphStore,
    identifier: &str,
) -> Result<Option<Node>, GraphError> {
    for family in IndexFamily::ALL {
        if let Some(node) = store.get(&NodeIndex::new(family, identifier)).await? {
            return Ok(Some(node));
        }
    }
    Ok(None)
}

/// Routes a facility's graph URL to a store.
pub trait GraphConnector: Send + Sync {
    /// Open (or reuse) the store behind `url`.
    fn connect(&self, url: &str) -> Result<Arc<dyn GraphStore>, GraphError>;
}
