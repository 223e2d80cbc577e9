// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph store wrapper with switchable failures.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use epa_graph::{
    Direction, Edge, EdgeRef, GraphError, GraphStore, MemoryGraph, Node, NodeIndex, NodeQuery,
    NodeRef, Properties,
};

/// [`GraphStore`] delegating to a [`MemoryGraph`] until told to fail.
///
/// Failing calls return [`GraphError::Unreachable`] without touching the
/// inner graph, so a test can assert nothing was half-written.
#[derive(Debug, Default)]
pub struct FlakyGraph {
    inner: Arc<MemoryGraph>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    attempts: AtomicUsize,
    // attempt number that fails once; 0 when disarmed
    fail_at: AtomicUsize,
}

impl FlakyGraph {
    /// Healthy wrapper over a fresh graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Healthy wrapper over `inner`.
    pub fn wrap(inner: Arc<MemoryGraph>) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// The wrapped graph, for assertions.
    pub fn inner(&self) -> &MemoryGraph {
        &self.inner
    }

    /// Fail every read.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail every write.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Let the next `n` writes through, fail the one after, then recover.
    ///
    /// Simulates a backend dropping out in the middle of a multi-write
    /// operation while staying reachable for the cleanup that follows.
    pub fn fail_write_after(&self, n: usize) {
        let next = self.attempts.load(Ordering::SeqCst) + n + 1;
        self.fail_at.store(next, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<&MemoryGraph, GraphError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GraphError::Unreachable("simulated read failure".into()));
        }
        Ok(&self.inner)
    }

    fn write(&self) -> Result<&MemoryGraph, GraphError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GraphError::Unreachable("simulated write failure".into()));
        }
        if self.fail_at.load(Ordering::SeqCst) == attempt {
            return Err(GraphError::Unreachable(format!(
                "simulated failure of write #{attempt}"
            )));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(&self.inner)
    }
}

#[async_trait]
impl GraphStore for FlakyGraph {
    async fn upsert(
        &self,
        index: &NodeIndex,
        timestamp: f64,
        properties: Properties,
    ) -> Result<Node, GraphError> {
        self.write()?.upsert(index, timestamp, properties).await
    }

    async fn update(
        &self,
        index: &NodeIndex,
        timestamp: f64,
        properties: Properties,
    ) -> Result<Option<Node>, GraphError> {
        self.write()?.update(index, timestamp, properties).await
    }

    async fn delete(&self, index: &NodeIndex) -> Result<Option<Node>, GraphError> {
        self.write()?.delete(index).await
    }

    async fn delete_node(&self, node: NodeRef) -> Result<Option<Node>, GraphError> {
        self.write()?.delete_node(node).await
    }

    async fn get(&self, index: &NodeIndex) -> Result<Option<Node>, GraphError> {
        self.read()?.get(index).await
    }

    async fn node(&self, node: NodeRef) -> Result<Option<Node>, GraphError> {
        self.read()?.node(node).await
    }

    async fn get_by_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<Node>, GraphError> {
        self.read()?.get_by_property(label, key, value).await
    }

    async fn query(&self, query: &NodeQuery) -> Result<Vec<Node>, GraphError> {
        self.read()?.query(query).await
    }

    async fn add_edge(
        &self,
        src: NodeRef,
        dst: NodeRef,
        timestamp: f64,
        label: &str,
        properties: Properties,
    ) -> Result<Edge, GraphError> {
        self.write()?
            .add_edge(src, dst, timestamp, label, properties)
            .await
    }

    async fn get_edge(&self, src: NodeRef, dst: NodeRef) -> Result<Option<Edge>, GraphError> {
        self.read()?.get_edge(src, dst).await
    }

    async fn delete_edge(&self, edge: EdgeRef) -> Result<bool, GraphError> {
        self.write()?.delete_edge(edge).await
    }

    async fn find_edges(&self, key: &str, value: &str) -> Result<Vec<Edge>, GraphError> {
        self.read()?.find_edges(key, value).await
    }

    async fn neighbors(
        &self,
        node: NodeRef,
        direction: Direction,
    ) -> Result<Vec<Edge>, GraphError> {
        self.read()?.neighbors(node, direction).await
    }

    async fn delete_all_matching(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<usize, GraphError> {
        self.write()?.delete_all_matching(label, key, value).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_writes_leave_the_graph_untouched() {
        let graph = FlakyGraph::new();
        graph
            .upsert(&NodeIndex::virtual_resource("n1"), 1.0, Properties::new())
            .await
            .unwrap();
        graph.set_fail_writes(true);
        assert!(graph
            .upsert(&NodeIndex::virtual_resource("n2"), 1.0, Properties::new())
            .await
            .is_err());
        assert_eq!(graph.inner().node_count(), 1);
        assert_eq!(graph.writes(), 1);
        // reads still work
        assert!(graph
            .get(&NodeIndex::virtual_resource("n1"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn armed_failure_hits_exactly_one_write() {
        let graph = FlakyGraph::new();
        graph.fail_write_after(1);
        for (n, expect_ok) in [("a", true), ("b", false), ("c", true)] {
            let out = graph
                .upsert(&NodeIndex::virtual_resource(n), 1.0, Properties::new())
                .await;
            assert_eq!(out.is_ok(), expect_ok, "write {n}");
        }
        assert_eq!(graph.inner().node_count(), 2);
        assert_eq!(graph.writes(), 2);
    }
}
