// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared write handle: a graph plus the one lock all mutations take.

use std::sync::Arc;

use epa_graph::GraphStore;
use tokio::sync::{Mutex, MutexGuard};

/// Graph handle whose clones share a single write lock.
///
/// Every mutating entry point (resource store, hardware import) acquires
/// [`GraphWriter::lock`] for its whole duration, so no two mutations
/// interleave. Reads go straight to [`GraphWriter::graph`].
#[derive(Clone)]
pub struct GraphWriter {
    graph: Arc<dyn GraphStore>,
    lock: Arc<Mutex<()>>,
}

impl GraphWriter {
    /// Wrap `graph` with a fresh lock.
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The underlying graph.
    pub fn graph(&self) -> &dyn GraphStore {
        self.graph.as_ref()
    }

    /// Acquire the write lock.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}
