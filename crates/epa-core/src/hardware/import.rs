// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Diff-and-prune import of one host's hardware graph.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use epa_graph::{
    now_epoch, IndexFamily, NodeIndex, NodeQuery, Properties, ATTRIBUTES_KEY, HOSTNAME_KEY,
    POP_KEY, RESOURCE_TYPE_KEY, TYPE_KEY,
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::enrich::Enrichment;
use super::tree::{HwGraph, INTERNAL_LABEL};
use crate::error::ImportError;
use crate::writer::GraphWriter;

/// `resource_type` of every hardware node.
pub const PHYSICAL: &str = "physical";

/// Raw per-host inputs.
#[derive(Clone, Debug, Default)]
pub struct HwInputs {
    /// hwloc XML document.
    pub hwloc: String,
    /// `/proc/cpuinfo` dump.
    pub cpuinfo: Option<String>,
    /// DPDK-bound PCI bus ids.
    pub dpdk: Option<String>,
    /// SR-IOV counts.
    pub sriov: Option<String>,
}

/// Path of one agent upload, `<dir>/<host>_<suffix>`.
pub fn upload_path(dir: &Path, hostname: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{hostname}_{suffix}"))
}

async fn read_optional(path: PathBuf) -> Option<String> {
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Some(text),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            warn!(path = %path.display(), %err, "skipping unreadable enrichment file");
            None
        }
    }
}

impl HwInputs {
    /// Only the hwloc document.
    pub fn new(hwloc: impl Into<String>) -> Self {
        Self {
            hwloc: hwloc.into(),
            ..Self::default()
        }
    }

    /// Collect the files an agent uploaded for `hostname`.
    ///
    /// The hwloc document is required; the others degrade to `None`.
    pub async fn from_dir(dir: &Path, hostname: &str) -> Result<Self, ImportError> {
        let path = upload_path(dir, hostname, "hwloc.xml");
        let hwloc = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ImportError::Io { path, source })?;
        Ok(Self {
            hwloc,
            cpuinfo: read_optional(upload_path(dir, hostname, "cpuinfo.txt")).await,
            dpdk: read_optional(upload_path(dir, hostname, "dpdk.txt")).await,
            sriov: read_optional(upload_path(dir, hostname, "sriov.txt")).await,
        })
    }

    /// Parse and enrich into a host graph without touching the store.
    pub fn build(&self, hostname: &str) -> Result<HwGraph, ImportError> {
        let mut graph = HwGraph::from_xml(hostname, &self.hwloc)?;
        Enrichment::parse(
            self.cpuinfo.as_deref(),
            self.dpdk.as_deref(),
            self.sriov.as_deref(),
        )
        .apply(&mut graph);
        Ok(graph)
    }
}

/// What one import changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Nodes written.
    pub upserted: usize,
    /// Stale nodes removed.
    pub deleted: usize,
    /// Edges written.
    pub edges: usize,
}

/// Writes host graphs into the facility graph.
#[derive(Clone)]
pub struct HardwareImporter {
    writer: GraphWriter,
    pop: String,
}

impl HardwareImporter {
    /// Importer for facility `pop`, sharing `writer`'s lock.
    pub fn new(writer: GraphWriter, pop: impl Into<String>) -> Self {
        Self {
            writer,
            pop: pop.into(),
        }
    }

    /// Parse, enrich and store. Parse errors abort before any write.
    #[instrument(skip(self, inputs))]
    pub async fn import(
        &self,
        hostname: &str,
        inputs: &HwInputs,
    ) -> Result<ImportSummary, ImportError> {
        let graph = inputs.build(hostname)?;
        self.apply(&graph).await
    }

    /// Import from an agent upload directory.
    pub async fn import_dir(
        &self,
        dir: &Path,
        hostname: &str,
    ) -> Result<ImportSummary, ImportError> {
        let inputs = HwInputs::from_dir(dir, hostname).await?;
        self.import(hostname, &inputs).await
    }

    fn node_properties(&self, hostname: &str, name: &str, node: &super::HwNode) -> Properties {
        let mut props = Properties::new();
        props.insert(RESOURCE_TYPE_KEY.into(), Value::from(PHYSICAL));
        props.insert("category".into(), Value::from(node.category.as_str()));
        props.insert(TYPE_KEY.into(), Value::from(node.kind.as_str()));
        props.insert(HOSTNAME_KEY.into(), Value::from(hostname));
        props.insert(POP_KEY.into(), Value::from(self.pop.as_str()));
        props.insert(
            ATTRIBUTES_KEY.into(),
            Value::Object(node.attributes.clone()),
        );
        props.insert(
            IndexFamily::PhysicalResource.key().into(),
            Value::from(name),
        );
        props
    }

    /// Diff `graph` against what is stored for its host.
    pub async fn apply(&self, graph: &HwGraph) -> Result<ImportSummary, ImportError> {
        let hostname = graph.hostname();
        let _guard = self.writer.lock().await;
        let store = self.writer.graph();
        let timestamp = now_epoch();

        let stored = store
            .query(
                &NodeQuery::new()
                    .family(IndexFamily::PhysicalResource)
                    .eq(HOSTNAME_KEY, hostname)
                    .eq(RESOURCE_TYPE_KEY, PHYSICAL),
            )
            .await?;

        let mut summary = ImportSummary::default();
        let mut refs = HashMap::with_capacity(graph.nodes().len());
        for (name, node) in graph.nodes() {
            let props = self.node_properties(hostname, name, node);
            let stored = store
                .upsert(&NodeIndex::physical(name.as_str()), timestamp, props)
                .await?;
            refs.insert(name.as_str(), stored.id);
            summary.upserted += 1;
        }

        for old in stored {
            if !graph.nodes().contains_key(old.identifier()) {
                store.delete(&old.index).await?;
                summary.deleted += 1;
            }
        }

        for (parent, child) in graph.edges() {
            if let (Some(src), Some(dst)) = (refs.get(parent.as_str()), refs.get(child.as_str())) {
                store
                    .add_edge(*src, *dst, timestamp, INTERNAL_LABEL, Properties::new())
                    .await?;
                summary.edges += 1;
            }
        }

        info!(
            hostname,
            upserted = summary.upserted,
            deleted = summary.deleted,
            edges = summary.edges,
            "hardware import complete"
        );
        Ok(summary)
    }
}
