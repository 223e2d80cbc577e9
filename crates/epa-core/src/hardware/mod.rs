// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hardware topology import.
//!
//! An hwloc document becomes an in-memory [`HwGraph`]: one node per object,
//! named deterministically so re-imports of the same host address the same
//! nodes, and an `INTERNAL` edge from every parent to its children. The
//! optional cpuinfo/DPDK/SR-IOV files are merged into node attributes. The
//! result is diffed against the host's stored nodes: everything is upserted,
//! nodes that disappeared are deleted.

pub mod enrich;
pub mod import;
pub mod tree;

pub use enrich::{parse_cpuinfo, parse_dpdk, parse_sriov, sanitize, Enrichment, SriovInfo};
pub use import::{upload_path, HardwareImporter, HwInputs, ImportSummary, PHYSICAL};
pub use tree::{parse_document, unique_name, Category, HwGraph, HwNode, HwObject, INTERNAL_LABEL};
