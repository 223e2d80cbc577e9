// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Labeled property graph for the EPA topology controller.
//!
//! Nodes are identified by a [`NodeIndex`]: one of five fixed index families
//! plus a value. Within a family the value is unique, so writes are upserts.
//! Edges are unique per ordered (src, dst) pair; adding an existing edge
//! relabels and re-timestamps it.
//!
//! [`GraphStore`] is the adapter contract the rest of the controller depends
//! on. [`MemoryGraph`] implements it in-process.
#![forbid(unsafe_code)]

pub mod codec;
pub mod memory;
pub mod model;
pub mod store;

pub use memory::{MemoryConnector, MemoryGraph};
pub use model::{
    now_epoch, Direction, Edge, EdgeRef, IndexFamily, Node, NodeIndex, NodeQuery, NodeRef,
    Properties, ATTRIBUTES_KEY, HOSTNAME_KEY, POP_KEY, RESOURCE_TYPE_KEY, TIMESTAMP_KEY, TYPE_KEY,
};
pub use store::{resolve_identifier, GraphConnector, GraphError, GraphStore};
