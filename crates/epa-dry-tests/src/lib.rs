// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for EPA controller crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`fixtures`] - hwloc documents, agent files and inventory snapshots
//! - [`graph`] - Graph store wrapper with switchable failures
//! - [`sdn`] - Scripted SDN controller

pub mod config;
pub mod fixtures;
pub mod graph;
pub mod sdn;

pub use config::InMemoryConfigStore;
pub use graph::FlakyGraph;
pub use sdn::{test_endpoint, ScriptedTopology};
