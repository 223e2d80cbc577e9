// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for the EPA controller (config, settings).
//! Keeps the service binary thin and storage-agnostic.

pub mod config;
pub mod settings;
