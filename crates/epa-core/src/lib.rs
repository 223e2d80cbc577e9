// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Topology reconciliation for the EPA controller.
//!
//! Three sources feed one graph per facility: hardware descriptions uploaded
//! by host agents ([`hardware`]), control-plane inventory and its change
//! notifications ([`sync`], [`events`]), and the SDN controller's REST
//! topology ([`sdn`]). Every write goes through [`ResourceStore`] or
//! [`HardwareImporter`], which share one [`GraphWriter`] lock per graph.
//! Reads go through [`TopologyReader`], which rebuilds the relationships no
//! source states outright ([`resolve`]).
#![forbid(unsafe_code)]

pub mod error;
pub mod events;
pub mod facility;
pub mod hardware;
pub mod kind;
pub mod reader;
pub mod reconcile;
pub mod resolve;
pub mod sdn;
pub mod source;
pub mod sync;
pub mod writer;

pub use error::{EpaError, ImportError, SdnError, SourceError};
pub use events::{
    AgentConsumer, AgentEvent, DispatchTable, EventAction, EventDomain, EventHandlers, EventOp,
    Notification, NotificationConsumer, Outcome, AGENTS_NEW,
};
pub use facility::{FacilityContext, FacilityRegistry, PopLink};
pub use hardware::{HardwareImporter, HwGraph, HwInputs, ImportSummary};
pub use kind::{KindSource, KindSpec, ResourceKind};
pub use reader::{Listing, Resource, ResourceRef, TopologyReader};
pub use reconcile::{EdgeSpec, Relation, ResourceStore, StoreRequest};
pub use resolve::{composite_link_id, split_link_id, Link, LinkResolver, LinkTarget};
pub use sdn::{HttpTopologyFetcher, SdnCorrelator, SdnEndpoint, TopologyFetcher};
pub use source::{Collection, InventorySource, ResourceRecord, StaticInventory};
pub use sync::{SyncReport, VirtualSync};
pub use writer::GraphWriter;
