// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource kinds and the kind table.
//!
//! Every kind the read path serves has one [`KindSpec`] row saying where
//! its resources come from and whether they are physical. Lookups go
//! through [`ResourceKind::spec`]; nothing dispatches on the kind elsewhere.

use std::fmt;

use epa_graph::IndexFamily;
use serde::{Deserialize, Serialize};

/// Resource kinds known to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Facility (point of presence).
    Pop,
    /// Physical SDN switch.
    Switch,
    /// Port on a physical SDN switch.
    SwitchInterface,
    /// OS-visible device (NIC, disk, ...).
    #[serde(rename = "osdev")]
    OsDev,
    /// Whole host.
    Machine,
    /// NUMA node.
    #[serde(rename = "numanode")]
    NumaNode,
    /// CPU package.
    Socket,
    /// CPU cache.
    Cache,
    /// CPU core.
    Core,
    /// Processing unit (hardware thread).
    Pu,
    /// PCI or host bridge.
    Bridge,
    /// PCI device.
    #[serde(rename = "pcidev")]
    PciDev,
    /// Compute instance.
    Vm,
    /// Virtual network.
    Net,
    /// Virtual network port.
    Port,
    /// Virtual router.
    Router,
    /// Floating IP address.
    #[serde(rename = "floatingip")]
    FloatingIp,
    /// Block storage volume.
    Volume,
    /// Volume snapshot.
    Snapshot,
    /// Block storage service.
    CinderVolume,
    /// Orchestration stack.
    Stack,
    /// Compute hypervisor.
    Hypervisor,
    /// Control-plane service.
    ControllerService,
}

/// Where a kind's resources live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindSource {
    /// Facility registry.
    Facility,
    /// SDN controller switch inventory.
    SdnSwitch,
    /// SDN controller connector inventory.
    SdnInterface,
    /// The facility's graph.
    Graph,
}

/// One row of the kind table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindSpec {
    /// The kind.
    pub kind: ResourceKind,
    /// Backing source.
    pub source: KindSource,
    /// Hardware rather than control-plane resource.
    pub physical: bool,
}

impl KindSpec {
    const fn graph(kind: ResourceKind, physical: bool) -> Self {
        Self {
            kind,
            source: KindSource::Graph,
            physical,
        }
    }

    /// Index family graph-backed resources of this kind are stored under.
    pub const fn family(&self) -> IndexFamily {
        match self.kind {
            ResourceKind::Pop => IndexFamily::Pop,
            ResourceKind::Hypervisor => IndexFamily::Hypervisor,
            ResourceKind::ControllerService => IndexFamily::ControllerService,
            _ if self.physical => IndexFamily::PhysicalResource,
            _ => IndexFamily::VirtualResource,
        }
    }
}

const KIND_TABLE: [KindSpec; 23] = [
    KindSpec {
        kind: ResourceKind::Pop,
        source: KindSource::Facility,
        physical: false,
    },
    KindSpec {
        kind: ResourceKind::Switch,
        source: KindSource::SdnSwitch,
        physical: true,
    },
    KindSpec {
        kind: ResourceKind::SwitchInterface,
        source: KindSource::SdnInterface,
        physical: true,
    },
    KindSpec::graph(ResourceKind::OsDev, true),
    KindSpec::graph(ResourceKind::Machine, true),
    KindSpec::graph(ResourceKind::NumaNode, true),
    KindSpec::graph(ResourceKind::Socket, true),
    KindSpec::graph(ResourceKind::Cache, true),
    KindSpec::graph(ResourceKind::Core, true),
    KindSpec::graph(ResourceKind::Pu, true),
    KindSpec::graph(ResourceKind::Bridge, true),
    KindSpec::graph(ResourceKind::PciDev, true),
    KindSpec::graph(ResourceKind::Vm, false),
    KindSpec::graph(ResourceKind::Net, false),
    KindSpec::graph(ResourceKind::Port, false),
    KindSpec::graph(ResourceKind::Router, false),
    KindSpec::graph(ResourceKind::FloatingIp, false),
    KindSpec::graph(ResourceKind::Volume, false),
    KindSpec::graph(ResourceKind::Snapshot, false),
    KindSpec::graph(ResourceKind::CinderVolume, false),
    KindSpec::graph(ResourceKind::Stack, false),
    KindSpec::graph(ResourceKind::Hypervisor, false),
    KindSpec::graph(ResourceKind::ControllerService, false),
];

impl ResourceKind {
    /// Every kind, in table order.
    pub fn all() -> impl Iterator<Item = Self> {
        KIND_TABLE.iter().map(|spec| spec.kind)
    }

    /// Wire name, also the lowercased `type` property of stored nodes.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pop => "pop",
            Self::Switch => "switch",
            Self::SwitchInterface => "switch-interface",
            Self::OsDev => "osdev",
            Self::Machine => "machine",
            Self::NumaNode => "numanode",
            Self::Socket => "socket",
            Self::Cache => "cache",
            Self::Core => "core",
            Self::Pu => "pu",
            Self::Bridge => "bridge",
            Self::PciDev => "pcidev",
            Self::Vm => "vm",
            Self::Net => "net",
            Self::Port => "port",
            Self::Router => "router",
            Self::FloatingIp => "floatingip",
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
            Self::CinderVolume => "cinder-volume",
            Self::Stack => "stack",
            Self::Hypervisor => "hypervisor",
            Self::ControllerService => "controller-service",
        }
    }

    /// Parse a wire name or stored `type`, ignoring case.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::all().find(|k| k.as_str().eq_ignore_ascii_case(raw))
    }

    /// This kind's table row.
    pub fn spec(self) -> KindSpec {
        KIND_TABLE
            .iter()
            .copied()
            .find(|spec| spec.kind == self)
            .unwrap_or(KindSpec::graph(self, false))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hwloc_types_parse_case_insensitively() {
        assert_eq!(ResourceKind::parse("OSDev"), Some(ResourceKind::OsDev));
        assert_eq!(ResourceKind::parse("PCIDev"), Some(ResourceKind::PciDev));
        assert_eq!(ResourceKind::parse("NUMANode"), Some(ResourceKind::NumaNode));
        assert_eq!(ResourceKind::parse("PU"), Some(ResourceKind::Pu));
        assert_eq!(ResourceKind::parse("Group"), None);
    }

    #[test]
    fn table_covers_every_kind_once() {
        for kind in ResourceKind::all() {
            assert_eq!(kind.spec().kind, kind);
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::all().count(), KIND_TABLE.len());
    }

    #[test]
    fn families_follow_physical_flag() {
        assert_eq!(
            ResourceKind::PciDev.spec().family(),
            IndexFamily::PhysicalResource
        );
        assert_eq!(
            ResourceKind::Port.spec().family(),
            IndexFamily::VirtualResource
        );
        assert_eq!(
            ResourceKind::Hypervisor.spec().family(),
            IndexFamily::Hypervisor
        );
        assert_eq!(ResourceKind::Switch.spec().source, KindSource::SdnSwitch);
    }

    #[test]
    fn serde_names_match_wire_names() {
        for kind in ResourceKind::all() {
            let json = serde_json::to_string(&kind).unwrap_or_default();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
