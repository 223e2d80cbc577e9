// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-time link resolution across the facility graph, the resource graph
//! and the SDN controller.
//!
//! Only facility links and stored edges exist as such. Switch, interface
//! and OS-device links are rebuilt on every read from the controller's
//! topology and the devices' MAC addresses.

use std::sync::Arc;

use epa_graph::{Direction, GraphStore, IndexFamily, Node, NodeIndex, NodeQuery, Properties};
use serde::Serialize;
use tracing::debug;

use crate::error::EpaError;
use crate::facility::FacilityRegistry;
use crate::kind::ResourceKind;
use crate::sdn::SdnCorrelator;

/// Separator of composite link ids.
pub const LINK_SEPARATOR: &str = "->";
/// Label of switch/interface links.
pub const INTERNAL_LINK: &str = "internal";
/// Label of interface/OS-device links.
pub const WIRED_LINK: &str = "wired";
/// OS-device attribute holding its MAC.
pub const MAC_ATTRIBUTE: &str = "Address";

/// `source->target`.
pub fn composite_link_id(source: &str, target: &str) -> String {
    format!("{source}{LINK_SEPARATOR}{target}")
}

/// Split a composite link id at its first separator.
pub fn split_link_id(id: &str) -> Result<(&str, &str), EpaError> {
    match id.split_once(LINK_SEPARATOR) {
        Some((source, target)) if !source.is_empty() && !target.is_empty() => {
            Ok((source, target))
        }
        _ => Err(EpaError::InvalidRequest(format!(
            "link id `{id}` is not `source{LINK_SEPARATOR}target`"
        ))),
    }
}

/// One neighbour of a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinkTarget {
    /// Neighbour id.
    pub target_id: String,
    /// Neighbour kind.
    pub target_kind: ResourceKind,
    /// Id of the link leading to it.
    pub link_id: String,
    /// Relationship label.
    pub label: String,
}

/// A resolved link.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Link {
    /// Link id.
    pub id: String,
    /// Source resource id.
    pub source_id: String,
    /// Source kind.
    pub source_kind: ResourceKind,
    /// Target resource id.
    pub target_id: String,
    /// Target kind.
    pub target_kind: ResourceKind,
    /// Relationship label.
    pub label: String,
    /// Stored edge properties, empty for inferred links.
    pub properties: Properties,
}

impl Link {
    fn inferred(source_id: &str, source_kind: ResourceKind, target: LinkTarget) -> Self {
        Self {
            id: target.link_id,
            source_id: source_id.to_owned(),
            source_kind,
            target_id: target.target_id,
            target_kind: target.target_kind,
            label: target.label,
            properties: Properties::new(),
        }
    }
}

/// Link resolution for one request.
pub struct LinkResolver {
    registry: FacilityRegistry,
    graph: Option<Arc<dyn GraphStore>>,
    sdn: Option<Arc<SdnCorrelator>>,
}

fn node_kind(node: &Node) -> Option<ResourceKind> {
    node.kind().and_then(ResourceKind::parse)
}

impl LinkResolver {
    /// Resolver for facility links only.
    pub fn for_facilities(registry: FacilityRegistry) -> Self {
        Self {
            registry,
            graph: None,
            sdn: None,
        }
    }

    /// Resolver for one facility's resources. Without `sdn`, switch and
    /// OS-device correlation yields nothing.
    pub fn new(
        registry: FacilityRegistry,
        graph: Arc<dyn GraphStore>,
        sdn: Option<Arc<SdnCorrelator>>,
    ) -> Self {
        Self {
            registry,
            graph: Some(graph),
            sdn,
        }
    }

    fn graph(&self) -> Result<&dyn GraphStore, EpaError> {
        self.graph
            .as_deref()
            .ok_or_else(|| EpaError::InvalidRequest("no facility selected".into()))
    }

    /// Stored node of `kind` with `id`.
    pub async fn node(&self, kind: ResourceKind, id: &str) -> Result<Option<Node>, EpaError> {
        let index = NodeIndex::new(kind.spec().family(), id);
        Ok(self.graph()?.get(&index).await?)
    }

    /// Every neighbour of `id`. No match is an empty list, not an error.
    pub async fn links_of(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Vec<LinkTarget>, EpaError> {
        match kind {
            ResourceKind::Pop => Ok(self
                .registry
                .pop_links_from(id)
                .await?
                .into_iter()
                .map(|link| LinkTarget {
                    target_id: link.target,
                    target_kind: ResourceKind::Pop,
                    link_id: link.id,
                    label: link.label,
                })
                .collect()),
            ResourceKind::Switch => self.switch_links(id).await,
            ResourceKind::SwitchInterface => self.interface_links(id).await,
            ResourceKind::OsDev => self.osdev_links(id).await,
            _ => self.stored_links(kind, id).await,
        }
    }

    async fn switch_links(&self, id: &str) -> Result<Vec<LinkTarget>, EpaError> {
        let Some(sdn) = &self.sdn else {
            return Ok(Vec::new());
        };
        Ok(sdn
            .interfaces_of(id)
            .await?
            .into_iter()
            .map(|iface| LinkTarget {
                link_id: composite_link_id(id, &iface),
                target_id: iface,
                target_kind: ResourceKind::SwitchInterface,
                label: INTERNAL_LINK.into(),
            })
            .collect())
    }

    async fn interface_links(&self, id: &str) -> Result<Vec<LinkTarget>, EpaError> {
        let Some(sdn) = &self.sdn else {
            return Ok(Vec::new());
        };
        let mut links = Vec::new();
        if let Some(switch) = sdn.switch_of_interface(id).await? {
            links.push(LinkTarget {
                link_id: composite_link_id(id, &switch),
                target_id: switch,
                target_kind: ResourceKind::Switch,
                label: INTERNAL_LINK.into(),
            });
        }
        if let Some(mac) = sdn.peer_mac_of_interface(id).await? {
            if let Some(osdev) = self.osdev_by_mac(&mac).await? {
                links.push(LinkTarget {
                    link_id: composite_link_id(id, osdev.identifier()),
                    target_id: osdev.identifier().to_owned(),
                    target_kind: ResourceKind::OsDev,
                    label: WIRED_LINK.into(),
                });
            } else {
                debug!(interface = id, mac, "no os device with peer mac");
            }
        }
        Ok(links)
    }

    /// The OS device whose `Address` attribute is `mac`, ignoring case.
    pub async fn osdev_by_mac(&self, mac: &str) -> Result<Option<Node>, EpaError> {
        let devices = self
            .graph()?
            .query(
                &NodeQuery::new()
                    .family(IndexFamily::PhysicalResource)
                    .kind(ResourceKind::OsDev.as_str())
                    .attribute_eq(MAC_ATTRIBUTE, mac.trim()),
            )
            .await?;
        Ok(devices.into_iter().next())
    }

    async fn osdev_links(&self, id: &str) -> Result<Vec<LinkTarget>, EpaError> {
        let Some(sdn) = &self.sdn else {
            return Ok(Vec::new());
        };
        let Some(device) = self.node(ResourceKind::OsDev, id).await? else {
            return Ok(Vec::new());
        };
        let Some(mac) = device.attribute_str(MAC_ATTRIBUTE) else {
            return Ok(Vec::new());
        };
        Ok(sdn
            .interface_by_mac(mac)
            .await?
            .map(|iface| LinkTarget {
                link_id: composite_link_id(id, &iface),
                target_id: iface,
                target_kind: ResourceKind::SwitchInterface,
                label: WIRED_LINK.into(),
            })
            .into_iter()
            .collect())
    }

    async fn stored_links(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Vec<LinkTarget>, EpaError> {
        let graph = self.graph()?;
        let Some(node) = self.node(kind, id).await? else {
            return Ok(Vec::new());
        };
        let mut links = Vec::new();
        for edge in graph.neighbors(node.id, Direction::Outgoing).await? {
            let Some(target) = graph.node(edge.dst).await? else {
                debug!(source = id, "skipping dangling edge");
                continue;
            };
            let Some(target_kind) = node_kind(&target) else {
                debug!(source = id, target = target.identifier(), "skipping untyped target");
                continue;
            };
            links.push(LinkTarget {
                link_id: composite_link_id(id, target.identifier()),
                target_id: target.identifier().to_owned(),
                target_kind,
                label: edge.label,
            });
        }
        Ok(links)
    }

    /// Resolve a link id whose source is of `kind`.
    ///
    /// Facility links are addressed by their own id; every other link by
    /// `source->target`.
    pub async fn link(&self, kind: ResourceKind, link_id: &str) -> Result<Link, EpaError> {
        if kind == ResourceKind::Pop {
            let link = self.registry.pop_link(link_id).await?;
            return Ok(Link {
                id: link.id,
                source_id: link.source,
                source_kind: ResourceKind::Pop,
                target_id: link.target,
                target_kind: ResourceKind::Pop,
                label: link.label,
                properties: link.properties,
            });
        }
        let (source, target) = split_link_id(link_id)?;
        let missing = || EpaError::not_found(format!("/link/{kind}/{link_id}"));
        match kind {
            ResourceKind::Switch | ResourceKind::SwitchInterface | ResourceKind::OsDev => self
                .links_of(kind, source)
                .await?
                .into_iter()
                .find(|t| t.target_id == target)
                .map(|t| Link::inferred(source, kind, t))
                .ok_or_else(missing),
            _ => {
                // the target id may exist in several families; only the
                // source's own edges say which node is meant
                let graph = self.graph()?;
                let src = self.node(kind, source).await?.ok_or_else(missing)?;
                for edge in graph.neighbors(src.id, Direction::Outgoing).await? {
                    let Some(dst) = graph.node(edge.dst).await? else {
                        continue;
                    };
                    if dst.identifier() != target {
                        continue;
                    }
                    let Some(target_kind) = node_kind(&dst) else {
                        continue;
                    };
                    return Ok(Link {
                        id: link_id.to_owned(),
                        source_id: source.to_owned(),
                        source_kind: kind,
                        target_id: target.to_owned(),
                        target_kind,
                        label: edge.label,
                        properties: edge.properties,
                    });
                }
                Err(missing())
            }
        }
    }
}
