// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read path: single resources, id listings, single links and bulk
//! listings of one facility.
//!
//! Every request resolves the facility first. Its node names the resource
//! graph and, optionally, the SDN controller; switch kinds are served from
//! the controller, facilities from the registry, everything else from the
//! graph.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use epa_graph::{GraphConnector, NodeQuery, Properties, POP_KEY};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::EpaError;
use crate::facility::{FacilityContext, FacilityRegistry};
use crate::kind::{KindSource, ResourceKind};
use crate::resolve::{Link, LinkResolver, LinkTarget};
use crate::sdn::{SdnCorrelator, TopologyFetcher};

/// A resource with its neighbours.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Resource {
    /// Resource id.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Facility the resource was read from.
    pub pop_id: String,
    /// Properties; top-level strings trimmed and lowercased.
    pub properties: Properties,
    /// Neighbours.
    pub links: Vec<LinkTarget>,
}

/// `(kind, id)` of a listed resource.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceRef {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource id.
    pub id: String,
}

/// Resources of the requested kinds, their links and every link target.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Listing {
    /// Requested resources and link targets, deduplicated.
    pub resources: Vec<ResourceRef>,
    /// Links keyed by id order.
    pub links: Vec<Link>,
}

/// Trim and lowercase top-level string properties.
pub fn normalize(properties: Properties) -> Properties {
    properties
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => (key, Value::String(s.trim().to_lowercase())),
            other => (key, other),
        })
        .collect()
}

/// Facility-scoped reads.
pub struct TopologyReader {
    registry: FacilityRegistry,
    connector: Arc<dyn GraphConnector>,
    fetcher: Arc<dyn TopologyFetcher>,
}

struct Facility {
    context: FacilityContext,
    sdn: Option<Arc<SdnCorrelator>>,
    resolver: LinkResolver,
}

impl Facility {
    fn sdn(&self) -> Result<&SdnCorrelator, EpaError> {
        self.sdn
            .as_deref()
            .ok_or_else(|| EpaError::MissingFacilityConfiguration {
                pop: self.context.id.clone(),
                what: "sdn controller",
            })
    }
}

impl TopologyReader {
    /// Reader over the facilities in `registry`.
    pub fn new(
        registry: FacilityRegistry,
        connector: Arc<dyn GraphConnector>,
        fetcher: Arc<dyn TopologyFetcher>,
    ) -> Self {
        Self {
            registry,
            connector,
            fetcher,
        }
    }

    /// The facility registry.
    pub fn registry(&self) -> &FacilityRegistry {
        &self.registry
    }

    async fn facility(&self, pop: &str) -> Result<Facility, EpaError> {
        let context = self.registry.facility_context(pop).await?;
        let graph = self.connector.connect(&context.graph_url)?;
        let sdn = context.sdn.clone().map(|endpoint| {
            Arc::new(SdnCorrelator::new(Arc::clone(&self.fetcher), endpoint))
        });
        let resolver = LinkResolver::new(self.registry.clone(), graph, sdn.clone());
        Ok(Facility {
            context,
            sdn,
            resolver,
        })
    }

    /// One resource of facility `pop`, with its links.
    ///
    /// Facilities are addressed by `id` alone; `pop` is ignored for them.
    #[instrument(skip(self))]
    pub async fn resource(
        &self,
        pop: &str,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Resource, EpaError> {
        let missing = || EpaError::not_found(format!("/{kind}/{id}"));
        if kind == ResourceKind::Pop {
            let node = self.registry.get_pop(id).await?;
            let links = LinkResolver::for_facilities(self.registry.clone())
                .links_of(kind, id)
                .await?;
            return Ok(Resource {
                id: id.to_owned(),
                kind,
                pop_id: id.to_owned(),
                properties: normalize(node.properties),
                links,
            });
        }

        let facility = self.facility(pop).await?;
        let properties = match kind.spec().source {
            KindSource::SdnSwitch => facility.sdn()?.switch_details(id).await?,
            KindSource::SdnInterface => facility.sdn()?.interface_details(id).await?,
            KindSource::Facility | KindSource::Graph => facility
                .resolver
                .node(kind, id)
                .await?
                .filter(|node| {
                    node.str_prop(POP_KEY) == Some(facility.context.name.as_str())
                        && node
                            .kind()
                            .is_some_and(|k| k.eq_ignore_ascii_case(kind.as_str()))
                })
                .map(|node| node.properties),
        }
        .ok_or_else(missing)?;
        let links = facility.resolver.links_of(kind, id).await?;
        Ok(Resource {
            id: id.to_owned(),
            kind,
            pop_id: facility.context.id,
            properties: normalize(properties),
            links,
        })
    }

    /// Ids of every `kind` resource of facility `pop`.
    ///
    /// Each non-empty `filters` value must occur, ignoring case, somewhere
    /// in a graph resource's serialized attributes. Filters do not apply to
    /// facilities or switch kinds.
    #[instrument(skip(self, filters))]
    pub async fn resource_ids(
        &self,
        pop: &str,
        kind: ResourceKind,
        filters: &[(String, String)],
    ) -> Result<Vec<String>, EpaError> {
        if kind == ResourceKind::Pop {
            return self.registry.pop_ids(None).await;
        }
        let facility = self.facility(pop).await?;
        match kind.spec().source {
            KindSource::SdnSwitch => Ok(facility.sdn()?.switch_ids().await?),
            KindSource::SdnInterface => Ok(facility.sdn()?.all_interfaces().await?),
            KindSource::Facility | KindSource::Graph => {
                let mut query = NodeQuery::new()
                    .family(kind.spec().family())
                    .kind(kind.as_str())
                    .eq(POP_KEY, facility.context.name.as_str());
                for (key, value) in filters {
                    if !key.is_empty() && !value.is_empty() {
                        query = query.attributes_contain(value.as_str());
                    }
                }
                let graph = self.connector.connect(&facility.context.graph_url)?;
                Ok(graph
                    .query(&query)
                    .await?
                    .into_iter()
                    .map(|node| node.identifier().to_owned())
                    .collect())
            }
        }
    }

    /// One link whose source is a `kind` resource of facility `pop`.
    #[instrument(skip(self))]
    pub async fn link(
        &self,
        pop: &str,
        kind: ResourceKind,
        link_id: &str,
    ) -> Result<Link, EpaError> {
        if kind == ResourceKind::Pop {
            return LinkResolver::for_facilities(self.registry.clone())
                .link(kind, link_id)
                .await;
        }
        self.facility(pop).await?.resolver.link(kind, link_id).await
    }

    /// Every resource of `kinds` in facility `pop`, their links, and the
    /// targets of those links.
    #[instrument(skip(self, kinds))]
    pub async fn listing(&self, pop: &str, kinds: &[ResourceKind]) -> Result<Listing, EpaError> {
        let mut resources = BTreeSet::new();
        for &kind in kinds {
            for id in self.resource_ids(pop, kind, &[]).await? {
                resources.insert(ResourceRef { kind, id });
            }
        }

        let needs_facility = resources.iter().any(|r| r.kind != ResourceKind::Pop);
        let resolver = if needs_facility {
            self.facility(pop).await?.resolver
        } else {
            LinkResolver::for_facilities(self.registry.clone())
        };

        let mut links = BTreeMap::new();
        let mut targets = Vec::new();
        for source in &resources {
            for target in resolver.links_of(source.kind, &source.id).await? {
                targets.push(ResourceRef {
                    kind: target.target_kind,
                    id: target.target_id.clone(),
                });
                let link = Link {
                    id: target.link_id.clone(),
                    source_id: source.id.clone(),
                    source_kind: source.kind,
                    target_id: target.target_id,
                    target_kind: target.target_kind,
                    label: target.label,
                    properties: Properties::new(),
                };
                links.entry(target.link_id).or_insert(link);
            }
        }
        resources.extend(targets);
        debug!(
            resources = resources.len(),
            links = links.len(),
            "listing resolved"
        );
        Ok(Listing {
            resources: resources.into_iter().collect(),
            links: links.into_values().collect(),
        })
    }
}
