// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Facility (PoP) registry.
//!
//! Facilities live in their own graph, separate from the per-facility
//! resource graphs. Each facility node carries the URL of its resource
//! graph and, optionally, its SDN controller endpoint and credentials.
//! Facility-to-facility links are `is_connected_to` edges addressed by a
//! caller-supplied `uuid` property.

use std::sync::Arc;

use epa_graph::{
    Direction, Edge, GraphStore, IndexFamily, Node, NodeIndex, NodeQuery, Properties, TYPE_KEY,
};
use serde_json::Value;
use tracing::instrument;

use crate::error::EpaError;
use crate::kind::ResourceKind;
use crate::sdn::SdnEndpoint;
use crate::writer::GraphWriter;

/// Facility resource-graph URL property.
pub const GRAPH_URL_KEY: &str = "occi.epa.pop.graph_db_url";
/// Facility name property.
pub const NAME_KEY: &str = "occi.epa.pop.name";
/// SDN controller URL property.
pub const ODL_URL_KEY: &str = "occi.epa.pop.odl_url";
/// SDN controller user property.
pub const ODL_NAME_KEY: &str = "occi.epa.pop.odl_name";
/// SDN controller password property.
pub const ODL_PASSWORD_KEY: &str = "occi.epa.pop.odl_password";
/// Label of facility-to-facility edges.
pub const POP_LINK_LABEL: &str = "is_connected_to";
/// Edge property holding a facility link's id.
pub const LINK_UUID_KEY: &str = "uuid";

/// What a request against one facility needs to know.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacilityContext {
    /// Facility id.
    pub id: String,
    /// Facility name; resources carry it as their `pop` property.
    pub name: String,
    /// Resource graph URL.
    pub graph_url: String,
    /// SDN controller, when all three of its properties are present.
    pub sdn: Option<SdnEndpoint>,
}

impl FacilityContext {
    /// The SDN endpoint, or [`EpaError::MissingFacilityConfiguration`].
    pub fn require_sdn(&self) -> Result<&SdnEndpoint, EpaError> {
        self.sdn
            .as_ref()
            .ok_or_else(|| EpaError::MissingFacilityConfiguration {
                pop: self.id.clone(),
                what: "sdn controller",
            })
    }
}

/// A stored facility-to-facility link.
#[derive(Clone, Debug, PartialEq)]
pub struct PopLink {
    /// Link id (`uuid` edge property).
    pub id: String,
    /// Source facility id.
    pub source: String,
    /// Target facility id.
    pub target: String,
    /// Edge label.
    pub label: String,
    /// Edge properties.
    pub properties: Properties,
}

/// Facility CRUD over the facility graph.
#[derive(Clone)]
pub struct FacilityRegistry {
    writer: GraphWriter,
}

fn text<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.str_prop(key).map(str::trim).filter(|s| !s.is_empty())
}

impl FacilityRegistry {
    /// Registry over the facility graph.
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            writer: GraphWriter::new(graph),
        }
    }

    /// Facility graph, for reads.
    pub fn graph(&self) -> &dyn GraphStore {
        self.writer.graph()
    }

    /// Create or merge facility `id`.
    #[instrument(skip(self, properties))]
    pub async fn create_pop(
        &self,
        id: &str,
        mut properties: Properties,
        ts: f64,
    ) -> Result<Node, EpaError> {
        properties.insert(TYPE_KEY.into(), Value::from(ResourceKind::Pop.as_str()));
        let _guard = self.writer.lock().await;
        Ok(self
            .writer
            .graph()
            .upsert(&NodeIndex::pop(id), ts, properties)
            .await?)
    }

    /// Merge into an existing facility.
    pub async fn update_pop(
        &self,
        id: &str,
        mut properties: Properties,
        ts: f64,
    ) -> Result<Node, EpaError> {
        properties.insert(TYPE_KEY.into(), Value::from(ResourceKind::Pop.as_str()));
        let _guard = self.writer.lock().await;
        self.writer
            .graph()
            .update(&NodeIndex::pop(id), ts, properties)
            .await?
            .ok_or_else(|| EpaError::not_found(format!("/pop/{id}")))
    }

    /// Delete a facility and its links. Absent is a no-op.
    pub async fn delete_pop(&self, id: &str) -> Result<Option<Node>, EpaError> {
        let _guard = self.writer.lock().await;
        Ok(self.writer.graph().delete(&NodeIndex::pop(id)).await?)
    }

    /// Facility `id`.
    pub async fn get_pop(&self, id: &str) -> Result<Node, EpaError> {
        self.graph()
            .get(&NodeIndex::pop(id))
            .await?
            .ok_or_else(|| EpaError::not_found(format!("/pop/{id}")))
    }

    /// Facility ids, optionally only those named `name` (ignoring case).
    pub async fn pop_ids(&self, name: Option<&str>) -> Result<Vec<String>, EpaError> {
        let pops = self
            .graph()
            .query(&NodeQuery::new().family(IndexFamily::Pop))
            .await?;
        Ok(pops
            .into_iter()
            .filter(|pop| {
                name.is_none_or(|wanted| {
                    text(pop, NAME_KEY).is_some_and(|n| n.eq_ignore_ascii_case(wanted.trim()))
                })
            })
            .map(|pop| pop.identifier().to_owned())
            .collect())
    }

    /// Link two existing facilities under `link_id`.
    #[instrument(skip(self))]
    pub async fn add_pop_link(
        &self,
        link_id: &str,
        source: &str,
        target: &str,
        ts: f64,
    ) -> Result<Edge, EpaError> {
        let _guard = self.writer.lock().await;
        let graph = self.writer.graph();
        let src = graph
            .get(&NodeIndex::pop(source))
            .await?
            .ok_or_else(|| EpaError::not_found(format!("/pop/{source}")))?;
        let dst = graph
            .get(&NodeIndex::pop(target))
            .await?
            .ok_or_else(|| EpaError::not_found(format!("/pop/{target}")))?;
        let mut properties = Properties::new();
        properties.insert(LINK_UUID_KEY.into(), Value::from(link_id));
        Ok(graph
            .add_edge(src.id, dst.id, ts, POP_LINK_LABEL, properties)
            .await?)
    }

    async fn edge_by_id(&self, link_id: &str) -> Result<Option<Edge>, EpaError> {
        Ok(self
            .graph()
            .find_edges(LINK_UUID_KEY, link_id)
            .await?
            .into_iter()
            .next())
    }

    async fn to_pop_link(&self, edge: Edge) -> Result<Option<PopLink>, EpaError> {
        let graph = self.graph();
        let (Some(src), Some(dst)) = (graph.node(edge.src).await?, graph.node(edge.dst).await?)
        else {
            return Ok(None);
        };
        let id = edge
            .properties
            .get(LINK_UUID_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        Ok(Some(PopLink {
            id,
            source: src.identifier().to_owned(),
            target: dst.identifier().to_owned(),
            label: edge.label,
            properties: edge.properties,
        }))
    }

    /// Link `link_id`.
    pub async fn pop_link(&self, link_id: &str) -> Result<PopLink, EpaError> {
        let missing = || EpaError::not_found(format!("/link/pop/{link_id}"));
        let edge = self.edge_by_id(link_id).await?.ok_or_else(missing)?;
        self.to_pop_link(edge).await?.ok_or_else(missing)
    }

    /// `(source, target)` facility ids of `link_id`.
    pub async fn pop_link_endpoints(&self, link_id: &str) -> Result<(String, String), EpaError> {
        let link = self.pop_link(link_id).await?;
        Ok((link.source, link.target))
    }

    /// Remove link `link_id`. Returns whether it existed.
    pub async fn delete_pop_link(&self, link_id: &str) -> Result<bool, EpaError> {
        let _guard = self.writer.lock().await;
        let Some(edge) = self.edge_by_id(link_id).await? else {
            return Ok(false);
        };
        Ok(self.writer.graph().delete_edge(edge.id).await?)
    }

    /// Links leaving facility `id` that carry a link id.
    pub async fn pop_links_from(&self, id: &str) -> Result<Vec<PopLink>, EpaError> {
        let graph = self.graph();
        let Some(pop) = graph.get(&NodeIndex::pop(id)).await? else {
            return Ok(Vec::new());
        };
        let mut links = Vec::new();
        for edge in graph.neighbors(pop.id, Direction::Outgoing).await? {
            if let Some(link) = self.to_pop_link(edge).await? {
                if !link.id.is_empty() {
                    links.push(link);
                }
            }
        }
        Ok(links)
    }

    /// Resolve what requests against facility `id` need.
    pub async fn facility_context(&self, id: &str) -> Result<FacilityContext, EpaError> {
        let pop = self.get_pop(id).await?;
        let missing = |what| EpaError::MissingFacilityConfiguration {
            pop: id.to_owned(),
            what,
        };
        let graph_url = text(&pop, GRAPH_URL_KEY).ok_or_else(|| missing("graph url"))?;
        let name = text(&pop, NAME_KEY).ok_or_else(|| missing("name"))?;
        let sdn = match (
            text(&pop, ODL_URL_KEY),
            text(&pop, ODL_NAME_KEY),
            pop.str_prop(ODL_PASSWORD_KEY),
        ) {
            (Some(url), Some(username), Some(password)) => Some(SdnEndpoint {
                url: url.to_owned(),
                username: username.to_owned(),
                password: password.to_owned(),
            }),
            _ => None,
        };
        Ok(FacilityContext {
            id: id.to_owned(),
            name: name.to_owned(),
            graph_url: graph_url.to_owned(),
            sdn,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use epa_graph::MemoryGraph;
    use serde_json::json;

    fn registry() -> FacilityRegistry {
        FacilityRegistry::new(Arc::new(MemoryGraph::new()))
    }

    fn props(v: Value) -> Properties {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn context_requires_graph_url_and_name() {
        let reg = registry();
        reg.create_pop("p1", props(json!({NAME_KEY: "Dublin"})), 1.0)
            .await
            .unwrap();
        let err = reg.facility_context("p1").await.unwrap_err();
        assert!(err.is_not_found());

        reg.update_pop("p1", props(json!({GRAPH_URL_KEY: "memory://dub"})), 2.0)
            .await
            .unwrap();
        let ctx = reg.facility_context("p1").await.unwrap();
        assert_eq!(ctx.name, "Dublin");
        assert!(ctx.sdn.is_none());
        assert!(ctx.require_sdn().unwrap_err().is_not_found());

        assert!(reg.facility_context("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn sdn_endpoint_needs_all_three_properties() {
        let reg = registry();
        reg.create_pop(
            "p1",
            props(json!({
                NAME_KEY: "a", GRAPH_URL_KEY: "memory://a",
                ODL_URL_KEY: "http://odl", ODL_NAME_KEY: "admin", ODL_PASSWORD_KEY: "secret"
            })),
            1.0,
        )
        .await
        .unwrap();
        let sdn = reg.facility_context("p1").await.unwrap().sdn.unwrap();
        assert_eq!(sdn.username, "admin");
        assert_eq!(sdn.password, "secret");
    }

    #[tokio::test]
    async fn pop_links_are_addressed_by_uuid() {
        let reg = registry();
        for (id, name) in [("p1", "Dublin"), ("p2", "Milan")] {
            reg.create_pop(id, props(json!({NAME_KEY: name})), 1.0)
                .await
                .unwrap();
        }
        assert!(reg
            .add_pop_link("l1", "p1", "missing", 1.0)
            .await
            .unwrap_err()
            .is_not_found());
        reg.add_pop_link("l1", "p1", "p2", 2.0).await.unwrap();

        assert_eq!(
            reg.pop_link_endpoints("l1").await.unwrap(),
            ("p1".to_owned(), "p2".to_owned())
        );
        let link = reg.pop_link("l1").await.unwrap();
        assert_eq!(link.label, POP_LINK_LABEL);
        assert_eq!(reg.pop_links_from("p1").await.unwrap().len(), 1);
        assert!(reg.pop_links_from("p2").await.unwrap().is_empty());
        assert_eq!(reg.pop_ids(Some("milan")).await.unwrap(), vec!["p2"]);
        assert_eq!(reg.pop_ids(None).await.unwrap().len(), 2);

        assert!(reg.delete_pop_link("l1").await.unwrap());
        assert!(!reg.delete_pop_link("l1").await.unwrap());
        assert!(reg.pop_link("l1").await.unwrap_err().is_not_found());
    }
}
