// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Control-plane inventory sources.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use epa_graph::Properties;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::SourceError;

/// Resource collections a source serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Virtual networks.
    Networks,
    /// Network ports.
    Ports,
    /// Floating IPs.
    FloatingIps,
    /// Routers.
    Routers,
    /// Block volumes.
    Volumes,
    /// Volume snapshots.
    Snapshots,
    /// Block storage services.
    VolumeServices,
    /// Compute hypervisors.
    Hypervisors,
    /// Compute instances.
    Instances,
    /// Orchestration stacks.
    Stacks,
    /// Control-plane services.
    ControllerServices,
}

impl Collection {
    /// Every collection.
    pub const ALL: [Self; 11] = [
        Self::Networks,
        Self::Ports,
        Self::FloatingIps,
        Self::Routers,
        Self::Volumes,
        Self::Snapshots,
        Self::VolumeServices,
        Self::Hypervisors,
        Self::Instances,
        Self::Stacks,
        Self::ControllerServices,
    ];

    /// Snapshot key.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Networks => "networks",
            Self::Ports => "ports",
            Self::FloatingIps => "floating_ips",
            Self::Routers => "routers",
            Self::Volumes => "volumes",
            Self::Snapshots => "snapshots",
            Self::VolumeServices => "volume_services",
            Self::Hypervisors => "hypervisors",
            Self::Instances => "instances",
            Self::Stacks => "stacks",
            Self::ControllerServices => "controller_services",
        }
    }

    /// Inverse of [`Collection::as_str`].
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resource as a source reports it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Source identifier (uuid, hostname or service name).
    pub id: String,
    /// Everything else, `attributes` nested.
    #[serde(flatten)]
    pub properties: Properties,
}

impl ResourceRecord {
    /// Record with empty properties.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: Properties::new(),
        }
    }

    /// Top-level string property.
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Nested attribute.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.properties
            .get("attributes")
            .and_then(Value::as_object)
            .and_then(|attrs| attrs.get(key))
            .filter(|v| !v.is_null())
    }

    /// Nested attribute as a non-empty string.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attribute(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Nested attribute as a list of non-empty strings. A single string
    /// reads as a one-element list.
    pub fn attribute_list(&self, key: &str) -> Vec<String> {
        match self.attribute(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// Where the control plane's resources are read from.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Records of `collection`, only `id` when given.
    async fn fetch(
        &self,
        collection: Collection,
        id: Option<&str>,
    ) -> Result<Vec<ResourceRecord>, SourceError>;
}

/// Collection -> records.
pub type InventorySnapshot = BTreeMap<Collection, Vec<ResourceRecord>>;

/// [`InventorySource`] serving an in-memory snapshot.
///
/// The snapshot is a JSON object keyed by collection name, each value a
/// list of records carrying an `id`.
#[derive(Debug, Default)]
pub struct StaticInventory {
    snapshot: RwLock<InventorySnapshot>,
}

impl StaticInventory {
    /// Serve `snapshot`.
    pub fn new(snapshot: InventorySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Parse a JSON snapshot.
    pub fn from_json(text: &str) -> Result<Self, SourceError> {
        let raw: BTreeMap<String, Vec<ResourceRecord>> =
            serde_json::from_str(text).map_err(|e| SourceError::Decode(e.to_string()))?;
        let mut snapshot = InventorySnapshot::new();
        for (key, records) in raw {
            let collection = Collection::parse(&key)
                .ok_or_else(|| SourceError::Decode(format!("unknown collection `{key}`")))?;
            snapshot.insert(collection, records);
        }
        Ok(Self::new(snapshot))
    }

    /// Read and parse a JSON snapshot file.
    pub async fn load(path: &Path) -> Result<Self, SourceError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SourceError::Unreachable(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Add or replace a record.
    pub async fn insert(&self, collection: Collection, record: ResourceRecord) {
        let mut snapshot = self.snapshot.write().await;
        let records = snapshot.entry(collection).or_default();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Drop a record. Returns whether it existed.
    pub async fn remove(&self, collection: Collection, id: &str) -> bool {
        let mut snapshot = self.snapshot.write().await;
        let Some(records) = snapshot.get_mut(&collection) else {
            return false;
        };
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn fetch(
        &self,
        collection: Collection,
        id: Option<&str>,
    ) -> Result<Vec<ResourceRecord>, SourceError> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .get(&collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| id.is_none_or(|id| r.id == id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_filters_by_id() {
        let inv = StaticInventory::from_json(
            r#"{"ports": [
                {"id": "p1", "name": "a", "attributes": {"network_id": "n1", "floatingips": ["f1", ""]}},
                {"id": "p2"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(inv.fetch(Collection::Ports, None).await.unwrap().len(), 2);
        let p1 = inv.fetch(Collection::Ports, Some("p1")).await.unwrap();
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].str_prop("name"), Some("a"));
        assert_eq!(p1[0].attribute_str("network_id"), Some("n1"));
        assert_eq!(p1[0].attribute_list("floatingips"), vec!["f1"]);
        assert!(inv.fetch(Collection::Routers, None).await.unwrap().is_empty());
    }

    #[test]
    fn unknown_collections_are_rejected() {
        assert!(matches!(
            StaticInventory::from_json(r#"{"images": []}"#),
            Err(SourceError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn insert_replaces_by_id() {
        let inv = StaticInventory::default();
        inv.insert(Collection::Networks, ResourceRecord::new("n1")).await;
        let mut renamed = ResourceRecord::new("n1");
        renamed.properties.insert("name".into(), Value::from("blue"));
        inv.insert(Collection::Networks, renamed).await;
        let nets = inv.fetch(Collection::Networks, None).await.unwrap();
        assert_eq!(nets.len(), 1);
        assert_eq!(nets[0].str_prop("name"), Some("blue"));
        assert!(inv.remove(Collection::Networks, "n1").await);
        assert!(!inv.remove(Collection::Networks, "n1").await);
    }
}
