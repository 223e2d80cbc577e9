// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Node, edge and index types for the topology graph.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property map carried by nodes and edges.
///
/// Values may be nested; the backend flattens them (see [`crate::codec`]).
pub type Properties = serde_json::Map<String, Value>;

/// Property key holding a node's resource type (`vm`, `port`, `PCIDev`, ...).
pub const TYPE_KEY: &str = "type";
/// Property key holding the nested attribute map.
pub const ATTRIBUTES_KEY: &str = "attributes";
/// Property key holding the last-write epoch time.
pub const TIMESTAMP_KEY: &str = "timestamp";
/// Property key holding the owning facility.
pub const POP_KEY: &str = "pop";
/// Property key holding the host a resource lives on.
pub const HOSTNAME_KEY: &str = "hostname";
/// Property key distinguishing `physical` and `virtual` resources.
pub const RESOURCE_TYPE_KEY: &str = "resource_type";

/// The fixed set of index namespaces.
///
/// Each family is a (label, key) pair; together with a value it names
/// exactly one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexFamily {
    /// Hardware objects, keyed by `physical_name`.
    PhysicalResource,
    /// Control-plane resources, keyed by `openstack_uuid`.
    VirtualResource,
    /// Control-plane services, keyed by `name`.
    ControllerService,
    /// Compute hypervisors, keyed by `hostname`.
    Hypervisor,
    /// Facilities, keyed by `uuid`.
    Pop,
}

impl IndexFamily {
    /// All families in lookup order.
    pub const ALL: [Self; 5] = [
        Self::VirtualResource,
        Self::PhysicalResource,
        Self::Hypervisor,
        Self::ControllerService,
        Self::Pop,
    ];

    /// Node label of this family.
    pub const fn label(self) -> &'static str {
        match self {
            Self::PhysicalResource => "physical_resource",
            Self::VirtualResource => "virtual_resource",
            Self::ControllerService => "controller_service",
            Self::Hypervisor => "hypervisor",
            Self::Pop => "pop",
        }
    }

    /// Index key of this family.
    pub const fn key(self) -> &'static str {
        match self {
            Self::PhysicalResource => "physical_name",
            Self::VirtualResource => "openstack_uuid",
            Self::ControllerService => "name",
            Self::Hypervisor => HOSTNAME_KEY,
            Self::Pop => "uuid",
        }
    }

    /// Resolve a family from its label.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.label() == label)
    }
}

impl fmt::Display for IndexFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// (family, value) pair that uniquely identifies a node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIndex {
    /// Index namespace.
    pub family: IndexFamily,
    /// Identifier within the namespace.
    pub value: String,
}

impl NodeIndex {
    /// Build an index in `family`.
    pub fn new(family: IndexFamily, value: impl Into<String>) -> Self {
        Self {
            family,
            value: value.into(),
        }
    }

    /// `physical_resource/physical_name` index.
    pub fn physical(name: impl Into<String>) -> Self {
        Self::new(IndexFamily::PhysicalResource, name)
    }

    /// `virtual_resource/openstack_uuid` index.
    pub fn virtual_resource(uuid: impl Into<String>) -> Self {
        Self::new(IndexFamily::VirtualResource, uuid)
    }

    /// `hypervisor/hostname` index.
    pub fn hypervisor(hostname: impl Into<String>) -> Self {
        Self::new(IndexFamily::Hypervisor, hostname)
    }

    /// `controller_service/name` index.
    pub fn controller_service(name: impl Into<String>) -> Self {
        Self::new(IndexFamily::ControllerService, name)
    }

    /// `pop/uuid` index.
    pub fn pop(uuid: impl Into<String>) -> Self {
        Self::new(IndexFamily::Pop, uuid)
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}={}", self.family.label(), self.family.key(), self.value)
    }
}

/// Backend handle for a stored node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef(pub u64);

/// Backend handle for a stored edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeRef(pub u64);

/// A stored node as seen by the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Backend handle.
    pub id: NodeRef,
    /// Unique index of this node.
    pub index: NodeIndex,
    /// Last-write epoch time.
    pub timestamp: f64,
    /// All other properties, nested values inflated.
    pub properties: Properties,
}

impl Node {
    /// External identifier (the index value).
    pub fn identifier(&self) -> &str {
        &self.index.value
    }

    /// String property lookup.
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Raw `type` property.
    pub fn kind(&self) -> Option<&str> {
        self.str_prop(TYPE_KEY)
    }

    /// Nested attribute map, if present.
    pub fn attributes(&self) -> Option<&Properties> {
        self.properties.get(ATTRIBUTES_KEY).and_then(Value::as_object)
    }

    /// Single attribute as a string, when it is one.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes()
            .and_then(|attrs| attrs.get(key))
            .and_then(Value::as_str)
    }
}

/// A stored directed edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Backend handle.
    pub id: EdgeRef,
    /// Source node.
    pub src: NodeRef,
    /// Target node.
    pub dst: NodeRef,
    /// Relationship type.
    pub label: String,
    /// Edge properties, always including `timestamp`.
    pub properties: Properties,
}

impl Edge {
    /// Last-write epoch time of this edge.
    pub fn timestamp(&self) -> Option<f64> {
        self.properties.get(TIMESTAMP_KEY).and_then(Value::as_f64)
    }

    /// The node on the far side of `from`.
    pub fn other(&self, from: NodeRef) -> NodeRef {
        if self.src == from {
            self.dst
        } else {
            self.src
        }
    }
}

/// Which side of a node to walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Edges ending at the node.
    Incoming,
    /// Edges starting at the node.
    Outgoing,
    /// Both.
    Both,
}

/// Typed node filter for [`crate::GraphStore::query`].
///
/// All conditions are conjunctive. An empty query matches every node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeQuery {
    /// Restrict to one family.
    pub family: Option<IndexFamily>,
    /// `type` compared case-insensitively.
    pub kind: Option<String>,
    /// Exact equality on top-level properties.
    pub equals: Vec<(String, Value)>,
    /// Case-insensitive equality on fields of the nested attribute map.
    pub attribute_equals: Vec<(String, String)>,
    /// Case-insensitive substring match over the serialized attribute map.
    pub attributes_contain: Vec<String>,
}

impl NodeQuery {
    /// Empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to `family`.
    pub fn family(mut self, family: IndexFamily) -> Self {
        self.family = Some(family);
        self
    }

    /// Restrict to resources whose `type` equals `kind` ignoring case.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Require `key == value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((key.into(), value.into()));
        self
    }

    /// Require `attributes.key == value` ignoring case.
    pub fn attribute_eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attribute_equals.push((key.into(), value.into()));
        self
    }

    /// Require the serialized attributes to contain `needle`.
    pub fn attributes_contain(mut self, needle: impl Into<String>) -> Self {
        self.attributes_contain.push(needle.into());
        self
    }

    /// Evaluate the filter against an inflated node.
    pub fn matches(&self, node: &Node) -> bool {
        if self.family.is_some_and(|f| f != node.index.family) {
            return false;
        }
        if let Some(kind) = &self.kind {
            match node.kind() {
                Some(k) if k.eq_ignore_ascii_case(kind) => {}
                _ => return false,
            }
        }
        for (key, value) in &self.equals {
            if node.properties.get(key) != Some(value) {
                return false;
            }
        }
        for (key, value) in &self.attribute_equals {
            match node.attribute_str(key) {
                Some(v) if v.eq_ignore_ascii_case(value) => {}
                _ => return false,
            }
        }
        if !self.attributes_contain.is_empty() {
            let haystack = node
                .attributes()
                .map(|attrs| Value::Object(attrs.clone()).to_string().to_lowercase())
                .unwrap_or_default();
            if !self
                .attributes_contain
                .iter()
                .all(|needle| haystack.contains(&needle.to_lowercase()))
            {
                return false;
            }
        }
        true
    }
}

/// Seconds since the Unix epoch, as written into `timestamp` properties.
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
