// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! hwloc document parsing and the in-memory host graph.

use std::collections::{BTreeMap, HashMap};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ImportError;

/// Label of every edge the importer writes.
pub const INTERNAL_LABEL: &str = "INTERNAL";

/// One `<object>` element with its attributes, `<info>` pairs and children.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HwObject {
    /// Native XML attributes.
    pub attrs: BTreeMap<String, String>,
    /// `<info name= value=>` children, in document order.
    pub infos: Vec<(String, String)>,
    /// Nested objects.
    pub children: Vec<HwObject>,
}

impl HwObject {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    fn kind(&self) -> &str {
        self.attr("type").unwrap_or_default()
    }

    fn require(&self, key: &'static str) -> Result<&str, ImportError> {
        self.attr(key).ok_or_else(|| ImportError::MissingAttribute {
            object: self.kind().to_owned(),
            attribute: key,
        })
    }
}

fn element_attrs(e: &BytesStart<'_>) -> Result<BTreeMap<String, String>, ImportError> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ImportError::Parse(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| ImportError::Parse(err.to_string()))?
            .into_owned();
        out.insert(key, value);
    }
    Ok(out)
}

fn attach(obj: HwObject, stack: &mut [HwObject], roots: &mut Vec<HwObject>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(obj),
        None => roots.push(obj),
    }
}

/// Parse an hwloc XML document into its top-level objects.
pub fn parse_document(xml: &str) -> Result<Vec<HwObject>, ImportError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<HwObject> = Vec::new();
    let mut roots: Vec<HwObject> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"object" => {
                stack.push(HwObject {
                    attrs: element_attrs(e)?,
                    ..HwObject::default()
                });
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"object" => {
                let obj = HwObject {
                    attrs: element_attrs(e)?,
                    ..HwObject::default()
                };
                attach(obj, &mut stack, &mut roots);
            }
            Ok(Event::Start(ref e) | Event::Empty(ref e)) if e.name().as_ref() == b"info" => {
                let attrs = element_attrs(e)?;
                if let (Some(top), Some(name), Some(value)) =
                    (stack.last_mut(), attrs.get("name"), attrs.get("value"))
                {
                    top.infos.push((name.clone(), value.clone()));
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"object" => {
                let obj = stack
                    .pop()
                    .ok_or_else(|| ImportError::Parse("unbalanced </object>".into()))?;
                attach(obj, &mut stack, &mut roots);
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(ImportError::Parse(format!(
                    "at byte {}: {err}",
                    reader.buffer_position()
                )))
            }
            Ok(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(ImportError::Parse("unterminated <object>".into()));
    }
    if roots.is_empty() {
        return Err(ImportError::Parse("document has no objects".into()));
    }
    Ok(roots)
}

/// Coarse resource category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    /// Disks and other block devices.
    Storage,
    /// CPUs, memory, co-processors; the default.
    Compute,
    /// NICs and fabrics.
    Network,
}

impl Category {
    /// Classify by hwloc `osdev_type` code.
    pub fn from_osdev_type(code: Option<&str>) -> Self {
        match code.map(str::trim) {
            Some("0") => Self::Storage,
            Some("2" | "3") => Self::Network,
            _ => Self::Compute,
        }
    }

    /// Stored name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Compute => "compute",
            Self::Network => "network",
        }
    }
}

/// Deterministic, re-import-stable node name.
pub fn unique_name(hostname: &str, obj: &HwObject) -> Result<String, ImportError> {
    let kind = obj.require("type")?;
    Ok(match kind {
        "Cache" => format!(
            "{hostname}_Cache_{}_{}_{}",
            obj.require("cpuset")?,
            obj.require("depth")?,
            obj.require("cache_type")?
        ),
        "OSDev" => format!("{hostname}_OSDev_{}", obj.require("name")?),
        "Core" => format!("{hostname}_Core_{}", obj.require("cpuset")?),
        other => format!("{hostname}_{other}_{}", obj.require("os_index")?),
    })
}

/// A hardware node before it is written.
#[derive(Clone, Debug, PartialEq)]
pub struct HwNode {
    /// hwloc object type.
    pub kind: String,
    /// Coarse category.
    pub category: Category,
    /// XML attributes, info pairs and enrichment.
    pub attributes: Map<String, Value>,
}

impl HwNode {
    /// Attribute as a string.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Host graph built from one hwloc document.
#[derive(Clone, Debug, Default)]
pub struct HwGraph {
    hostname: String,
    nodes: BTreeMap<String, HwNode>,
    edges: Vec<(String, String)>,
    // moved cache -> the sibling it was first attached to
    reparented: HashMap<String, String>,
}

impl HwGraph {
    /// Build the graph for `hostname` from parsed top-level objects.
    pub fn build(hostname: &str, roots: &[HwObject]) -> Result<Self, ImportError> {
        let mut graph = Self {
            hostname: hostname.to_owned(),
            ..Self::default()
        };
        for obj in roots {
            graph.walk(obj, None)?;
        }
        Ok(graph)
    }

    /// Parse and build in one step.
    pub fn from_xml(hostname: &str, xml: &str) -> Result<Self, ImportError> {
        Self::build(hostname, &parse_document(xml)?)
    }

    /// Host this graph describes.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Nodes by unique name.
    pub fn nodes(&self) -> &BTreeMap<String, HwNode> {
        &self.nodes
    }

    /// Mutable access for enrichment.
    pub fn nodes_mut(&mut self) -> &mut BTreeMap<String, HwNode> {
        &mut self.nodes
    }

    /// Parent -> child edges in discovery order.
    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    /// True when `parent -> child` exists.
    pub fn has_edge(&self, parent: &str, child: &str) -> bool {
        self.edges.iter().any(|(p, c)| p == parent && c == child)
    }

    fn add_edge(&mut self, parent: &str, child: &str) {
        if !self.has_edge(parent, child) {
            self.edges.push((parent.to_owned(), child.to_owned()));
        }
    }

    fn remove_edge(&mut self, parent: &str, child: &str) {
        self.edges.retain(|(p, c)| !(p == parent && c == child));
    }

    fn first_parent_of(&self, child: &str) -> Option<String> {
        self.edges
            .iter()
            .find(|(_, c)| c == child)
            .map(|(p, _)| p.clone())
    }

    fn walk(&mut self, obj: &HwObject, parent: Option<&str>) -> Result<(), ImportError> {
        let name = unique_name(&self.hostname, obj)?;
        let kind = obj.kind().to_owned();

        let mut attributes: Map<String, Value> = obj
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        for (k, v) in &obj.infos {
            attributes.insert(k.clone(), Value::String(v.clone()));
        }

        self.nodes.insert(
            name.clone(),
            HwNode {
                kind: kind.clone(),
                category: Category::from_osdev_type(obj.attr("osdev_type")),
                attributes,
            },
        );

        if let Some(parent) = parent {
            self.add_edge(parent, &name);
            if let Some(sibling) = self.reparented.get(parent).cloned() {
                self.add_edge(&sibling, &name);
            }
            if kind == "Cache" {
                self.fix_duplicated_cache(parent, &name, obj.attr("depth"));
            }
        }

        for child in &obj.children {
            self.walk(child, Some(&name))?;
        }
        Ok(())
    }

    /// hwloc sometimes nests one L1 cache under its same-depth sibling.
    /// Move such a cache up to the sibling's parent and remember the sibling
    /// so the moved cache's children are attached to both.
    fn fix_duplicated_cache(&mut self, parent: &str, name: &str, depth: Option<&str>) {
        let Some(parent_node) = self.nodes.get(parent) else {
            return;
        };
        if parent_node.kind != "Cache" {
            return;
        }
        let same_depth = matches!(
            (depth, parent_node.attribute("depth")),
            (Some(d), Some(pd)) if d == pd
        );
        if !same_depth {
            return;
        }
        let Some(grandparent) = self.first_parent_of(parent) else {
            debug!(cache = name, "duplicated cache has no grandparent; left in place");
            return;
        };
        self.remove_edge(parent, name);
        self.reparented.insert(name.to_owned(), parent.to_owned());
        self.add_edge(&grandparent, name);
        debug!(cache = name, from = parent, to = %grandparent, "re-parented duplicated cache");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DUP_L1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<topology>
  <object type="Machine" os_index="0" cpuset="0x3">
    <info name="DMIProductName" value="X10"/>
    <object type="Cache" cpuset="0x3" depth="2" cache_type="0" cache_size="262144">
      <object type="Cache" cpuset="0x1" depth="1" cache_type="1">
        <object type="Cache" cpuset="0x1" depth="1" cache_type="2">
          <object type="Core" cpuset="0x1" os_index="0">
            <object type="PU" cpuset="0x1" os_index="0"/>
          </object>
        </object>
      </object>
    </object>
  </object>
</topology>"#;

    #[test]
    fn names_follow_type_rules() {
        let g = HwGraph::from_xml("h1", DUP_L1).unwrap();
        let names: Vec<&str> = g.nodes().keys().map(String::as_str).collect();
        assert!(names.contains(&"h1_Machine_0"));
        assert!(names.contains(&"h1_Cache_0x3_2_0"));
        assert!(names.contains(&"h1_Cache_0x1_1_1"));
        assert!(names.contains(&"h1_Core_0x1"));
        assert!(names.contains(&"h1_PU_0"));
        let machine = &g.nodes()["h1_Machine_0"];
        assert_eq!(machine.attribute("DMIProductName"), Some("X10"));
        assert_eq!(machine.category, Category::Compute);
    }

    #[test]
    fn same_depth_cache_moves_to_grandparent() {
        let g = HwGraph::from_xml("h1", DUP_L1).unwrap();
        assert!(g.has_edge("h1_Cache_0x3_2_0", "h1_Cache_0x1_1_1"));
        assert!(!g.has_edge("h1_Cache_0x1_1_1", "h1_Cache_0x1_1_2"));
        assert!(g.has_edge("h1_Cache_0x3_2_0", "h1_Cache_0x1_1_2"));
        // children of the moved cache hang off it and off the sibling
        assert!(g.has_edge("h1_Cache_0x1_1_2", "h1_Core_0x1"));
        assert!(g.has_edge("h1_Cache_0x1_1_1", "h1_Core_0x1"));
    }

    #[test]
    fn osdev_category_codes() {
        assert_eq!(Category::from_osdev_type(Some("0")), Category::Storage);
        assert_eq!(Category::from_osdev_type(Some("2")), Category::Network);
        assert_eq!(Category::from_osdev_type(Some("3")), Category::Network);
        assert_eq!(Category::from_osdev_type(Some("5")), Category::Compute);
        assert_eq!(Category::from_osdev_type(Some("9")), Category::Compute);
        assert_eq!(Category::from_osdev_type(None), Category::Compute);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(matches!(
            parse_document("<topology><object type=\"Machine\" os_index=\"0\">"),
            Err(ImportError::Parse(_))
        ));
        assert!(matches!(
            parse_document("<topology></topology>"),
            Err(ImportError::Parse(_))
        ));
        assert!(matches!(
            HwGraph::from_xml("h1", "<topology><object type=\"PU\"/></topology>"),
            Err(ImportError::MissingAttribute {
                attribute: "os_index",
                ..
            })
        ));
    }
}
