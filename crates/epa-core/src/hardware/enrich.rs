// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CPU, DPDK and SR-IOV enrichment from the agents' flat files.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use super::tree::HwGraph;

/// Lowercase, trim, and replace `-` with `_`.
pub fn sanitize(raw: &str) -> String {
    raw.trim().to_lowercase().replace('-', "_")
}

/// Parse `/proc/cpuinfo`-style text into per-processor attribute maps.
///
/// A key containing `processor` opens a new entry keyed by its numeric
/// value. Lines before the first processor and empty values are dropped.
pub fn parse_cpuinfo(text: &str) -> BTreeMap<u32, Map<String, Value>> {
    let mut processors = BTreeMap::new();
    let mut current: Option<u32> = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = sanitize(key);
        let value = sanitize(value);
        if value.is_empty() {
            continue;
        }
        if key.contains("processor") {
            current = value.parse().ok();
            if let Some(id) = current {
                let mut entry = Map::new();
                entry.insert("id".into(), Value::String(value));
                processors.insert(id, entry);
            }
            continue;
        }
        if let Some(entry) = current.and_then(|id| processors.get_mut(&id)) {
            entry.insert(key, Value::String(value));
        }
    }
    processors
}

/// One PCI bus id per line.
pub fn parse_dpdk(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(sanitize)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Virtual-function counts for one PCI device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SriovInfo {
    /// Enabled VFs.
    pub numvfs: String,
    /// Maximum VFs.
    pub totalvfs: String,
}

/// `busid numvfs totalvfs` per line; other lines are ignored.
pub fn parse_sriov(text: &str) -> BTreeMap<String, SriovInfo> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [busid, numvfs, totalvfs] => Some((
                    sanitize(busid),
                    SriovInfo {
                        numvfs: (*numvfs).to_owned(),
                        totalvfs: (*totalvfs).to_owned(),
                    },
                )),
                _ => None,
            }
        })
        .collect()
}

/// Optional enrichment inputs for one host.
#[derive(Clone, Debug, Default)]
pub struct Enrichment {
    /// Per-processor attributes keyed by `os_index`.
    pub cpuinfo: BTreeMap<u32, Map<String, Value>>,
    /// DPDK-bound PCI bus ids.
    pub dpdk: BTreeSet<String>,
    /// SR-IOV counts keyed by PCI bus id.
    pub sriov: BTreeMap<String, SriovInfo>,
}

impl Enrichment {
    /// Parse whichever files are present.
    pub fn parse(cpuinfo: Option<&str>, dpdk: Option<&str>, sriov: Option<&str>) -> Self {
        Self {
            cpuinfo: cpuinfo.map(parse_cpuinfo).unwrap_or_default(),
            dpdk: dpdk.map(parse_dpdk).unwrap_or_default(),
            sriov: sriov.map(parse_sriov).unwrap_or_default(),
        }
    }

    /// Merge into the host graph's node attributes.
    pub fn apply(&self, graph: &mut HwGraph) {
        for node in graph.nodes_mut().values_mut() {
            if node.kind == "PU" {
                let cpu = node
                    .attribute("os_index")
                    .and_then(|idx| idx.trim().parse::<u32>().ok())
                    .and_then(|idx| self.cpuinfo.get(&idx));
                if let Some(cpu) = cpu {
                    for (k, v) in cpu {
                        node.attributes.insert(k.clone(), v.clone());
                    }
                }
            }
            let Some(busid) = node.attribute("pci_busid").map(sanitize) else {
                continue;
            };
            if self.dpdk.contains(&busid) {
                node.attributes.insert("dpdk".into(), Value::Bool(true));
            }
            if let Some(info) = self.sriov.get(&busid) {
                node.attributes.insert(
                    "sriov".into(),
                    json!({"numvfs": info.numvfs, "totalvfs": info.totalvfs}),
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cpuinfo_groups_lines_by_processor() {
        let text = "\
stray: ignored
processor\t: 0
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v2 @ 2.80GHz
power management:

processor\t: 1
cpu MHz\t\t: 1200.000
";
        let cpus = parse_cpuinfo(text);
        assert_eq!(cpus.len(), 2);
        assert_eq!(cpus[&0]["id"], "0");
        assert_eq!(cpus[&0]["vendor_id"], "genuineintel");
        assert_eq!(
            cpus[&0]["model name"],
            "intel(r) xeon(r) cpu e5_2680 v2 @ 2.80ghz"
        );
        assert!(!cpus[&0].contains_key("power management"));
        assert!(!cpus[&0].contains_key("stray"));
        assert_eq!(cpus[&1]["cpu mhz"], "1200.000");
    }

    #[test]
    fn sriov_requires_three_fields() {
        let table = parse_sriov("0000:03:00.0 4 63\nbad line\n0000:04:00.0 1 2 3\n");
        assert_eq!(table.len(), 1);
        assert_eq!(table["0000:03:00.0"].numvfs, "4");
        assert_eq!(table["0000:03:00.0"].totalvfs, "63");
    }

    #[test]
    fn dpdk_ignores_blank_lines() {
        let set = parse_dpdk("0000:01:00.0\n\n  0000:01:00.1 \n");
        assert_eq!(set.len(), 2);
        assert!(set.contains("0000:01:00.1"));
    }
}
