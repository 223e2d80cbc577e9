// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used)]
//! Read-path link resolution across the graph and the SDN controller.

use std::sync::Arc;

use epa_core::facility::{GRAPH_URL_KEY, NAME_KEY, ODL_NAME_KEY, ODL_PASSWORD_KEY, ODL_URL_KEY};
use epa_core::resolve::{INTERNAL_LINK, WIRED_LINK};
use epa_core::{
    EpaError, FacilityRegistry, GraphWriter, HardwareImporter, HwInputs, LinkTarget,
    ResourceKind, ResourceRef, ResourceStore, StaticInventory, TopologyReader, VirtualSync,
};
use epa_dry_tests::fixtures::{hwloc_xml, INVENTORY_JSON, NIC_MAC};
use epa_dry_tests::ScriptedTopology;
use epa_graph::{MemoryConnector, MemoryGraph, Properties};
use serde_json::Value;

const POP: &str = "pop-a";
const POP_NAME: &str = "alpha";
const OSDEV: &str = "compute-1_OSDev_eth0";
const UPLINK: &str = "openflow:1:2";

struct Rig {
    reader: TopologyReader,
    graph: Arc<MemoryGraph>,
    store: ResourceStore,
}

fn facility_properties(with_sdn: bool) -> Properties {
    let mut props = Properties::new();
    props.insert(NAME_KEY.into(), Value::from(POP_NAME));
    props.insert(GRAPH_URL_KEY.into(), Value::from("memory://alpha"));
    if with_sdn {
        props.insert(ODL_URL_KEY.into(), Value::from("http://odl.test:8181"));
        props.insert(ODL_NAME_KEY.into(), Value::from("admin"));
        props.insert(ODL_PASSWORD_KEY.into(), Value::from("admin"));
    }
    props
}

/// One facility with `compute-1` imported, cabled to `openflow:1:2`.
async fn rig(with_sdn: bool) -> Rig {
    let connector = Arc::new(MemoryConnector::new());
    let registry = FacilityRegistry::new(connector.graph("memory://pops"));
    registry
        .create_pop(POP, facility_properties(with_sdn), 1.0)
        .await
        .unwrap();

    let graph = connector.graph("memory://alpha");
    let writer = GraphWriter::new(graph.clone());
    HardwareImporter::new(writer.clone(), POP_NAME)
        .import("compute-1", &HwInputs::new(hwloc_xml(false)))
        .await
        .unwrap();

    // the controller reports the host MAC upper-cased
    let script = Arc::new(
        ScriptedTopology::new()
            .physical_switch("openflow:1", "SN-1", &["openflow:1:1", UPLINK])
            .software_switch("openflow:9", &["openflow:9:1"])
            .host_link(UPLINK, &NIC_MAC.to_uppercase()),
    );
    Rig {
        reader: TopologyReader::new(registry, connector, script),
        graph,
        store: ResourceStore::new(writer, POP_NAME),
    }
}

#[tokio::test]
async fn os_device_resolves_to_exactly_one_switch_interface() {
    let rig = rig(true).await;
    let device = rig
        .reader
        .resource(POP, ResourceKind::OsDev, OSDEV)
        .await
        .unwrap();
    assert_eq!(device.pop_id, POP);
    assert_eq!(
        device.links,
        vec![LinkTarget {
            target_id: UPLINK.into(),
            target_kind: ResourceKind::SwitchInterface,
            link_id: format!("{OSDEV}->{UPLINK}"),
            label: WIRED_LINK.into(),
        }]
    );
}

#[tokio::test]
async fn switch_interface_links_to_its_switch_and_the_cabled_device() {
    let rig = rig(true).await;
    let iface = rig
        .reader
        .resource(POP, ResourceKind::SwitchInterface, UPLINK)
        .await
        .unwrap();
    assert_eq!(iface.properties["name"], Value::from("eth1"));
    let targets: Vec<(&str, ResourceKind, &str)> = iface
        .links
        .iter()
        .map(|l| (l.target_id.as_str(), l.target_kind, l.label.as_str()))
        .collect();
    assert_eq!(
        targets,
        vec![
            ("openflow:1", ResourceKind::Switch, INTERNAL_LINK),
            (OSDEV, ResourceKind::OsDev, WIRED_LINK),
        ]
    );

    // a port with nothing cabled only sees its switch
    let idle = rig
        .reader
        .resource(POP, ResourceKind::SwitchInterface, "openflow:1:1")
        .await
        .unwrap();
    assert_eq!(idle.links.len(), 1);
}

#[tokio::test]
async fn software_switches_are_not_listed() {
    let rig = rig(true).await;
    let switches = rig
        .reader
        .resource_ids(POP, ResourceKind::Switch, &[])
        .await
        .unwrap();
    assert_eq!(switches, vec!["openflow:1"]);
    let err = rig
        .reader
        .resource(POP, ResourceKind::Switch, "openflow:9")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn composite_link_ids_round_trip() {
    let rig = rig(true).await;
    let inferred = rig
        .reader
        .link(POP, ResourceKind::OsDev, &format!("{OSDEV}->{UPLINK}"))
        .await
        .unwrap();
    assert_eq!(inferred.source_id, OSDEV);
    assert_eq!(inferred.target_id, UPLINK);
    assert_eq!(inferred.target_kind, ResourceKind::SwitchInterface);
    assert_eq!(inferred.label, WIRED_LINK);

    let pcidev = "compute-1_PCIDev_4352";
    let stored = rig
        .reader
        .link(POP, ResourceKind::PciDev, &format!("{pcidev}->{OSDEV}"))
        .await
        .unwrap();
    assert_eq!(stored.id, format!("{pcidev}->{OSDEV}"));
    assert_eq!(stored.source_kind, ResourceKind::PciDev);
    assert_eq!(stored.target_kind, ResourceKind::OsDev);
    assert_eq!(stored.label, epa_core::hardware::INTERNAL_LABEL);
}

#[tokio::test]
async fn malformed_and_unknown_link_ids_are_rejected() {
    let rig = rig(true).await;
    let err = rig
        .reader
        .link(POP, ResourceKind::PciDev, "no-arrow-here")
        .await
        .unwrap_err();
    assert!(matches!(err, EpaError::InvalidRequest(_)));

    let err = rig
        .reader
        .link(POP, ResourceKind::PciDev, "compute-1_PCIDev_4352->ghost")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn without_a_controller_device_links_are_empty() {
    let rig = rig(false).await;
    let device = rig
        .reader
        .resource(POP, ResourceKind::OsDev, OSDEV)
        .await
        .unwrap();
    assert!(device.links.is_empty());

    let err = rig
        .reader
        .resource_ids(POP, ResourceKind::Switch, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EpaError::MissingFacilityConfiguration { .. }
    ));
}

#[tokio::test]
async fn floating_ip_with_missing_fixed_port_reads_cleanly() {
    let rig = rig(true).await;
    let source = Arc::new(StaticInventory::from_json(INVENTORY_JSON).unwrap());
    let report = VirtualSync::new(rig.store.clone(), source)
        .full_import()
        .await
        .unwrap();
    assert!(report.total() > 0);

    let fip = rig
        .reader
        .resource(POP, ResourceKind::FloatingIp, "fip-1")
        .await
        .unwrap();
    let to_port = fip
        .links
        .iter()
        .find(|l| l.target_id == "P1")
        .unwrap();
    assert_eq!(to_port.target_kind, ResourceKind::Port);
    assert_eq!(to_port.label, "associated_with");
    assert!(fip.links.iter().any(|l| l.target_id == "ext-net"));

    // the placeholder is a typed port of this facility
    let placeholder = rig
        .reader
        .resource(POP, ResourceKind::Port, "P1")
        .await
        .unwrap();
    assert_eq!(placeholder.properties["pop"], Value::from(POP_NAME));
    assert!(rig.graph.node_count() > 13);
}

#[tokio::test]
async fn attribute_filters_narrow_id_listings() {
    let rig = rig(true).await;
    let source = Arc::new(StaticInventory::from_json(INVENTORY_JSON).unwrap());
    VirtualSync::new(rig.store.clone(), source)
        .full_import()
        .await
        .unwrap();

    let mut ports = rig
        .reader
        .resource_ids(POP, ResourceKind::Port, &[])
        .await
        .unwrap();
    ports.sort();
    assert_eq!(ports, vec!["P1", "port-1", "port-r1"]);

    let filtered = rig
        .reader
        .resource_ids(
            POP,
            ResourceKind::Port,
            &[("device_id".into(), "VM-1".into())],
        )
        .await
        .unwrap();
    assert_eq!(filtered, vec!["port-1"]);
}

#[tokio::test]
async fn listing_unions_resources_with_their_link_targets() {
    let rig = rig(true).await;
    let listing = rig
        .reader
        .listing(POP, &[ResourceKind::OsDev, ResourceKind::Switch])
        .await
        .unwrap();

    let has = |kind, id: &str| {
        listing
            .resources
            .contains(&ResourceRef { kind, id: id.into() })
    };
    assert!(has(ResourceKind::OsDev, OSDEV));
    assert!(has(ResourceKind::Switch, "openflow:1"));
    // pulled in as link targets
    assert!(has(ResourceKind::SwitchInterface, UPLINK));
    assert!(has(ResourceKind::SwitchInterface, "openflow:1:1"));
    assert!(!has(ResourceKind::Switch, "openflow:9"));

    let ids: Vec<&str> = listing.links.iter().map(|l| l.id.as_str()).collect();
    assert!(ids.contains(&format!("{OSDEV}->{UPLINK}").as_str()));
    assert!(ids.contains(&"openflow:1->openflow:1:1"));
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn facilities_link_to_each_other() {
    let rig = rig(false).await;
    let registry = rig.reader.registry();
    registry
        .create_pop("pop-b", facility_properties(false), 1.0)
        .await
        .unwrap();
    registry
        .add_pop_link("wan-1", POP, "pop-b", 2.0)
        .await
        .unwrap();

    // the pop argument is ignored for facilities
    let pop = rig
        .reader
        .resource("anything", ResourceKind::Pop, POP)
        .await
        .unwrap();
    assert_eq!(pop.links.len(), 1);
    assert_eq!(pop.links[0].target_id, "pop-b");
    assert_eq!(pop.links[0].link_id, "wan-1");

    let link = rig
        .reader
        .link(POP, ResourceKind::Pop, "wan-1")
        .await
        .unwrap();
    assert_eq!((link.source_id.as_str(), link.target_id.as_str()), (POP, "pop-b"));

    let mut ids = rig
        .reader
        .resource_ids(POP, ResourceKind::Pop, &[])
        .await
        .unwrap();
    ids.sort();
    assert_eq!(ids, vec![POP, "pop-b"]);
}
