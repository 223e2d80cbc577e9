// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hardware and inventory fixtures.
//!
//! The hwloc document describes one host with a NUMA node, a socket, an L2
//! cache holding two same-depth L1 caches (the nesting the importer
//! repairs), two cores, a NIC behind a bridge and optionally a disk.

use std::io;
use std::path::Path;

/// MAC of the fixture host's NIC.
pub const NIC_MAC: &str = "aa:bb:cc:dd:ee:ff";
/// PCI bus id of the fixture host's NIC.
pub const NIC_BUSID: &str = "0000:01:00.0";

/// hwloc document for `compute-1`, with or without its `sda` disk.
pub fn hwloc_xml(with_disk: bool) -> String {
    let disk = if with_disk {
        r#"
      <object type="PCIDev" os_index="4096" pci_busid="0000:00:1f.2" pci_type="0106">
        <object type="OSDev" name="sda" osdev_type="0">
          <info name="Model" value="SSD 860"/>
        </object>
      </object>"#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE topology SYSTEM "hwloc.dtd">
<topology>
  <object type="Machine" os_index="0" cpuset="0x00000003">
    <info name="DMIProductName" value="S2600WT"/>
    <info name="HostName" value="compute-1"/>
    <object type="NUMANode" os_index="0" cpuset="0x00000003" local_memory="33554432">
      <object type="Socket" os_index="0" cpuset="0x00000003">
        <info name="CPUModel" value="Xeon E5-2680"/>
        <object type="Cache" cpuset="0x00000003" depth="2" cache_type="0" cache_size="262144">
          <object type="Cache" cpuset="0x00000003" depth="1" cache_type="1" cache_size="32768">
            <object type="Cache" cpuset="0x00000003" depth="1" cache_type="2" cache_size="32768">
              <object type="Core" os_index="0" cpuset="0x00000001">
                <object type="PU" os_index="0" cpuset="0x00000001"/>
              </object>
              <object type="Core" os_index="1" cpuset="0x00000002">
                <object type="PU" os_index="1" cpuset="0x00000002"/>
              </object>
            </object>
          </object>
        </object>
      </object>
    </object>
    <object type="Bridge" os_index="0" bridge_type="0-1" depth="0">
      <object type="PCIDev" os_index="4352" pci_busid="{NIC_BUSID}" pci_type="0200">
        <object type="OSDev" name="eth0" osdev_type="2">
          <info name="Address" value="{NIC_MAC}"/>
        </object>
      </object>{disk}
    </object>
  </object>
</topology>
"#
    )
}

/// `/proc/cpuinfo` dump for the fixture's two PUs.
pub const CPUINFO: &str = "\
processor\t: 0
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v3
cpu MHz\t\t: 2500.000
flags\t\t:
cpu-cores\t: 2

processor\t: 1
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v3
cpu MHz\t\t: 2500.000
";

/// The NIC is DPDK-bound.
pub fn dpdk_txt() -> String {
    format!("{NIC_BUSID}\n")
}

/// The NIC has SR-IOV enabled; the malformed line is ignored.
pub fn sriov_txt() -> String {
    format!("{NIC_BUSID} 4 63\nnot a record\n")
}

/// Write a full agent upload for `hostname` into `dir`.
pub fn write_agent_upload(dir: &Path, hostname: &str, with_disk: bool) -> io::Result<()> {
    std::fs::write(dir.join(format!("{hostname}_hwloc.xml")), hwloc_xml(with_disk))?;
    std::fs::write(dir.join(format!("{hostname}_cpuinfo.txt")), CPUINFO)?;
    std::fs::write(dir.join(format!("{hostname}_dpdk.txt")), dpdk_txt())?;
    std::fs::write(dir.join(format!("{hostname}_sriov.txt")), sriov_txt())?;
    Ok(())
}

/// Inventory snapshot of one small tenant deployment on `compute-1`.
///
/// `fip-1` points at port `P1`, which the snapshot does not contain.
pub const INVENTORY_JSON: &str = r#"{
  "controller_services": [
    {"id": "networks", "hostname": "controller-1", "attributes": {"binary": "neutron-server"}},
    {"id": "orchestration", "hostname": "controller-1", "attributes": {"binary": "heat-engine"}}
  ],
  "networks": [
    {"id": "net-1", "name": "private", "attributes": {"status": "ACTIVE"}},
    {"id": "ext-net", "name": "public", "attributes": {"router:external": true}}
  ],
  "ports": [
    {"id": "port-1", "name": "vm-1-eth0",
     "attributes": {"network_id": "net-1", "device_id": "vm-1",
                    "mac_address": "fa:16:3e:00:00:01", "floatingips": []}},
    {"id": "port-r1", "name": "router-gw",
     "attributes": {"network_id": "ext-net", "device_id": "router-1"}}
  ],
  "floating_ips": [
    {"id": "fip-1", "attributes": {"floating_network_id": "ext-net",
                                   "fixed_port_id": "P1",
                                   "floating_ip_address": "203.0.113.7"}}
  ],
  "routers": [
    {"id": "router-1", "name": "edge", "attributes": {"ports": ["port-r1"]}}
  ],
  "volume_services": [
    {"id": "cinder-volume@lvm", "hostname": "compute-1"}
  ],
  "volumes": [
    {"id": "vol-1", "name": "data",
     "attributes": {"volume_service": "cinder-volume@lvm", "instance_uuid": "vm-1", "size": 10}}
  ],
  "snapshots": [
    {"id": "snap-1", "attributes": {"volume_id": "vol-1"}}
  ],
  "hypervisors": [
    {"id": "1", "hostname": "compute-1", "attributes": {"vcpus": 2, "memory_mb": 32768}}
  ],
  "instances": [
    {"id": "vm-1", "name": "web", "hostname": "compute-1",
     "attributes": {"flavor": "m1.small", "status": "ACTIVE"}}
  ],
  "stacks": [
    {"id": "stack-1", "name": "web-tier", "attributes": {"resources": ["vm-1", "vol-1"]}}
  ]
}"#;
