// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pulls control-plane records from an [`InventorySource`] into the
//! facility graph through the [`ResourceStore`].

use std::sync::Arc;

use epa_graph::{
    now_epoch, IndexFamily, NodeIndex, Properties, HOSTNAME_KEY, RESOURCE_TYPE_KEY, TYPE_KEY,
};
use serde_json::Value;
use tracing::{info, instrument};

use crate::error::EpaError;
use crate::kind::ResourceKind;
use crate::reconcile::{Relation, ResourceStore, StoreRequest, VNF};
use crate::source::{Collection, InventorySource, ResourceRecord};

/// `resource_type` of control-plane resources.
pub const VIRTUAL: &str = "virtual";
/// Controller service managing networks.
pub const NETWORKS_SERVICE: &str = "networks";
/// Controller service managing stacks.
pub const ORCHESTRATION_SERVICE: &str = "orchestration";

/// Per-collection counts of one import.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// `(collection, records stored)` in import order.
    pub stored: Vec<(Collection, usize)>,
}

impl SyncReport {
    /// Sum over every collection.
    pub fn total(&self) -> usize {
        self.stored.iter().map(|(_, n)| n).sum()
    }
}

/// Record-to-graph mapping for every collection.
#[derive(Clone)]
pub struct VirtualSync {
    store: ResourceStore,
    source: Arc<dyn InventorySource>,
}

fn properties(record: &ResourceRecord, kind: ResourceKind, resource_type: &str) -> Properties {
    let mut props = record.properties.clone();
    props.insert(TYPE_KEY.into(), Value::from(kind.as_str()));
    props
        .entry(RESOURCE_TYPE_KEY)
        .or_insert_with(|| Value::from(resource_type));
    props
}

fn request(record: &ResourceRecord, kind: ResourceKind, ts: f64, update: bool) -> StoreRequest {
    StoreRequest::new(
        NodeIndex::virtual_resource(record.id.as_str()),
        properties(record, kind, VIRTUAL),
        ts,
    )
    .update(update)
}

impl VirtualSync {
    /// Sync from `source` through `store`.
    pub fn new(store: ResourceStore, source: Arc<dyn InventorySource>) -> Self {
        Self { store, source }
    }

    /// The write path.
    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    async fn fetch(
        &self,
        collection: Collection,
        id: Option<&str>,
    ) -> Result<Vec<ResourceRecord>, EpaError> {
        Ok(self.source.fetch(collection, id).await?)
    }

    async fn put(&self, request: StoreRequest) -> Result<usize, EpaError> {
        Ok(usize::from(self.store.store(request).await?.is_some()))
    }

    /// Controller services, attached to their hosts.
    pub async fn add_controller_services(&self, name: Option<&str>) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let records = self.fetch(Collection::ControllerServices, name).await?;
        for record in &records {
            let props = properties(record, ResourceKind::ControllerService, "service");
            self.store
                .store_controller_service(&record.id, props, ts)
                .await?;
        }
        Ok(records.len())
    }

    /// Networks, managed by the networking service.
    pub async fn add_networks(&self, id: Option<&str>, update: bool) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let mut stored = 0;
        for record in self.fetch(Collection::Networks, id).await? {
            let req = request(&record, ResourceKind::Net, ts, update)
                .controller_service(NETWORKS_SERVICE);
            stored += self.put(req).await?;
        }
        Ok(stored)
    }

    /// Ports, with their network, owning device and floating IPs.
    pub async fn add_ports(&self, id: Option<&str>, update: bool) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let mut stored = 0;
        for record in self.fetch(Collection::Ports, id).await? {
            let mut req = request(&record, ResourceKind::Port, ts, update);
            if let Some(net) = record.attribute_str("network_id") {
                req = req.out_edge(net, Relation::NetworkOfPort.spec());
            }
            if let Some(device) = record.attribute_str("device_id") {
                req = req.in_edge(device, Relation::DeviceOfPort.spec());
            }
            for fip in record.attribute_list("floatingips") {
                req = req.out_edge(fip, Relation::FloatingIpOfPort.spec());
            }
            stored += self.put(req).await?;
        }
        Ok(stored)
    }

    /// Floating IPs, with their network and fixed port. The fixed port is
    /// re-synced so it picks up its real properties.
    pub async fn add_floating_ips(
        &self,
        id: Option<&str>,
        update: bool,
    ) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let mut stored = 0;
        for record in self.fetch(Collection::FloatingIps, id).await? {
            let mut req = request(&record, ResourceKind::FloatingIp, ts, update);
            let network = record
                .attribute_str("floating_network_id")
                .or_else(|| record.attribute_str("network_id"));
            if let Some(net) = network {
                req = req.out_edge(net, Relation::NetworkOfFloatingIp.spec());
            }
            let fixed_port = record.attribute_str("fixed_port_id");
            if let Some(port) = fixed_port {
                req = req.out_edge(port, Relation::PortOfFloatingIp.spec());
            }
            stored += self.put(req).await?;
            if let Some(port) = fixed_port {
                self.add_ports(Some(port), true).await?;
            }
        }
        Ok(stored)
    }

    /// Routers, syncing each of their ports first.
    pub async fn add_routers(&self, id: Option<&str>, update: bool) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let mut stored = 0;
        for record in self.fetch(Collection::Routers, id).await? {
            let mut req = request(&record, ResourceKind::Router, ts, update);
            for port in record.attribute_list("ports") {
                self.add_ports(Some(&port), false).await?;
                req = req.out_edge(port, Relation::PortOfRouter.spec());
            }
            stored += self.put(req).await?;
        }
        Ok(stored)
    }

    /// Block storage services, attached to their hosts.
    pub async fn add_volume_services(&self, id: Option<&str>) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let mut stored = 0;
        for record in self.fetch(Collection::VolumeServices, id).await? {
            let mut req = request(&record, ResourceKind::CinderVolume, ts, false);
            if let Some(host) = record.str_prop(HOSTNAME_KEY) {
                req = req.host(host);
            }
            stored += self.put(req).await?;
        }
        Ok(stored)
    }

    /// Snapshots, under their volume.
    pub async fn add_snapshots(&self, id: Option<&str>, update: bool) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let mut stored = 0;
        for record in self.fetch(Collection::Snapshots, id).await? {
            let mut req = request(&record, ResourceKind::Snapshot, ts, update);
            if let Some(volume) = record.attribute_str("volume_id") {
                req = req.in_edge(volume, Relation::VolumeOfSnapshot.spec());
            }
            stored += self.put(req).await?;
        }
        Ok(stored)
    }

    /// Volumes, with their source snapshot, service and attached instance.
    pub async fn add_volumes(&self, id: Option<&str>, update: bool) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let mut stored = 0;
        for record in self.fetch(Collection::Volumes, id).await? {
            let mut req = request(&record, ResourceKind::Volume, ts, update);
            if let Some(snapshot) = record.attribute_str("snapshot_id") {
                req = req.out_edge(snapshot, Relation::SnapshotOfVolume.spec());
            }
            if let Some(service) = record.attribute_str("volume_service") {
                req = req.out_edge(service, Relation::ServiceOfVolume.spec());
            }
            if let Some(instance) = record.attribute_str("instance_uuid") {
                req = req.in_edge(instance, Relation::InstanceOfVolume.spec());
            }
            stored += self.put(req).await?;
        }
        Ok(stored)
    }

    /// Hypervisors, keyed by hostname.
    pub async fn add_hypervisors(&self, hostname: Option<&str>) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let mut stored = 0;
        for record in self.fetch(Collection::Hypervisors, None).await? {
            let host = record
                .str_prop(HOSTNAME_KEY)
                .unwrap_or(record.id.as_str())
                .to_owned();
            if hostname.is_some_and(|wanted| wanted != host) {
                continue;
            }
            let props = properties(&record, ResourceKind::Hypervisor, "service");
            self.store.store_hypervisor(&host, props, ts).await?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Instances, deployed on their hypervisor, with their ports.
    pub async fn add_instances(&self, id: Option<&str>, update: bool) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let ports = self.fetch(Collection::Ports, None).await?;
        let mut stored = 0;
        for mut record in self.fetch(Collection::Instances, id).await? {
            let owned: Vec<String> = ports
                .iter()
                .filter(|p| p.attribute_str("device_id") == Some(record.id.as_str()))
                .map(|p| p.id.clone())
                .collect();
            if let Some(Value::Object(attrs)) = record.properties.get_mut("attributes") {
                attrs.insert("ports".into(), Value::from(owned.clone()));
            }
            let mut req = request(&record, ResourceKind::Vm, ts, update);
            if let Some(host) = record.str_prop(HOSTNAME_KEY) {
                req = req.hypervisor(host);
            }
            for port in owned {
                req = req.out_edge(port, Relation::PortOfInstance.spec());
            }
            stored += self.put(req).await?;
        }
        Ok(stored)
    }

    /// Stacks, with their member resources.
    pub async fn add_stacks(&self, id: Option<&str>, update: bool) -> Result<usize, EpaError> {
        let ts = now_epoch();
        let mut stored = 0;
        for record in self.fetch(Collection::Stacks, id).await? {
            let req = StoreRequest::new(
                NodeIndex::virtual_resource(record.id.as_str()),
                properties(&record, ResourceKind::Stack, VNF),
                ts,
            )
            .update(update)
            .controller_service(ORCHESTRATION_SERVICE);
            let req = record
                .attribute_list("resources")
                .into_iter()
                .fold(req, |req, member| {
                    req.out_edge(member, Relation::ResourceOfStack.spec())
                });
            stored += self.put(req).await?;
        }
        Ok(stored)
    }

    /// Replace every control-plane node of the facility with the source's
    /// current state.
    #[instrument(skip(self), fields(pop = %self.store.pop()))]
    pub async fn full_import(&self) -> Result<SyncReport, EpaError> {
        for family in [
            IndexFamily::VirtualResource,
            IndexFamily::Hypervisor,
            IndexFamily::ControllerService,
        ] {
            self.store.remove_all(family).await?;
        }
        let mut report = SyncReport::default();
        let mut record = |c: Collection, n: usize| report.stored.push((c, n));
        record(
            Collection::ControllerServices,
            self.add_controller_services(None).await?,
        );
        record(Collection::Networks, self.add_networks(None, false).await?);
        record(Collection::Ports, self.add_ports(None, false).await?);
        record(
            Collection::FloatingIps,
            self.add_floating_ips(None, false).await?,
        );
        record(Collection::Routers, self.add_routers(None, false).await?);
        record(
            Collection::VolumeServices,
            self.add_volume_services(None).await?,
        );
        record(Collection::Snapshots, self.add_snapshots(None, false).await?);
        record(Collection::Volumes, self.add_volumes(None, false).await?);
        record(Collection::Hypervisors, self.add_hypervisors(None).await?);
        record(Collection::Instances, self.add_instances(None, false).await?);
        record(Collection::Stacks, self.add_stacks(None, false).await?);
        info!(total = report.total(), "virtual import complete");
        Ok(report)
    }
}
