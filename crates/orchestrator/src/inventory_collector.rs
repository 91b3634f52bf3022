//! Inventory Collector (§4.1): produces a consistent snapshot of services,
//! instances, and host servers by querying the external registries. ~15% of
//! the core per §2's component table, but the foundation every other
//! component reads from.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, UpstreamError};
use crate::external::{ImageStore, NetworkRegistry, NodeInventory, ServiceRegistry, VmFilter, VmManager};
use crate::model::{Instance, Server, Service, ServiceType};

/// Services with no service-registry presence today but that must still be
/// updateable (§4.1 step 5).
const KNOWN_AGENT_SERVICES: &[&str] = &["cn-agent", "net-agent", "vm-agent", "config-agent", "amon-agent", "amon-relay", "firewaller", "hagfish-watcher"];

const SYNTHETIC_ASSETS_SERVICE: &str = "assets";

/// Output of one `collect()` call. `servers_by_id_or_hostname` is a
/// convenience index the Plan Builder's normalization step (§4.3) looks
/// servers up in directly.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    pub services: Vec<Service>,
    pub instances: Vec<Instance>,
    pub servers: Vec<Server>,
}

impl InventorySnapshot {
    pub fn server_by_id_or_hostname(&self, key: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.uuid == key || s.hostname == key)
    }

    pub fn service_by_name(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn instance_by_id(&self, id: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.instance_id == id)
    }

    pub fn headnode(&self) -> Option<&Server> {
        self.servers.iter().find(|s| s.is_headnode)
    }
}

pub struct InventoryCollector {
    registry: Arc<dyn ServiceRegistry>,
    vms: Arc<dyn VmManager>,
    images: Arc<dyn ImageStore>,
    nodes: Arc<dyn NodeInventory>,
    networks: Arc<dyn NetworkRegistry>,
}

impl InventoryCollector {
    pub fn new(registry: Arc<dyn ServiceRegistry>, vms: Arc<dyn VmManager>, images: Arc<dyn ImageStore>, nodes: Arc<dyn NodeInventory>, networks: Arc<dyn NetworkRegistry>) -> Self {
        Self { registry, vms, images, nodes, networks }
    }

    pub async fn collect(&self) -> Result<InventorySnapshot> {
        // Steps 1-2: agent-type services and instances from the registry.
        let mut services: Vec<Service> =
            self.registry.list_services().await.map_err(|e| UpstreamError::new("service-registry", "list_services", e))?.into_iter().filter(|s| s.kind == ServiceType::Agent).collect();

        let registry_instances: Vec<Instance> =
            self.registry.list_instances().await.map_err(|e| UpstreamError::new("service-registry", "list_instances", e))?.into_iter().filter(|i| i.kind == ServiceType::Agent).collect();
        let mut by_server_and_service: HashMap<(String, String), Instance> =
            registry_instances.into_iter().map(|i| ((i.server_id.clone(), i.service_name.clone()), i)).collect();

        // Step 3: every server's on-host agent descriptor, preferring the
        // registry instance id when one already exists for (server, agent).
        let servers = self.nodes.list_servers(true).await.map_err(|e| UpstreamError::new("node-inventory", "list_servers", e))?;

        let mut instances = Vec::new();
        for server in &servers {
            let on_host = self.nodes.list_on_host_agents(&server.uuid).await.map_err(|e| UpstreamError::new("node-inventory", "list_on_host_agents", e))?;
            for agent in on_host {
                let key = (server.uuid.clone(), agent.service_name.clone());
                let instance = by_server_and_service.remove(&key).unwrap_or_else(|| Instance {
                    service_name: agent.service_name.clone(),
                    kind: ServiceType::Agent,
                    instance_id: Instance::synthetic_id(&server.uuid, &agent.service_name),
                    image_id: agent.image_id.clone(),
                    version: agent.version.clone(),
                    server_id: server.uuid.clone(),
                    hostname: server.hostname.clone(),
                    admin_ip: None,
                    alias: None,
                });
                instances.push(instance);
            }
        }
        // Any registry-known agent instance whose server never reported it
        // on-host is still part of the snapshot (stale but real).
        instances.extend(by_server_and_service.into_values());

        // Step 4: VMs owned by the admin account, vm-type instances only,
        // dropping any VM that lacks a `smartdc_role` tag.
        let vms = self.vms.list_vms(&VmFilter { owner_uuid: None, state: Some("active".to_string()) }).await.map_err(|e| UpstreamError::new("vm-manager", "list_vms", e))?;
        for listing in vms.into_iter().filter(|v| v.instance.kind == ServiceType::Vm) {
            if !listing.tags.contains_key("smartdc_role") {
                tracing::debug!(instance_id = %listing.instance.instance_id, "dropping VM with no smartdc_role tag");
                continue;
            }
            let mut vm = listing.instance;
            match self.images.get_image(&vm.image_id).await {
                Ok(image) => vm.version = image.version,
                Err(crate::error::OrchestratorError::ResourceNotFound(_)) => {}
                Err(e) => return Err(UpstreamError::new("image-store", "get_image", e).into()),
            }
            let nics = self.networks.list_nics(&vm.instance_id).await.map_err(|e| UpstreamError::new("network-registry", "list_nics", e))?;
            vm.admin_ip = nics.into_iter().next();
            instances.push(vm);
        }

        // Step 5: augment services with the synthetic `assets` entry and the
        // hard-coded known-agent-services list.
        if !services.iter().any(|s| s.name == SYNTHETIC_ASSETS_SERVICE) {
            services.push(Service::new(SYNTHETIC_ASSETS_SERVICE, ServiceType::Agent));
        }
        for name in KNOWN_AGENT_SERVICES {
            if !services.iter().any(|s| s.name == *name) {
                services.push(Service::new(*name, ServiceType::Agent));
            }
        }

        Ok(InventorySnapshot { services, instances, servers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::fakes::{FakeImages, FakeNodes, FakeRegistry};
    use crate::external::{NetworkRegistry as NetworkRegistryTrait, OnHostAgentDescriptor};
    use async_trait::async_trait;

    struct NoNics;

    #[async_trait]
    impl NetworkRegistryTrait for NoNics {
        async fn list_networks(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn list_nics(&self, _owner_uuid: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn on_host_agent_without_registry_instance_gets_synthetic_id() {
        let registry = Arc::new(FakeRegistry::new());
        let nodes = Arc::new(FakeNodes::new());
        nodes
            .add_server(Server { uuid: "server-1".to_string(), hostname: "headnode".to_string(), is_headnode: true, current_platform: "20240101T000000Z".to_string(), sysinfo: serde_json::Value::Null })
            .await;
        nodes.seed_on_host_agents("server-1", vec![OnHostAgentDescriptor { service_name: "cn-agent".to_string(), instance_id: String::new(), image_id: "img-a".to_string(), version: "1.0.0".to_string() }]).await;

        let images = Arc::new(FakeImages::new());
        let collector = InventoryCollector::new(registry.clone(), registry, images, nodes.clone(), Arc::new(NoNics));

        let snapshot = collector.collect().await.unwrap();
        let instance = snapshot.instance_by_id("server-1/cn-agent").expect("synthetic instance should be present");
        assert_eq!(instance.image_id, "img-a");
    }

    #[tokio::test]
    async fn always_carries_synthetic_assets_service() {
        let registry = Arc::new(FakeRegistry::new());
        let nodes = Arc::new(FakeNodes::new());
        let images = Arc::new(FakeImages::new());
        let collector = InventoryCollector::new(registry.clone(), registry, images, nodes, Arc::new(NoNics));

        let snapshot = collector.collect().await.unwrap();
        assert!(snapshot.service_by_name("assets").is_some());
        assert!(snapshot.service_by_name("cn-agent").is_some());
    }
}
