//! In-memory test doubles for every external collaborator trait, in the
//! style of the teacher's `FakeDocker`: deterministic state behind a mutex,
//! builder/seed methods, no network calls.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    HistoryStore, ImageFilter, ImageRegistry, ImageStore, NetworkRegistry, NodeInventory, OnHostAgentDescriptor, RemoteResult,
    RemoteShellFanout, Result, ServiceApiMode, ServiceRegistry, VmFilter, VmListing, VmManager, WorkflowEngine, WorkflowJob,
};
use crate::error::OrchestratorError;
use crate::model::{HistoryRecord, Image, Instance, Server, Service};

/// Fake `ServiceRegistry` + `VmManager` combined, since both operate on the
/// same in-memory instance/service tables in tests.
#[derive(Default)]
pub struct FakeRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    services: Vec<Service>,
    instances: Vec<Instance>,
    modes: HashMap<String, ServiceApiMode>,
    /// VM tag bags keyed by instance id, seeded alongside `add_instance` via
    /// `tag_vm` (§4.1 step 4's `smartdc_role` drop).
    vm_tags: HashMap<String, HashMap<String, String>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_service(&self, service: Service) {
        self.inner.lock().await.services.push(service);
    }

    pub async fn add_instance(&self, instance: Instance) {
        self.inner.lock().await.instances.push(instance);
    }

    pub async fn mode_of(&self, service: &str) -> Option<ServiceApiMode> {
        self.inner.lock().await.modes.get(service).copied()
    }

    /// Seed a VM's tag bag, e.g. `tag_vm("vm-1", [("smartdc_role", "cnapi")])`.
    pub async fn tag_vm(&self, instance_id: &str, tags: HashMap<String, String>) {
        self.inner.lock().await.vm_tags.insert(instance_id.to_string(), tags);
    }
}

#[async_trait]
impl ServiceRegistry for FakeRegistry {
    async fn list_applications(&self) -> Result<Vec<String>> {
        Ok(vec!["sdc".to_string()])
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.inner.lock().await.services.clone())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.inner.lock().await.instances.clone())
    }

    async fn create_instance(&self, service: &str, server: &str) -> Result<Instance> {
        let mut state = self.inner.lock().await;
        let svc = state
            .services
            .iter()
            .find(|s| s.name == service)
            .ok_or_else(|| crate::error::UpdateError::UnknownService(service.to_string()))?
            .clone();
        let instance = Instance {
            service_name: svc.name.clone(),
            kind: svc.kind,
            instance_id: Instance::synthetic_id(server, service),
            image_id: svc.default_image_uuid().unwrap_or_default().to_string(),
            version: String::new(),
            server_id: server.to_string(),
            hostname: server.to_string(),
            admin_ip: None,
            alias: None,
        };
        state.instances.push(instance.clone());
        Ok(instance)
    }

    async fn update_service(&self, service: &str, image_uuid: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        for instance in state.instances.iter_mut().filter(|i| i.service_name == service) {
            instance.image_id = image_uuid.to_string();
        }
        Ok(())
    }

    async fn set_mode(&self, service: &str, mode: ServiceApiMode) -> Result<()> {
        self.inner.lock().await.modes.insert(service.to_string(), mode);
        Ok(())
    }
}

#[async_trait]
impl VmManager for FakeRegistry {
    async fn list_vms(&self, filter: &VmFilter) -> Result<Vec<VmListing>> {
        let state = self.inner.lock().await;
        Ok(state
            .instances
            .iter()
            .filter(|i| i.kind == crate::model::ServiceType::Vm)
            .filter(|i| filter.state.is_none())
            .map(|i| VmListing { instance: i.clone(), tags: state.vm_tags.get(&i.instance_id).cloned().unwrap_or_default() })
            .collect())
    }

    async fn add_nics(&self, _instance_id: &str, _network_ids: &[String]) -> Result<()> {
        Ok(())
    }

    async fn reprovision(&self, instance_id: &str, image_uuid: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        let instance = state
            .instances
            .iter_mut()
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| crate::error::UpdateError::UnknownInstance(instance_id.to_string()))?;
        instance.image_id = image_uuid.to_string();
        Ok(())
    }
}

/// Fake local image store / upstream registry: the same canned image list
/// serves both traits, with `missing` simulating images garbage-collected
/// locally (§4.2's tolerated `ResourceNotFound`).
#[derive(Default)]
pub struct FakeImages {
    inner: Mutex<ImagesState>,
}

#[derive(Default)]
struct ImagesState {
    images: Vec<Image>,
    missing: Vec<String>,
}

impl FakeImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_image(&self, image: Image) {
        self.inner.lock().await.images.push(image);
    }

    pub async fn mark_missing(&self, uuid: &str) {
        self.inner.lock().await.missing.push(uuid.to_string());
    }
}

#[async_trait]
impl ImageStore for FakeImages {
    async fn get_image(&self, uuid: &str) -> Result<Image> {
        let state = self.inner.lock().await;
        if state.missing.iter().any(|m| m == uuid) {
            return Err(OrchestratorError::ResourceNotFound(uuid.to_string()));
        }
        state.images.iter().find(|i| i.uuid == uuid).cloned().ok_or_else(|| OrchestratorError::ResourceNotFound(uuid.to_string()))
    }

    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<Image>> {
        let state = self.inner.lock().await;
        Ok(state
            .images
            .iter()
            .filter(|i| filter.name.as_deref().map(|n| n == i.name).unwrap_or(true))
            .filter(|i| filter.channel_tag.as_deref().map(|t| i.tags.iter().any(|tag| tag == t)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_image_file(&self, _uuid: &str, _dest_path: &str) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ImageRegistry for FakeImages {
    async fn get_image(&self, uuid: &str) -> Result<Image> {
        ImageStore::get_image(self, uuid).await
    }

    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<Image>> {
        ImageStore::list_images(self, filter).await
    }

    async fn get_image_file(&self, uuid: &str, dest_path: &str) -> Result<()> {
        ImageStore::get_image_file(self, uuid, dest_path).await
    }
}

/// Fake node inventory + remote-shell fanout: scripted per-server command
/// responses, seeded by test code.
#[derive(Default)]
pub struct FakeNodes {
    inner: Mutex<NodesState>,
}

#[derive(Default)]
struct NodesState {
    servers: Vec<Server>,
    /// Canned responses keyed by server id; falls back to an `exit 0` no-op.
    scripted: HashMap<String, RemoteResult>,
    on_host_agents: HashMap<String, Vec<OnHostAgentDescriptor>>,
    installed_images: HashMap<String, Vec<String>>,
}

impl FakeNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_server(&self, server: Server) {
        self.inner.lock().await.servers.push(server);
    }

    pub async fn script_response(&self, server_id: &str, result: RemoteResult) {
        self.inner.lock().await.scripted.insert(server_id.to_string(), result);
    }

    pub async fn seed_on_host_agents(&self, server_id: &str, agents: Vec<OnHostAgentDescriptor>) {
        self.inner.lock().await.on_host_agents.insert(server_id.to_string(), agents);
    }

    pub async fn is_image_installed(&self, server_id: &str, image_uuid: &str) -> bool {
        self.inner.lock().await.installed_images.get(server_id).map(|v| v.iter().any(|i| i == image_uuid)).unwrap_or(false)
    }
}

#[async_trait]
impl NodeInventory for FakeNodes {
    async fn list_servers(&self, _extras: bool) -> Result<Vec<Server>> {
        Ok(self.inner.lock().await.servers.clone())
    }

    async fn list_platforms(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().await.servers.iter().map(|s| s.current_platform.clone()).collect())
    }

    async fn command_execute(&self, server_id: &str, _script: &str) -> Result<RemoteResult> {
        let state = self.inner.lock().await;
        Ok(state.scripted.get(server_id).cloned().unwrap_or(RemoteResult { exit_status: 0, stdout: String::new(), stderr: String::new() }))
    }

    async fn set_boot_params(&self, _server_id: &str, _params: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn list_on_host_agents(&self, server_id: &str) -> Result<Vec<OnHostAgentDescriptor>> {
        Ok(self.inner.lock().await.on_host_agents.get(server_id).cloned().unwrap_or_default())
    }

    async fn ensure_image_installed(&self, server_id: &str, image_uuid: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        let installed = state.installed_images.entry(server_id.to_string()).or_default();
        if !installed.iter().any(|i| i == image_uuid) {
            installed.push(image_uuid.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteShellFanout for FakeNodes {
    async fn exec(&self, targets: Option<&[String]>, script: &str) -> Result<Vec<(String, RemoteResult)>> {
        let state = self.inner.lock().await;
        let ids: Vec<String> = match targets {
            Some(ts) => ts.to_vec(),
            None => state.servers.iter().map(|s| s.uuid.clone()).collect(),
        };
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = state.scripted.get(&id).cloned().unwrap_or(RemoteResult { exit_status: 0, stdout: String::new(), stderr: String::new() });
            let _ = script;
            results.push((id, result));
        }
        Ok(results)
    }
}

#[derive(Default)]
pub struct FakeWorkflowEngine {
    jobs: Mutex<Vec<WorkflowJob>>,
}

impl FakeWorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_job(&self, job: WorkflowJob) {
        self.jobs.lock().await.push(job);
    }
}

#[async_trait]
impl WorkflowEngine for FakeWorkflowEngine {
    async fn list_jobs(&self, execution: &str, limit: u32) -> Result<Vec<WorkflowJob>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.iter().filter(|j| j.execution == execution).take(limit as usize).cloned().collect())
    }
}

/// Fake `HistoryStore`: an in-memory append log, good enough to assert the
/// orchestrator writes a start record and a matching finish update.
#[derive(Default)]
pub struct FakeHistoryStore {
    records: Mutex<Vec<HistoryRecord>>,
}

impl FakeHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for FakeHistoryStore {
    async fn save_history(&self, record: &HistoryRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn update_history(&self, record: &HistoryRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.iter_mut().find(|r| r.uuid == record.uuid) {
            *existing = record.clone();
        }
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let mut records = self.records.lock().await.clone();
        records.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceType;

    #[tokio::test]
    async fn fake_registry_creates_instance_from_service_default_image() {
        let registry = FakeRegistry::new();
        let mut service = Service::new("cnapi", ServiceType::Agent);
        service.params = Some(crate::model::service::ServiceParams { image_uuid: Some("img-a".to_string()) });
        registry.add_service(service).await;

        let instance = registry.create_instance("cnapi", "server-1").await.unwrap();
        assert_eq!(instance.image_id, "img-a");
        assert_eq!(instance.instance_id, "server-1/cnapi");
    }

    #[tokio::test]
    async fn fake_images_reports_resource_not_found_for_missing() {
        let images = FakeImages::new();
        images.mark_missing("img-gone").await;
        let err = images.get_image("img-gone").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn fake_history_store_round_trips_finish() {
        let store = FakeHistoryStore::new();
        let mut record = HistoryRecord::started(vec![]);
        store.save_history(&record).await.unwrap();
        record.finish(None);
        store.update_history(&record).await.unwrap();

        let recent = store.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].succeeded());
    }
}
