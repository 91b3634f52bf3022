//! External collaborators (§6): every upstream the orchestrator core
//! depends on, behind a small trait so the core is unit-testable without a
//! live cluster. Fakes for each trait live in [`fakes`], in the style of
//! the teacher's `FakeDocker`.

pub mod fakes;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::model::{Image, Instance, Server, Service};

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// `{exit, stdout, stderr}` — the typed result of one remote-shell
/// invocation, the single transport surface §9's Design Notes calls for in
/// place of re-parsing a remote-exec CLI's JSON envelope ad hoc.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResult {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteResult {
    pub fn ok(&self) -> bool {
        self.exit_status == 0
    }
}

/// Proto mode is a degraded operating mode of the service-API that does not
/// require the replicated DB to be writable (Glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceApiMode {
    Proto,
    Full,
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn list_applications(&self) -> Result<Vec<String>>;
    async fn list_services(&self) -> Result<Vec<Service>>;
    async fn list_instances(&self) -> Result<Vec<Instance>>;
    async fn create_instance(&self, service: &str, server: &str) -> Result<Instance>;
    async fn update_service(&self, service: &str, image_uuid: &str) -> Result<()>;
    async fn set_mode(&self, service: &str, mode: ServiceApiMode) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct VmFilter {
    pub owner_uuid: Option<String>,
    pub state: Option<String>,
}

/// One VM as reported by the VM manager, carrying its tag bag alongside the
/// candidate `Instance` so callers can apply the `smartdc_role` drop (§4.1
/// step 4) before the VM ever becomes part of the inventory snapshot.
#[derive(Debug, Clone)]
pub struct VmListing {
    pub instance: Instance,
    pub tags: HashMap<String, String>,
}

#[async_trait]
pub trait VmManager: Send + Sync {
    async fn list_vms(&self, filter: &VmFilter) -> Result<Vec<VmListing>>;
    async fn add_nics(&self, instance_id: &str, network_ids: &[String]) -> Result<()>;
    /// Replace the zone backing `instance_id` with a fresh one built from
    /// `image_uuid`, preserving identity (Glossary: "reprovision").
    async fn reprovision(&self, instance_id: &str, image_uuid: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub name: Option<String>,
    pub channel_tag: Option<String>,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn get_image(&self, uuid: &str) -> Result<Image>;
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<Image>>;
    async fn get_image_file(&self, uuid: &str, dest_path: &str) -> Result<()>;
}

/// Upstream registry, same shape as the local `ImageStore` but a distinct
/// collaborator (§6: `ImageStore (local)` and `ImageRegistry (upstream)`).
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn get_image(&self, uuid: &str) -> Result<Image>;
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<Image>>;
    async fn get_image_file(&self, uuid: &str, dest_path: &str) -> Result<()>;
}

/// One agent-type service enumerated on a host, as reported by `hostd`'s
/// on-host "agents" descriptor (Inventory Collector step 3, §4.1).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OnHostAgentDescriptor {
    pub service_name: String,
    pub instance_id: String,
    pub image_id: String,
    pub version: String,
}

#[async_trait]
pub trait NodeInventory: Send + Sync {
    async fn list_servers(&self, extras: bool) -> Result<Vec<Server>>;
    async fn list_platforms(&self) -> Result<Vec<String>>;
    async fn command_execute(&self, server_id: &str, script: &str) -> Result<RemoteResult>;
    async fn set_boot_params(&self, server_id: &str, params: &serde_json::Value) -> Result<()>;
    /// Supplemented: the per-host "agents" descriptor §4.1 step 3 enumerates.
    /// Not in spec.md's named interface list but required by the algorithm
    /// the interface list is meant to support.
    async fn list_on_host_agents(&self, server_id: &str) -> Result<Vec<OnHostAgentDescriptor>>;
    /// Supplemented: pushes an image onto a specific host's local cache via
    /// `hostd`'s `ImageService`, ahead of a reprovision against it.
    async fn ensure_image_installed(&self, server_id: &str, image_uuid: &str) -> Result<()>;
}

#[async_trait]
pub trait NetworkRegistry: Send + Sync {
    async fn list_networks(&self) -> Result<Vec<String>>;
    async fn list_nics(&self, owner_uuid: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowJob {
    pub uuid: String,
    pub execution: String,
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn list_jobs(&self, execution: &str, limit: u32) -> Result<Vec<WorkflowJob>>;
}

/// Broadcast-or-targeted shell execution. `None` targets every server in
/// the fleet; `Some(ids)` targets exactly those servers.
#[async_trait]
pub trait RemoteShellFanout: Send + Sync {
    async fn exec(&self, targets: Option<&[String]>, script: &str) -> Result<Vec<(String, RemoteResult)>>;
    async fn exec_one(&self, server_id: &str, script: &str) -> Result<RemoteResult> {
        let results = self.exec(Some(std::slice::from_ref(&server_id.to_string())), script).await?;
        results
            .into_iter()
            .find(|(id, _)| id == server_id)
            .map(|(_, r)| r)
            .ok_or_else(|| crate::error::UpstreamError::new("remote-shell-fanout", "exec_one", "no result for target server").into())
    }
}

#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn search(&self, base_dn: &str, filter: &str) -> Result<Vec<serde_json::Value>>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_history(&self, record: &crate::model::HistoryRecord) -> Result<()>;
    async fn update_history(&self, record: &crate::model::HistoryRecord) -> Result<()>;
    /// Supplemented (not in spec.md's collaborator contract): list the most
    /// recent records so an operator can find the work directory for a
    /// past run (§4.5.3's manual-recovery assumption needs a way in).
    async fn list_recent(&self, limit: usize) -> Result<Vec<crate::model::HistoryRecord>>;
}
