//! Top-level entry points (§5/§6): `genUpdatePlan`, `execUpdatePlan`, and
//! `selfUpdate`, each wrapped in the process-wide advisory lock and each
//! bracketed by a persisted history record. This is the thinnest layer in
//! the crate — it only wires the five core components together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::error;

use crate::config::SafetyConfig;
use crate::error::{InternalError, Result};
use crate::external::{HistoryStore, ImageRegistry, ImageStore, NetworkRegistry, NodeInventory, RemoteShellFanout, ServiceRegistry, VmManager};
use crate::image_resolver::ImageResolver;
use crate::inventory_collector::InventoryCollector;
use crate::lock;
use crate::model::{ChangeRequest, HistoryRecord, UpdatePlan};
use crate::plan_builder::PlanBuilder;
use crate::procedure::{ExecutionContext, ProgressEvent};

/// Every collaborator the orchestrator needs plus the two on-disk paths that
/// give its mutating entry points process-wide exclusivity and a persisted
/// trail (§6's work-directory layout).
pub struct Orchestrator {
    registry: Arc<dyn ServiceRegistry>,
    vms: Arc<dyn VmManager>,
    images: Arc<dyn ImageStore>,
    upstream_images: Arc<dyn ImageRegistry>,
    nodes: Arc<dyn NodeInventory>,
    networks: Arc<dyn NetworkRegistry>,
    shell: Arc<dyn RemoteShellFanout>,
    history: Arc<dyn HistoryStore>,
    safety: SafetyConfig,
    channel_tag: String,
    lock_file: PathBuf,
    work_dir_root: PathBuf,
}

#[allow(clippy::too_many_arguments)]
impl Orchestrator {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        vms: Arc<dyn VmManager>,
        images: Arc<dyn ImageStore>,
        upstream_images: Arc<dyn ImageRegistry>,
        nodes: Arc<dyn NodeInventory>,
        networks: Arc<dyn NetworkRegistry>,
        shell: Arc<dyn RemoteShellFanout>,
        history: Arc<dyn HistoryStore>,
        safety: SafetyConfig,
        channel_tag: impl Into<String>,
        lock_file: impl Into<PathBuf>,
        work_dir_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            vms,
            images,
            upstream_images,
            nodes,
            networks,
            shell,
            history,
            safety,
            channel_tag: channel_tag.into(),
            lock_file: lock_file.into(),
            work_dir_root: work_dir_root.into(),
        }
    }

    fn collector(&self) -> InventoryCollector {
        InventoryCollector::new(self.registry.clone(), self.vms.clone(), self.images.clone(), self.nodes.clone(), self.networks.clone())
    }

    fn plan_builder(&self) -> PlanBuilder {
        let resolver = Arc::new(ImageResolver::new(self.images.clone(), self.upstream_images.clone(), self.channel_tag.clone()));
        PlanBuilder::new(resolver, self.images.clone(), self.safety.clone())
    }

    /// `genUpdatePlan` (§5): collects inventory, builds the plan, and
    /// persists `plan.json` under a fresh work directory — unless
    /// `dry_run` (SPEC_FULL.md §2 supplement), in which case nothing touches
    /// disk and the second return value is `None`.
    pub async fn gen_plan(&self, requests: Vec<ChangeRequest>, just_images: bool, dry_run: bool) -> Result<(UpdatePlan, Option<PathBuf>)> {
        let _guard = lock::acquire(&self.lock_file).await?;

        let snapshot = self.collector().collect().await?;
        let headnode = snapshot.headnode().ok_or_else(|| InternalError::Unexpected("no headnode in inventory snapshot".to_string()))?;
        let headnode_id = headnode.uuid.clone();

        let plan = self.plan_builder().build(requests, &snapshot, &headnode_id, just_images).await?;

        if dry_run {
            return Ok((plan, None));
        }

        let work_dir = self.work_dir_root.join(chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string());
        persist_plan(&work_dir, &plan).await?;
        Ok((plan, Some(work_dir)))
    }

    /// `execUpdatePlan` (§5): runs every procedure in `plan.procs` in order
    /// against the live cluster, streaming progress on `progress`. Stops at
    /// the first procedure failure, leaving the rest un-run; either way a
    /// history record brackets the attempt. `requests` is the original
    /// batch this plan was built from, recorded verbatim for later audit.
    pub async fn exec_plan(&self, requests: Vec<ChangeRequest>, plan: &UpdatePlan, work_dir: impl Into<PathBuf>, progress: UnboundedSender<ProgressEvent>) -> Result<()> {
        let _guard = lock::acquire(&self.lock_file).await?;

        let mut record = HistoryRecord::started(requests);
        self.history.save_history(&record).await?;

        let ctx = ExecutionContext {
            registry: self.registry.clone(),
            vms: self.vms.clone(),
            images: self.images.clone(),
            upstream_images: self.upstream_images.clone(),
            nodes: self.nodes.clone(),
            shell: self.shell.clone(),
            progress,
            work_dir: work_dir.into(),
        };

        let outcome = run_procedures(&ctx, plan).await;

        record.finish(outcome.as_ref().err().map(|e| e.to_string()));
        self.history.update_history(&record).await?;

        outcome
    }

    /// `selfUpdate` (§5): the orchestrator updates its own service by
    /// folding a synthetic `update-service` request for `own_service_name`
    /// through the normal gen/exec pipeline — no special-casing beyond
    /// picking the target service.
    pub async fn self_update(&self, own_service_name: &str, image_uuid: Option<String>, progress: UnboundedSender<ProgressEvent>) -> Result<()> {
        let request = ChangeRequest::UpdateService { service: own_service_name.to_string(), image: image_uuid, force_same_image: false, force_rabbitmq: false };
        let (plan, work_dir) = self.gen_plan(vec![request.clone()], false, false).await?;
        let work_dir = work_dir.expect("gen_plan with dry_run=false always returns a work directory");
        self.exec_plan(vec![request], &plan, work_dir, progress).await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.history.list_recent(limit).await
    }
}

async fn run_procedures(ctx: &ExecutionContext, plan: &UpdatePlan) -> Result<()> {
    let procs = plan.procs.as_ref().cloned().unwrap_or_default();
    for proc in procs.iter() {
        ctx.progress.send(ProgressEvent::ProcedureStarted { kind: proc.kind().to_string(), summary: proc.summarize() }).ok();
        if let Err(e) = proc.execute(ctx).await {
            error!(procedure = proc.kind(), error = %e, "procedure execution failed");
            return Err(e);
        }
        ctx.progress.send(ProgressEvent::ProcedureFinished { kind: proc.kind().to_string() }).ok();
    }
    Ok(())
}

async fn persist_plan(work_dir: &Path, plan: &UpdatePlan) -> Result<()> {
    tokio::fs::create_dir_all(work_dir).await.map_err(InternalError::Io)?;
    let json = plan.to_json_pretty()?;
    tokio::fs::write(work_dir.join("plan.json"), json).await.map_err(InternalError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::mpsc;

    use super::*;
    use crate::external::fakes::{FakeHistoryStore, FakeImages, FakeNodes, FakeRegistry};
    use crate::external::NetworkRegistry as NetworkRegistryTrait;
    use crate::model::{Image, Server, Service, ServiceType};

    struct NoNics;

    #[async_trait]
    impl NetworkRegistryTrait for NoNics {
        async fn list_networks(&self) -> crate::external::Result<Vec<String>> {
            Ok(vec![])
        }
        async fn list_nics(&self, _owner_uuid: &str) -> crate::external::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    async fn seeded_orchestrator(work_dir_root: PathBuf, lock_file: PathBuf) -> (Orchestrator, Arc<FakeRegistry>, Arc<FakeImages>) {
        let registry = Arc::new(FakeRegistry::new());
        registry.add_service(Service::new("cnapi", ServiceType::Agent)).await;
        registry.add_instance(instance_for_test("cnapi", "img-a", "headnode-1")).await;

        let nodes = Arc::new(FakeNodes::new());
        nodes
            .add_server(Server { uuid: "headnode-1".to_string(), hostname: "headnode-1".to_string(), is_headnode: true, current_platform: "20240101T000000Z".to_string(), sysinfo: serde_json::Value::Null })
            .await;

        let images = Arc::new(FakeImages::new());
        images.add_image(Image { uuid: "img-a".to_string(), name: "cnapi".to_string(), version: "1.0.0".to_string(), published_at: Utc::now(), tags: vec![] }).await;
        images.add_image(Image { uuid: "img-b".to_string(), name: "cnapi".to_string(), version: "2.0.0".to_string(), published_at: Utc::now(), tags: vec![] }).await;

        let orchestrator = Orchestrator::new(
            registry.clone(),
            registry.clone(),
            images.clone(),
            images.clone(),
            nodes.clone(),
            Arc::new(NoNics),
            nodes,
            Arc::new(FakeHistoryStore::new()),
            SafetyConfig::default(),
            "master",
            lock_file,
            work_dir_root,
        );

        (orchestrator, registry, images)
    }

    fn instance_for_test(service_name: &str, image_id: &str, server_id: &str) -> crate::model::Instance {
        crate::model::Instance {
            service_name: service_name.to_string(),
            kind: ServiceType::Agent,
            instance_id: format!("{}/{}", server_id, service_name),
            image_id: image_id.to_string(),
            version: "1.0.0".to_string(),
            server_id: server_id.to_string(),
            hostname: server_id.to_string(),
            admin_ip: None,
            alias: None,
        }
    }

    #[tokio::test]
    async fn dry_run_does_not_persist_a_work_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _registry, _images) = seeded_orchestrator(dir.path().join("updates"), dir.path().join("lock")).await;

        let request = ChangeRequest::UpdateService { service: "cnapi".to_string(), image: None, force_same_image: false, force_rabbitmq: false };
        let (plan, work_dir) = orchestrator.gen_plan(vec![request], false, true).await.unwrap();

        assert!(work_dir.is_none());
        assert_eq!(plan.changes.len(), 1);
        assert!(!dir.path().join("updates").exists());
    }

    #[tokio::test]
    async fn gen_plan_persists_plan_json() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _registry, _images) = seeded_orchestrator(dir.path().join("updates"), dir.path().join("lock")).await;

        let request = ChangeRequest::UpdateService { service: "cnapi".to_string(), image: None, force_same_image: false, force_rabbitmq: false };
        let (_plan, work_dir) = orchestrator.gen_plan(vec![request], false, false).await.unwrap();

        let work_dir = work_dir.unwrap();
        let data = tokio::fs::read_to_string(work_dir.join("plan.json")).await.unwrap();
        let round_tripped = UpdatePlan::from_json(&data).unwrap();
        assert_eq!(round_tripped.changes.len(), 1);
    }

    #[tokio::test]
    async fn exec_plan_runs_procedures_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, registry, _images) = seeded_orchestrator(dir.path().join("updates"), dir.path().join("lock")).await;

        let request = ChangeRequest::UpdateService { service: "cnapi".to_string(), image: None, force_same_image: false, force_rabbitmq: false };
        let (plan, work_dir) = orchestrator.gen_plan(vec![request.clone()], false, false).await.unwrap();
        assert_eq!(plan.procs.as_ref().unwrap().len(), 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        orchestrator.exec_plan(vec![request], &plan, work_dir.unwrap(), tx).await.unwrap();

        let instances = registry.list_instances().await.unwrap();
        let cnapi = instances.iter().find(|i| i.service_name == "cnapi").unwrap();
        assert_eq!(cnapi.image_id, "img-b");

        let mut saw_finished = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ProgressEvent::ProcedureFinished { .. }) {
                saw_finished = true;
            }
        }
        assert!(saw_finished);

        let recent = orchestrator.history(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].succeeded());
    }
}
