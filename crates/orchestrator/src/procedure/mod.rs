//! Procedure objects (§4.4, §4.5, §9): one unit of update logic per service
//! class, each bound to the subset of a plan's changes it handles. Encoded
//! as a tagged enum over small structs rather than class inheritance, per
//! the ad-hoc-polymorphism note in §9.

pub mod binder;
pub mod coordinator;
pub mod download_images;
pub mod imgapi;
pub mod mahi;
pub mod manatee;
pub mod moray;
pub mod sapi;
pub mod stateless;
pub mod ufds;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

pub use binder::UpdateBinderV1;
pub use coordinator::coordinate;
pub use download_images::DownloadImages;
pub use imgapi::UpdateSingleHeadnodeImgapi;
pub use mahi::UpdateMahiV1;
pub use manatee::UpdateManateeV2;
pub use moray::UpdateMorayV2;
pub use sapi::UpdateSingleHNSapiV1;
pub use stateless::UpdateStatelessServicesV1;
pub use ufds::UpdateUFDSServiceV1;

use crate::error::Result;
use crate::external::{ImageRegistry, ImageStore, NodeInventory, RemoteShellFanout, ServiceRegistry, VmManager};
use crate::model::NormalizedChange;

/// Progress stream emitted while a plan executes (SPEC_FULL.md §2
/// supplement); the caller-supplied print function of §7 made concrete.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    ProcedureStarted { kind: String, summary: String },
    Message(String),
    ProcedureFinished { kind: String },
}

/// Everything a procedure needs to reach the live cluster. Built once per
/// `execUpdatePlan` invocation and threaded through every procedure in order.
#[derive(Clone)]
pub struct ExecutionContext {
    pub registry: Arc<dyn ServiceRegistry>,
    pub vms: Arc<dyn VmManager>,
    pub images: Arc<dyn ImageStore>,
    pub upstream_images: Arc<dyn ImageRegistry>,
    pub nodes: Arc<dyn NodeInventory>,
    pub shell: Arc<dyn RemoteShellFanout>,
    pub progress: UnboundedSender<ProgressEvent>,
    pub work_dir: PathBuf,
}

impl ExecutionContext {
    pub fn emit(&self, message: impl Into<String>) {
        let _ = self.progress.send(ProgressEvent::Message(message.into()));
    }
}

#[async_trait]
pub trait ProcedureExecute {
    fn kind(&self) -> &'static str;
    fn summarize(&self) -> String;
    async fn execute(&self, ctx: &ExecutionContext) -> Result<()>;
}

/// One of the nine procedure classes the coordinator pipeline (§4.4) can
/// emit, tagged by `kind` so a persisted plan's `procs` round-trips through
/// JSON without loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Procedure {
    DownloadImages(DownloadImages),
    UpdateStatelessServicesV1(UpdateStatelessServicesV1),
    UpdateSingleHeadnodeImgapi(UpdateSingleHeadnodeImgapi),
    UpdateUFDSServiceV1(UpdateUFDSServiceV1),
    UpdateMorayV2(UpdateMorayV2),
    UpdateSingleHNSapiV1(UpdateSingleHNSapiV1),
    UpdateManateeV2(UpdateManateeV2),
    UpdateBinderV1(UpdateBinderV1),
    UpdateMahiV1(UpdateMahiV1),
}

impl Procedure {
    pub fn is_download_images(&self) -> bool {
        matches!(self, Procedure::DownloadImages(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Procedure::DownloadImages(p) => p.kind(),
            Procedure::UpdateStatelessServicesV1(p) => p.kind(),
            Procedure::UpdateSingleHeadnodeImgapi(p) => p.kind(),
            Procedure::UpdateUFDSServiceV1(p) => p.kind(),
            Procedure::UpdateMorayV2(p) => p.kind(),
            Procedure::UpdateSingleHNSapiV1(p) => p.kind(),
            Procedure::UpdateManateeV2(p) => p.kind(),
            Procedure::UpdateBinderV1(p) => p.kind(),
            Procedure::UpdateMahiV1(p) => p.kind(),
        }
    }

    pub fn summarize(&self) -> String {
        match self {
            Procedure::DownloadImages(p) => p.summarize(),
            Procedure::UpdateStatelessServicesV1(p) => p.summarize(),
            Procedure::UpdateSingleHeadnodeImgapi(p) => p.summarize(),
            Procedure::UpdateUFDSServiceV1(p) => p.summarize(),
            Procedure::UpdateMorayV2(p) => p.summarize(),
            Procedure::UpdateSingleHNSapiV1(p) => p.summarize(),
            Procedure::UpdateManateeV2(p) => p.summarize(),
            Procedure::UpdateBinderV1(p) => p.summarize(),
            Procedure::UpdateMahiV1(p) => p.summarize(),
        }
    }

    pub async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        match self {
            Procedure::DownloadImages(p) => p.execute(ctx).await,
            Procedure::UpdateStatelessServicesV1(p) => p.execute(ctx).await,
            Procedure::UpdateSingleHeadnodeImgapi(p) => p.execute(ctx).await,
            Procedure::UpdateUFDSServiceV1(p) => p.execute(ctx).await,
            Procedure::UpdateMorayV2(p) => p.execute(ctx).await,
            Procedure::UpdateSingleHNSapiV1(p) => p.execute(ctx).await,
            Procedure::UpdateManateeV2(p) => p.execute(ctx).await,
            Procedure::UpdateBinderV1(p) => p.execute(ctx).await,
            Procedure::UpdateMahiV1(p) => p.execute(ctx).await,
        }
    }
}

/// Ordered sequence of procedures; running them in order produces the
/// plan's intended effect (§3 ProcedureList).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcedureList(pub Vec<Procedure>);

impl ProcedureList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Procedure> {
        self.0.iter()
    }
}

/// Shared "update the registry then reprovision the single instance" path
/// used by every headnode-pinned, single-instance procedure class
/// (stateless services, imgapi, ufds, sapi, binder, mahi). Each of those
/// procedures differs only in its `kind()`/`summarize()` and the log label
/// it attaches.
pub(crate) async fn update_and_reprovision_single(ctx: &ExecutionContext, label: &str, change: &NormalizedChange) -> Result<()> {
    let image = change.image.as_ref().ok_or_else(|| crate::error::UpdateError::UnsupportedChanges(format!("{}: change has no resolved image", label)))?;

    ctx.registry.update_service(&change.service.name, &image.uuid).await?;
    ctx.emit(format!("{}: service {} now targets image {}", label, change.service.name, image.uuid));

    // A service-level `update-service` change carries `instance: None`
    // (plan_builder::normalize_one only populates `instance` for
    // instance/uuid/alias refs); the running zone is resolved from the
    // registry rather than assumed already known, same as moray/
    // download_images do for their service-level changes.
    let instances = match &change.instance {
        Some(instance) => vec![instance.clone()],
        None => ctx.registry.list_instances().await?.into_iter().filter(|i| i.service_name == change.service.name).collect(),
    };

    for instance in &instances {
        ctx.nodes.ensure_image_installed(&instance.server_id, &image.uuid).await?;
        ctx.vms.reprovision(&instance.instance_id, &image.uuid).await?;
        ctx.emit(format!("{}: reprovisioned {}", label, instance.instance_id));
    }

    Ok(())
}
