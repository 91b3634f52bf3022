use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use super::{ExecutionContext, ProcedureExecute};
use crate::error::{Result, UpdateError};
use crate::model::NormalizedChange;

/// Moray peers settle their connection pool to the new instance before the
/// next peer is touched, so a full cluster does not lose quorum mid-roll.
const INSTANCE_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Filter 5 (§4.4): the object index, HA-capable, any instance count. One
/// change carries the whole service; every current instance is rolled in
/// turn so the index is never fully down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMorayV2 {
    pub changes: Vec<NormalizedChange>,
}

impl UpdateMorayV2 {
    pub fn new(changes: Vec<NormalizedChange>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl ProcedureExecute for UpdateMorayV2 {
    fn kind(&self) -> &'static str {
        "UpdateMorayV2"
    }

    fn summarize(&self) -> String {
        format!("rolling update of {} moray change(s)", self.changes.len())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        for change in &self.changes {
            let image = change.image.as_ref().ok_or_else(|| UpdateError::UnsupportedChanges("moray: change has no resolved image".to_string()))?;
            ctx.registry.update_service(&change.service.name, &image.uuid).await?;

            let instances = ctx.registry.list_instances().await?;
            let peers: Vec<_> = instances.into_iter().filter(|i| i.service_name == change.service.name).collect();

            ctx.emit(format!("moray: rolling {} peer(s) of {} onto {}", peers.len(), change.service.name, image.uuid));
            for peer in &peers {
                ctx.nodes.ensure_image_installed(&peer.server_id, &image.uuid).await?;
                ctx.vms.reprovision(&peer.instance_id, &image.uuid).await?;
                ctx.emit(format!("moray: reprovisioned peer {}", peer.instance_id));
                sleep(INSTANCE_SETTLE_DELAY).await;
            }
        }
        Ok(())
    }
}
