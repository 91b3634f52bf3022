use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ExecutionContext, ProcedureExecute};
use crate::error::Result;
use crate::model::NormalizedChange;

/// Filter 1 (§4.4): prefetches every resolved image not already present in
/// the local image store, onto every server that will need it. Runs first
/// so every later procedure can assume its image is already local.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadImages {
    pub changes: Vec<NormalizedChange>,
}

impl DownloadImages {
    pub fn new(changes: Vec<NormalizedChange>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl ProcedureExecute for DownloadImages {
    fn kind(&self) -> &'static str {
        "DownloadImages"
    }

    fn summarize(&self) -> String {
        format!("prefetch {} image(s)", self.changes.len())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        for change in &self.changes {
            let Some(image) = &change.image else { continue };

            // An instance-level change names exactly the server that needs
            // the image; a service-level change may fan out to every
            // current instance of that service.
            let target_servers: Vec<String> = if let Some(instance) = &change.instance {
                vec![instance.server_id.clone()]
            } else {
                ctx.registry
                    .list_instances()
                    .await?
                    .into_iter()
                    .filter(|i| i.service_name == change.service.name)
                    .map(|i| i.server_id)
                    .collect()
            };

            for server_id in target_servers {
                ctx.nodes.ensure_image_installed(&server_id, &image.uuid).await?;
                ctx.emit(format!("downloaded image {} ({}) onto {}", image.uuid, image.name, server_id));
            }
        }
        Ok(())
    }
}
