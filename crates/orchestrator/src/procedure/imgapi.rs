use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{update_and_reprovision_single, ExecutionContext, ProcedureExecute};
use crate::error::Result;
use crate::model::NormalizedChange;

/// Filter 3 (§4.4): the image store itself, single headnode instance. Gets
/// its own procedure class because every other procedure's image-prefetch
/// step depends on imgapi already being reachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSingleHeadnodeImgapi {
    pub changes: Vec<NormalizedChange>,
}

impl UpdateSingleHeadnodeImgapi {
    pub fn new(changes: Vec<NormalizedChange>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl ProcedureExecute for UpdateSingleHeadnodeImgapi {
    fn kind(&self) -> &'static str {
        "UpdateSingleHeadnodeImgapi"
    }

    fn summarize(&self) -> String {
        "update the headnode imgapi instance".to_string()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        for change in &self.changes {
            update_and_reprovision_single(ctx, self.kind(), change).await?;
        }
        Ok(())
    }
}
