use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{update_and_reprovision_single, ExecutionContext, ProcedureExecute};
use crate::error::Result;
use crate::model::NormalizedChange;

/// Filter 4 (§4.4): the directory service, single headnode instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUFDSServiceV1 {
    pub changes: Vec<NormalizedChange>,
}

impl UpdateUFDSServiceV1 {
    pub fn new(changes: Vec<NormalizedChange>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl ProcedureExecute for UpdateUFDSServiceV1 {
    fn kind(&self) -> &'static str {
        "UpdateUFDSServiceV1"
    }

    fn summarize(&self) -> String {
        "update the headnode ufds instance".to_string()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        for change in &self.changes {
            update_and_reprovision_single(ctx, self.kind(), change).await?;
        }
        Ok(())
    }
}
