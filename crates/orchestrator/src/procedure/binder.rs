use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{update_and_reprovision_single, ExecutionContext, ProcedureExecute};
use crate::error::Result;
use crate::model::NormalizedChange;

/// Filter 8 (§4.4): the name-service quorum's headnode instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBinderV1 {
    pub changes: Vec<NormalizedChange>,
}

impl UpdateBinderV1 {
    pub fn new(changes: Vec<NormalizedChange>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl ProcedureExecute for UpdateBinderV1 {
    fn kind(&self) -> &'static str {
        "UpdateBinderV1"
    }

    fn summarize(&self) -> String {
        "update the headnode binder instance".to_string()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        for change in &self.changes {
            update_and_reprovision_single(ctx, self.kind(), change).await?;
        }
        Ok(())
    }
}
