use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{update_and_reprovision_single, ExecutionContext, ProcedureExecute};
use crate::error::Result;
use crate::model::NormalizedChange;

/// Filter 9 (§4.4): the auth cache's headnode instance. Runs last since
/// nothing downstream of it depends on a fresh cache mid-upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMahiV1 {
    pub changes: Vec<NormalizedChange>,
}

impl UpdateMahiV1 {
    pub fn new(changes: Vec<NormalizedChange>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl ProcedureExecute for UpdateMahiV1 {
    fn kind(&self) -> &'static str {
        "UpdateMahiV1"
    }

    fn summarize(&self) -> String {
        "update the headnode mahi instance".to_string()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        for change in &self.changes {
            update_and_reprovision_single(ctx, self.kind(), change).await?;
        }
        Ok(())
    }
}
