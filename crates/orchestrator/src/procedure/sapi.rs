use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{update_and_reprovision_single, ExecutionContext, ProcedureExecute};
use crate::error::Result;
use crate::model::NormalizedChange;

/// Filter 6 (§4.4): the service API, single headnode instance. Also the
/// collaborator [`manatee::UpdateManateeV2`](super::manatee) coerces into
/// proto mode for its no-HA branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSingleHNSapiV1 {
    pub changes: Vec<NormalizedChange>,
}

impl UpdateSingleHNSapiV1 {
    pub fn new(changes: Vec<NormalizedChange>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl ProcedureExecute for UpdateSingleHNSapiV1 {
    fn kind(&self) -> &'static str {
        "UpdateSingleHNSapiV1"
    }

    fn summarize(&self) -> String {
        "update the headnode sapi instance".to_string()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        for change in &self.changes {
            update_and_reprovision_single(ctx, self.kind(), change).await?;
        }
        Ok(())
    }
}
