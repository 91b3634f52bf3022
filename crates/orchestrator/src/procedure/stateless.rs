use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{update_and_reprovision_single, ExecutionContext, ProcedureExecute};
use crate::error::Result;
use crate::model::NormalizedChange;

/// Filter 2 (§4.4): stateless headnode services with at most one instance
/// each. Handles every matched change independently but as one procedure,
/// since none of them touch shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatelessServicesV1 {
    pub changes: Vec<NormalizedChange>,
}

impl UpdateStatelessServicesV1 {
    pub fn new(changes: Vec<NormalizedChange>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl ProcedureExecute for UpdateStatelessServicesV1 {
    fn kind(&self) -> &'static str {
        "UpdateStatelessServicesV1"
    }

    fn summarize(&self) -> String {
        let names: Vec<&str> = self.changes.iter().map(|c| c.target_service_name()).collect();
        format!("update {} stateless headnode service(s): {}", self.changes.len(), names.join(", "))
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        for change in &self.changes {
            update_and_reprovision_single(ctx, self.kind(), change).await?;
        }
        Ok(())
    }
}
