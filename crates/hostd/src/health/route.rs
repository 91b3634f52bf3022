//! HealthService — plain connection-level liveness, separate from the
//! application-level shard status the orchestrator polls directly from the
//! replicated-DB peers (spec.md §4.5).

use tonic::{Request, Response, Status as TonicStatus};

use crate::proto::health_check_response::Status;
use crate::proto::health_service_server::HealthService;
use crate::proto::{HealthCheckRequest, HealthCheckResponse};
use crate::state::SharedState;

pub struct HealthServiceImpl {
    state: SharedState,
}

impl HealthServiceImpl {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl HealthService for HealthServiceImpl {
    async fn check(&self, _request: Request<HealthCheckRequest>) -> Result<Response<HealthCheckResponse>, TonicStatus> {
        let message = format!("hostd ok on {}", self.state.config.hostname);
        Ok(Response::new(HealthCheckResponse { status: Status::Healthy as i32, message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostdConfig;
    use crate::state::HostState;
    use std::sync::Arc;

    #[tokio::test]
    async fn reports_healthy() {
        let state = Arc::new(HostState::new(HostdConfig::default()));
        let svc = HealthServiceImpl::new(state);
        let resp = svc.check(Request::new(HealthCheckRequest {})).await.unwrap().into_inner();
        assert_eq!(resp.status, Status::Healthy as i32);
    }
}
