//! InventoryService — sysinfo and the on-host "agents" descriptor consumed
//! by Inventory Collector step 3 (spec.md §4.1).

use serde::Deserialize;
use tonic::{Request, Response, Status};
use tracing::warn;

use crate::proto::inventory_service_server::InventoryService;
use crate::proto::{
    ListOnHostAgentsRequest, ListOnHostAgentsResponse, OnHostAgent, SysinfoRequest, SysinfoResponse,
};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
struct AgentManifestEntry {
    service_name: String,
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    image_id: String,
    #[serde(default)]
    version: String,
}

pub struct InventoryServiceImpl {
    state: SharedState,
}

impl InventoryServiceImpl {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl InventoryService for InventoryServiceImpl {
    async fn get_sysinfo(&self, _request: Request<SysinfoRequest>) -> Result<Response<SysinfoResponse>, Status> {
        let config = &self.state.config;
        let sysinfo_json = serde_json::json!({
            "hostname": config.hostname,
            "current_platform": config.current_platform,
        })
        .to_string();

        Ok(Response::new(SysinfoResponse {
            server_uuid: config.server_uuid.clone(),
            hostname: config.hostname.clone(),
            is_headnode: config.is_headnode,
            current_platform: config.current_platform.clone(),
            sysinfo_json,
        }))
    }

    async fn list_on_host_agents(
        &self,
        _request: Request<ListOnHostAgentsRequest>,
    ) -> Result<Response<ListOnHostAgentsResponse>, Status> {
        let path = &self.state.config.agents_manifest_path;
        let agents = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Vec<AgentManifestEntry>>(&contents) {
                Ok(entries) => entries
                    .into_iter()
                    .map(|e| OnHostAgent {
                        service_name: e.service_name,
                        instance_id: e.instance_id,
                        image_id: e.image_id,
                        version: e.version,
                    })
                    .collect(),
                Err(e) => {
                    warn!("agents manifest at {} is not valid JSON: {}", path, e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Ok(Response::new(ListOnHostAgentsResponse { agents }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostdConfig;
    use crate::state::HostState;
    use std::sync::Arc;

    #[tokio::test]
    async fn reports_configured_sysinfo() {
        let mut config = HostdConfig::default();
        config.hostname = "headnode0".to_string();
        config.is_headnode = true;
        config.current_platform = "20240101T000000Z".to_string();
        let state = Arc::new(HostState::new(config));

        let svc = InventoryServiceImpl::new(state);
        let resp = svc.get_sysinfo(Request::new(SysinfoRequest {})).await.unwrap().into_inner();
        assert_eq!(resp.hostname, "headnode0");
        assert!(resp.is_headnode);
    }

    #[tokio::test]
    async fn missing_manifest_yields_empty_agent_list() {
        let state = Arc::new(HostState::new(HostdConfig::default()));
        let svc = InventoryServiceImpl::new(state);
        let resp = svc
            .list_on_host_agents(Request::new(ListOnHostAgentsRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.agents.is_empty());
    }
}
