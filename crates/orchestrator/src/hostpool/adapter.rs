//! Adapts [`HostPool`] to the orchestrator-core collaborator traits
//! (`NodeInventory`, `RemoteShellFanout`). This is the concrete transport
//! behind those two traits in a real deployment; tests use
//! `external::fakes::FakeNodes` instead.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::pool::HostPool;
use crate::error::{OrchestratorError, UpstreamError};
use crate::external::{NodeInventory, OnHostAgentDescriptor, RemoteResult as CoreRemoteResult, RemoteShellFanout};
use crate::model::Server;

fn upstream(op: &str, detail: impl std::fmt::Display) -> OrchestratorError {
    UpstreamError::new("hostd", op, detail).into()
}

#[async_trait]
impl NodeInventory for HostPool {
    async fn list_servers(&self, _extras: bool) -> crate::external::Result<Vec<Server>> {
        let mut servers = Vec::new();
        for host in self.list_hosts() {
            let mut client = host.client().await;
            let sysinfo = client.get_sysinfo().await.map_err(|e| upstream("get_sysinfo", e))?;
            servers.push(Server {
                uuid: sysinfo.server_uuid,
                hostname: sysinfo.hostname,
                is_headnode: sysinfo.is_headnode,
                current_platform: sysinfo.current_platform,
                sysinfo: serde_json::from_str(&sysinfo.sysinfo_json).unwrap_or(Value::Null),
            });
        }
        Ok(servers)
    }

    async fn list_platforms(&self) -> crate::external::Result<Vec<String>> {
        Ok(self.list_servers(false).await?.into_iter().map(|s| s.current_platform).collect())
    }

    async fn command_execute(&self, server_id: &str, script: &str) -> crate::external::Result<CoreRemoteResult> {
        let host = self.get_host(server_id).ok_or_else(|| upstream("command_execute", format!("no connection to server {}", server_id)))?;
        let mut client = host.client().await;
        let response = client.execute(script.to_string(), 0).await.map_err(|e| upstream("command_execute", e))?;
        Ok(CoreRemoteResult { exit_status: response.exit_status, stdout: response.stdout, stderr: response.stderr })
    }

    async fn set_boot_params(&self, server_id: &str, _params: &Value) -> crate::external::Result<()> {
        warn!("set_boot_params has no hostd RPC counterpart; ignoring for server {}", server_id);
        Ok(())
    }

    async fn ensure_image_installed(&self, server_id: &str, image_uuid: &str) -> crate::external::Result<()> {
        let host = self.get_host(server_id).ok_or_else(|| upstream("ensure_image_installed", format!("no connection to server {}", server_id)))?;
        let mut client = host.client().await;
        if client.has_image(image_uuid.to_string()).await.map_err(|e| upstream("has_image", e))? {
            return Ok(());
        }
        let source_url = format!("https://imgapi.local/images/{}/file", image_uuid);
        client.install_image(image_uuid.to_string(), source_url).await.map_err(|e| upstream("install_image", e))?;
        Ok(())
    }

    async fn list_on_host_agents(&self, server_id: &str) -> crate::external::Result<Vec<OnHostAgentDescriptor>> {
        let host = self.get_host(server_id).ok_or_else(|| upstream("list_on_host_agents", format!("no connection to server {}", server_id)))?;
        let mut client = host.client().await;
        let agents = client.list_on_host_agents().await.map_err(|e| upstream("list_on_host_agents", e))?;
        Ok(agents
            .into_iter()
            .map(|a| OnHostAgentDescriptor { service_name: a.service_name, instance_id: a.instance_id, image_id: a.image_id, version: a.version })
            .collect())
    }
}

#[async_trait]
impl RemoteShellFanout for HostPool {
    async fn exec(&self, targets: Option<&[String]>, script: &str) -> crate::external::Result<Vec<(String, CoreRemoteResult)>> {
        let server_ids: Vec<String> = match targets {
            Some(ts) => ts.to_vec(),
            None => self.list_hosts().iter().map(|h| h.config.server_id.clone()).collect(),
        };

        let mut results = Vec::with_capacity(server_ids.len());
        for server_id in server_ids {
            let result = NodeInventory::command_execute(self, &server_id, script).await?;
            results.push((server_id, result));
        }
        Ok(results)
    }
}
