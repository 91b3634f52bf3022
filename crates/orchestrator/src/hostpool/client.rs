use tonic::transport::Channel;

use super::{HostPoolError, Result};
use crate::proto::{
    command_service_client::CommandServiceClient, health_service_client::HealthServiceClient, image_service_client::ImageServiceClient,
    inventory_service_client::InventoryServiceClient, ExecuteRequest, ExecuteResponse, HasImageRequest, HealthCheckRequest,
    HealthCheckResponse, InstallImageRequest, InstallImageResponse, OnHostAgent, SysinfoResponse,
};

/// Wrapper around the generated gRPC clients for a single `hostd`. Tonic
/// clients are cheap to clone (`Channel` is `Arc`-backed internally).
#[derive(Clone)]
pub struct HostGrpcClient {
    command: CommandServiceClient<Channel>,
    inventory: InventoryServiceClient<Channel>,
    image: ImageServiceClient<Channel>,
    health: HealthServiceClient<Channel>,
}

impl HostGrpcClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            command: CommandServiceClient::new(channel.clone()),
            inventory: InventoryServiceClient::new(channel.clone()),
            image: ImageServiceClient::new(channel.clone()),
            health: HealthServiceClient::new(channel),
        }
    }

    pub async fn execute(&mut self, script: String, timeout_secs: u32) -> Result<ExecuteResponse> {
        let response = self.command.execute(tonic::Request::new(ExecuteRequest { script, timeout_secs })).await?;
        Ok(response.into_inner())
    }

    pub async fn get_sysinfo(&mut self) -> Result<SysinfoResponse> {
        let response = self.inventory.get_sysinfo(tonic::Request::new(crate::proto::SysinfoRequest {})).await?;
        Ok(response.into_inner())
    }

    pub async fn list_on_host_agents(&mut self) -> Result<Vec<OnHostAgent>> {
        let response = self.inventory.list_on_host_agents(tonic::Request::new(crate::proto::ListOnHostAgentsRequest {})).await?;
        Ok(response.into_inner().agents)
    }

    pub async fn has_image(&mut self, image_uuid: String) -> Result<bool> {
        let response = self.image.has_image(tonic::Request::new(HasImageRequest { image_uuid })).await?;
        Ok(response.into_inner().present)
    }

    pub async fn install_image(&mut self, image_uuid: String, source_url: String) -> Result<InstallImageResponse> {
        let response = self.image.install_image(tonic::Request::new(InstallImageRequest { image_uuid, source_url })).await?;
        Ok(response.into_inner())
    }

    pub async fn check_health(&mut self) -> Result<HealthCheckResponse> {
        let response = self.health.check(tonic::Request::new(HealthCheckRequest {})).await?;
        Ok(response.into_inner())
    }
}

impl From<HostPoolError> for tonic::Status {
    fn from(err: HostPoolError) -> Self {
        tonic::Status::internal(err.to_string())
    }
}
