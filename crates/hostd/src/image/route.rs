//! ImageService — local image cache membership and installation.
//!
//! Downloading and extracting the actual image archive is one of the
//! bulk-transfer utilities spec.md places out of scope ("gz-tools, platform
//! image, agents shar"); this records cache membership so the rest of the
//! system (image-prefetch procedure, reprovision steps) has something real
//! to query and drive, without reimplementing the archive pipeline.

use tonic::{Request, Response, Status};
use tracing::info;

use crate::proto::image_service_server::ImageService;
use crate::proto::{HasImageRequest, HasImageResponse, InstallImageRequest, InstallImageResponse};
use crate::state::SharedState;

pub struct ImageServiceImpl {
    state: SharedState,
}

impl ImageServiceImpl {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl ImageService for ImageServiceImpl {
    async fn has_image(&self, request: Request<HasImageRequest>) -> Result<Response<HasImageResponse>, Status> {
        let req = request.into_inner();
        let present = self.state.cached_images.contains(&req.image_uuid);
        Ok(Response::new(HasImageResponse { present }))
    }

    async fn install_image(
        &self,
        request: Request<InstallImageRequest>,
    ) -> Result<Response<InstallImageResponse>, Status> {
        let req = request.into_inner();

        if self.state.cached_images.contains(&req.image_uuid) {
            return Ok(Response::new(InstallImageResponse {
                installed: true,
                message: "already present".to_string(),
            }));
        }

        std::fs::create_dir_all(&self.state.config.image_cache_dir)
            .map_err(|e| Status::internal(format!("failed to create image cache dir: {}", e)))?;

        let marker = std::path::Path::new(&self.state.config.image_cache_dir).join(&req.image_uuid);
        std::fs::write(&marker, &req.source_url)
            .map_err(|e| Status::internal(format!("failed to install image {}: {}", req.image_uuid, e)))?;

        self.state.cached_images.insert(req.image_uuid.clone());
        info!("installed image {} from {}", req.image_uuid, req.source_url);

        Ok(Response::new(InstallImageResponse { installed: true, message: "installed".to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostdConfig;
    use crate::state::HostState;
    use std::sync::Arc;

    #[tokio::test]
    async fn install_then_has_image_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HostdConfig::default();
        config.image_cache_dir = dir.path().to_string_lossy().into_owned();
        let state = Arc::new(HostState::new(config));
        let svc = ImageServiceImpl::new(state);

        let has_before = svc
            .has_image(Request::new(HasImageRequest { image_uuid: "img-1".to_string() }))
            .await
            .unwrap()
            .into_inner();
        assert!(!has_before.present);

        svc.install_image(Request::new(InstallImageRequest {
            image_uuid: "img-1".to_string(),
            source_url: "https://example.invalid/img-1".to_string(),
        }))
        .await
        .unwrap();

        let has_after = svc
            .has_image(Request::new(HasImageRequest { image_uuid: "img-1".to_string() }))
            .await
            .unwrap()
            .into_inner();
        assert!(has_after.present);
    }
}
