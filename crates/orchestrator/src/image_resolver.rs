//! Image Resolver (§4.2): for a target service, determines the candidate
//! image set and resolves a single image by uuid, consulting the local
//! image store before the upstream registry.

use std::sync::Arc;

use crate::error::{OrchestratorError, Result, UpstreamError};
use crate::external::{ImageFilter, ImageRegistry, ImageStore};
use crate::model::{Image, Instance, Service};

pub struct ImageResolver {
    local: Arc<dyn ImageStore>,
    upstream: Arc<dyn ImageRegistry>,
    channel_tag: String,
}

impl ImageResolver {
    pub fn new(local: Arc<dyn ImageStore>, upstream: Arc<dyn ImageRegistry>, channel_tag: impl Into<String>) -> Self {
        Self { local, upstream, channel_tag: channel_tag.into() }
    }

    /// `candidates(service, currentInstances) → [Image]`, ordered by
    /// `published_at` ascending (§4.2 Policy).
    pub async fn candidates(&self, service: &Service, current_instances: &[Instance]) -> Result<Vec<Image>> {
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();

        let used_image_ids: Vec<&str> = current_instances.iter().filter(|i| i.service_name == service.name).map(|i| i.image_id.as_str()).collect();

        if used_image_ids.is_empty() {
            // No instances exist yet: seed the candidate set from the
            // service's configured default image.
            if let Some(seed_uuid) = service.default_image_uuid() {
                if let Some(image) = self.get_tolerating_not_found(seed_uuid).await? {
                    if seen.insert(image.uuid.clone()) {
                        result.push(image);
                    }
                }
            }
            return Ok(result);
        }

        let mut oldest_used: Option<Image> = None;
        for uuid in &used_image_ids {
            let Some(image) = self.get_tolerating_not_found(uuid).await? else { continue };
            if oldest_used.as_ref().map(|o| image.published_at < o.published_at).unwrap_or(true) {
                oldest_used = Some(image.clone());
            }
            if seen.insert(image.uuid.clone()) {
                result.push(image);
            }
        }

        if let Some(oldest) = &oldest_used {
            let filter = ImageFilter { name: Some(oldest.name.clone()), channel_tag: Some(self.channel_tag.clone()) };
            let newer = self.upstream.list_images(&filter).await.map_err(|e| UpstreamError::new("image-registry", "list_images", e))?;
            for image in newer.into_iter().filter(|i| i.published_at > oldest.published_at) {
                if seen.insert(image.uuid.clone()) {
                    result.push(image);
                }
            }
        }

        Image::sort_by_published_at(&mut result);
        Ok(result)
    }

    /// `resolveImage(uuid)`: local store first, then upstream registry.
    /// Not-found is a distinct, propagated error (never silently tolerated
    /// here, unlike in `candidates`).
    pub async fn resolve_image(&self, uuid: &str) -> Result<Image> {
        match self.local.get_image(uuid).await {
            Ok(image) => Ok(image),
            Err(OrchestratorError::ResourceNotFound(_)) => self.upstream.get_image(uuid).await.map_err(|e| match e {
                OrchestratorError::ResourceNotFound(_) => e,
                other => UpstreamError::new("image-registry", "get_image", other).into(),
            }),
            Err(e) => Err(UpstreamError::new("image-store", "get_image", e).into()),
        }
    }

    /// Wraps the currently-used-image lookup: a `ResourceNotFound` means the
    /// image was garbage-collected locally and is simply omitted (§4.2).
    async fn get_tolerating_not_found(&self, uuid: &str) -> Result<Option<Image>> {
        match self.local.get_image(uuid).await {
            Ok(image) => Ok(Some(image)),
            Err(OrchestratorError::ResourceNotFound(_)) => Ok(None),
            Err(e) => Err(UpstreamError::new("image-store", "get_image", e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::external::fakes::FakeImages;
    use crate::model::ServiceType;

    fn image(uuid: &str, name: &str, year: i32) -> Image {
        Image { uuid: uuid.to_string(), name: name.to_string(), version: "1.0.0".to_string(), published_at: Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap(), tags: vec!["master".to_string()] }
    }

    fn instance(service_name: &str, image_id: &str) -> Instance {
        Instance {
            service_name: service_name.to_string(),
            kind: ServiceType::Agent,
            instance_id: format!("server-1/{}", service_name),
            image_id: image_id.to_string(),
            version: "1.0.0".to_string(),
            server_id: "server-1".to_string(),
            hostname: "server-1".to_string(),
            admin_ip: None,
            alias: None,
        }
    }

    #[tokio::test]
    async fn candidates_includes_used_image_and_newer_upstream_images() {
        let images = Arc::new(FakeImages::new());
        images.add_image(image("img-a", "cnapi", 2023)).await;
        images.add_image(image("img-b", "cnapi", 2024)).await;

        let resolver = ImageResolver::new(images.clone(), images, "master");
        let service = Service::new("cnapi", ServiceType::Agent);
        let current = vec![instance("cnapi", "img-a")];

        let candidates = resolver.candidates(&service, &current).await.unwrap();
        let uuids: Vec<&str> = candidates.iter().map(|i| i.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["img-a", "img-b"]);
    }

    #[tokio::test]
    async fn candidates_tolerates_missing_used_image() {
        let images = Arc::new(FakeImages::new());
        images.mark_missing("img-gone").await;

        let resolver = ImageResolver::new(images.clone(), images, "master");
        let service = Service::new("cnapi", ServiceType::Agent);
        let current = vec![instance("cnapi", "img-gone")];

        let candidates = resolver.candidates(&service, &current).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn resolve_image_falls_back_to_upstream() {
        let local = Arc::new(FakeImages::new());
        local.mark_missing("img-upstream-only").await;
        let upstream = Arc::new(FakeImages::new());
        upstream.add_image(image("img-upstream-only", "cnapi", 2024)).await;

        let resolver = ImageResolver::new(local, upstream, "master");
        let resolved = resolver.resolve_image("img-upstream-only").await.unwrap();
        assert_eq!(resolved.name, "cnapi");
    }
}
