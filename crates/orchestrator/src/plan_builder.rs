//! Plan Builder (§4.3): validates a batch of change requests, normalizes
//! them against an inventory snapshot, detects conflicts, drops no-ops,
//! resolves each change's target image, applies safety gates, and
//! materializes the resulting `UpdatePlan` (including its procedure list).

use std::sync::Arc;

use crate::config::SafetyConfig;
use crate::error::{Result, UpdateError, ValidationError};
use crate::external::ImageStore;
use crate::image_resolver::ImageResolver;
use crate::inventory_collector::InventorySnapshot;
use crate::model::{ChangeRequest, Instance, InstanceRef, NormalizedChange, UpdatePlan};
use crate::procedure;

pub struct PlanBuilder {
    resolver: Arc<ImageResolver>,
    images: Arc<dyn ImageStore>,
    safety: SafetyConfig,
}

impl PlanBuilder {
    pub fn new(resolver: Arc<ImageResolver>, images: Arc<dyn ImageStore>, safety: SafetyConfig) -> Self {
        Self { resolver, images, safety }
    }

    /// Builds a plan from a batch of raw change requests against `snapshot`.
    /// `headnode_server_id` feeds straight through to the Procedure
    /// Coordinator's topology checks.
    pub async fn build(&self, requests: Vec<ChangeRequest>, snapshot: &InventorySnapshot, headnode_server_id: &str, just_images: bool) -> Result<UpdatePlan> {
        let normalized = self.normalize_all(requests, snapshot).await?;
        check_conflicts(&normalized)?;
        let kept = self.drop_no_ops(normalized, snapshot).await?;
        self.apply_safety_gates(&kept, snapshot)?;

        let targ = apply_changes(&snapshot.instances, &kept);
        let mut plan = UpdatePlan::new(snapshot.instances.clone(), targ, kept, just_images);
        let procs = procedure::coordinate(&plan, self.images.as_ref(), headnode_server_id).await?;
        plan.procs = Some(procs);
        Ok(plan)
    }

    /// Validation (§4.3): every request's shape is checked before any
    /// normalization runs; failures across the whole batch are accumulated
    /// into one aggregate error rather than reported one at a time.
    async fn normalize_all(&self, requests: Vec<ChangeRequest>, snapshot: &InventorySnapshot) -> Result<Vec<NormalizedChange>> {
        let mut errors = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            if let Err(reason) = validate_shape(request) {
                errors.push(ValidationError::Invalid { index, reason });
            }
        }
        if !errors.is_empty() {
            return Err(ValidationError::aggregate(errors).into());
        }

        let mut normalized = Vec::new();
        for request in requests {
            normalized.push(self.normalize_one(request, snapshot).await?);
        }
        Ok(normalized)
    }

    async fn normalize_one(&self, request: ChangeRequest, snapshot: &InventorySnapshot) -> Result<NormalizedChange> {
        let kind = request.kind().to_string();

        let (service_name, instance_ref, image_uuid, force_same_image, force_rabbitmq) = match &request {
            ChangeRequest::CreateInstance { service, server } => {
                resolve_server(snapshot, server)?;
                (service.clone(), None, None, false, false)
            }
            ChangeRequest::DeleteInstanceAgent { service, server } => {
                resolve_server(snapshot, server)?;
                (service.clone(), Some(InstanceRef::Id(Instance::synthetic_id(server, service))), None, false, false)
            }
            ChangeRequest::DeleteInstanceVm { instance } => {
                let resolved = resolve_instance(snapshot, instance)?;
                (resolved.service_name.clone(), Some(instance.clone()), None, false, false)
            }
            ChangeRequest::DeleteService { service } => (service.clone(), None, None, false, false),
            ChangeRequest::UpdateInstance { instance, image } => {
                let resolved = resolve_instance(snapshot, instance)?;
                (resolved.service_name.clone(), Some(instance.clone()), image.clone(), false, false)
            }
            ChangeRequest::UpdateService { service, image, force_same_image, force_rabbitmq } => (service.clone(), None, image.clone(), *force_same_image, *force_rabbitmq),
            ChangeRequest::UpdateServiceByUuid { uuid, image } => (uuid.clone(), None, image.clone(), false, false),
        };

        let service = snapshot.service_by_name(&service_name).cloned().ok_or_else(|| UpdateError::UnknownService(service_name.clone()))?;

        let instance = match instance_ref {
            Some(instance_ref) => Some(resolve_instance(snapshot, &instance_ref)?.clone()),
            None => None,
        };

        let image = match image_uuid {
            Some(uuid) => Some(self.resolver.resolve_image(&uuid).await?),
            None => None,
        };

        Ok(NormalizedChange { kind, service, instance, image, force_same_image, force_rabbitmq })
    }

    /// No-op dropping (§4.3): a change with no caller-supplied image is
    /// auto-selected from the policy candidate set, and dropped if that set
    /// is empty. Either way, an `update-service` all of whose instances
    /// already run the resolved image is dropped unless `forceSameImage`.
    async fn drop_no_ops(&self, changes: Vec<NormalizedChange>, snapshot: &InventorySnapshot) -> Result<Vec<NormalizedChange>> {
        let mut kept = Vec::new();

        for mut change in changes {
            if !change.kind.starts_with("update-") {
                kept.push(change);
                continue;
            }

            let current_instances: Vec<Instance> = match &change.instance {
                Some(instance) => vec![instance.clone()],
                None => snapshot.instances.iter().filter(|i| i.service_name == change.service.name).cloned().collect(),
            };

            if change.image.is_none() {
                let mut candidates = self.resolver.candidates(&change.service, &current_instances).await?;
                if candidates.is_empty() {
                    continue;
                }
                candidates.sort_by_key(|i| i.published_at);
                change.image = candidates.pop();
            }

            let resolved_uuid = change.image.as_ref().expect("image resolved above").uuid.clone();
            let all_on_resolved = !current_instances.is_empty() && current_instances.iter().all(|i| i.image_id == resolved_uuid);
            if change.is_service_level() && !change.force_same_image && all_on_resolved {
                continue;
            }

            kept.push(change);
        }

        Ok(kept)
    }

    /// §4.3 Safety gates.
    fn apply_safety_gates(&self, changes: &[NormalizedChange], snapshot: &InventorySnapshot) -> Result<()> {
        for change in changes {
            if change.service.name == "rabbitmq" && change.is_service_level() && !change.force_rabbitmq {
                return Err(UpdateError::SafetyGate("rabbitmq updates require forceRabbitmq".to_string()).into());
            }

            if change.service.kind != crate::model::ServiceType::Vm {
                continue;
            }

            let affected: Vec<&Instance> = match &change.instance {
                Some(instance) => vec![instance],
                None => snapshot.instances.iter().filter(|i| i.service_name == change.service.name).collect(),
            };

            for instance in affected {
                let server = snapshot.server_by_id_or_hostname(&instance.server_id).ok_or_else(|| UpdateError::UnknownServer(instance.server_id.clone()))?;
                if !server.meets_platform_minimum(&self.safety.minimum_platform) {
                    return Err(UpdateError::SafetyGate(format!("server {} platform {} is below the configured minimum {}", server.hostname, server.current_platform, self.safety.minimum_platform)).into());
                }

                if let Some(minimum_build_date) = self.safety.minimum_image_build_date_by_service.get(&change.service.name) {
                    // §4.3: gate the instance's *current* image build date,
                    // not the resolved target image's.
                    if &instance.version < minimum_build_date {
                        return Err(UpdateError::SafetyGate(format!("{} instance {} current image build date {} is below the configured minimum {}", change.service.name, instance.instance_id, instance.version, minimum_build_date)).into());
                    }
                }
            }
        }
        Ok(())
    }
}

fn validate_shape(request: &ChangeRequest) -> std::result::Result<(), String> {
    let blank = |s: &str| s.trim().is_empty();
    match request {
        ChangeRequest::CreateInstance { service, server } | ChangeRequest::DeleteInstanceAgent { service, server } => {
            if blank(service) {
                return Err("service must not be empty".to_string());
            }
            if blank(server) {
                return Err("server must not be empty".to_string());
            }
        }
        ChangeRequest::DeleteInstanceVm { instance } => validate_instance_ref(instance)?,
        ChangeRequest::DeleteService { service } | ChangeRequest::UpdateService { service, .. } => {
            if blank(service) {
                return Err("service must not be empty".to_string());
            }
        }
        ChangeRequest::UpdateInstance { instance, .. } => validate_instance_ref(instance)?,
        ChangeRequest::UpdateServiceByUuid { uuid, .. } => {
            if blank(uuid) {
                return Err("uuid must not be empty".to_string());
            }
        }
    }
    Ok(())
}

fn validate_instance_ref(instance_ref: &InstanceRef) -> std::result::Result<(), String> {
    let (InstanceRef::Id(value) | InstanceRef::Uuid(value) | InstanceRef::Alias(value)) = instance_ref;
    if value.trim().is_empty() {
        return Err("instance reference must not be empty".to_string());
    }
    Ok(())
}

fn resolve_server<'a>(snapshot: &'a InventorySnapshot, server: &str) -> Result<&'a crate::model::Server> {
    snapshot.server_by_id_or_hostname(server).ok_or_else(|| UpdateError::UnknownServer(server.to_string()).into())
}

fn resolve_instance<'a>(snapshot: &'a InventorySnapshot, instance_ref: &InstanceRef) -> Result<&'a Instance> {
    let found = match instance_ref {
        InstanceRef::Id(id) => snapshot.instance_by_id(id),
        InstanceRef::Uuid(uuid) => snapshot.instance_by_id(uuid),
        InstanceRef::Alias(alias) => snapshot.instances.iter().find(|i| i.alias.as_deref() == Some(alias.as_str())),
    };
    found.ok_or_else(|| UpdateError::UnknownInstance(format!("{:?}", instance_ref)).into())
}

/// Conflict detection (§4.3): no two service-level changes on the same
/// service, no two instance-level changes on the same instance, and no
/// service-level / instance-level pair on the same service.
fn check_conflicts(changes: &[NormalizedChange]) -> Result<()> {
    for (i, a) in changes.iter().enumerate() {
        for b in &changes[i + 1..] {
            let same_service = a.target_service_name() == b.target_service_name();
            if !same_service {
                continue;
            }

            if a.is_service_level() && b.is_service_level() {
                return Err(UpdateError::Conflict(format!("two service-level changes target service {}", a.target_service_name())).into());
            }
            if a.is_instance_level() && b.is_instance_level() && a.target_instance_id() == b.target_instance_id() {
                return Err(UpdateError::Conflict(format!("two instance-level changes target instance {:?}", a.target_instance_id())).into());
            }
            if a.is_service_level() != b.is_service_level() {
                return Err(UpdateError::Conflict(format!("a service-level and an instance-level change both target service {}", a.target_service_name())).into());
            }
        }
    }
    Ok(())
}

fn apply_changes(curr: &[Instance], changes: &[NormalizedChange]) -> Vec<Instance> {
    let mut targ = curr.to_vec();
    for change in changes {
        let Some(image) = &change.image else { continue };
        match &change.instance {
            Some(instance) => {
                if let Some(existing) = targ.iter_mut().find(|i| i.instance_id == instance.instance_id) {
                    existing.image_id = image.uuid.clone();
                    existing.version = image.version.clone();
                }
            }
            None => {
                for instance in targ.iter_mut().filter(|i| i.service_name == change.service.name) {
                    instance.image_id = image.uuid.clone();
                    instance.version = image.version.clone();
                }
            }
        }
    }
    targ
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::external::fakes::FakeImages;
    use crate::model::{Image, Server, Service, ServiceType};

    fn snapshot_with_cnapi(image_id: &str) -> InventorySnapshot {
        InventorySnapshot {
            services: vec![Service::new("cnapi", ServiceType::Agent)],
            instances: vec![Instance {
                service_name: "cnapi".to_string(),
                kind: ServiceType::Agent,
                instance_id: "headnode-1/cnapi".to_string(),
                image_id: image_id.to_string(),
                version: "1.0.0".to_string(),
                server_id: "headnode-1".to_string(),
                hostname: "headnode-1".to_string(),
                admin_ip: None,
                alias: None,
            }],
            servers: vec![Server { uuid: "headnode-1".to_string(), hostname: "headnode-1".to_string(), is_headnode: true, current_platform: "20240101T000000Z".to_string(), sysinfo: serde_json::Value::Null }],
        }
    }

    fn make_builder(images: Arc<FakeImages>) -> PlanBuilder {
        let resolver = Arc::new(ImageResolver::new(images.clone(), images.clone(), "master"));
        PlanBuilder::new(resolver, images, SafetyConfig { minimum_platform: "20200101T000000Z".to_string(), minimum_image_build_date_by_service: Default::default() })
    }

    #[tokio::test]
    async fn drops_update_service_already_on_sole_candidate() {
        let images = Arc::new(FakeImages::new());
        images.add_image(Image { uuid: "img-a".to_string(), name: "cnapi".to_string(), version: "1.0.0".to_string(), published_at: Utc::now(), tags: vec![] }).await;
        let builder = make_builder(images);
        let snapshot = snapshot_with_cnapi("img-a");

        let plan = builder.build(vec![ChangeRequest::UpdateService { service: "cnapi".to_string(), image: None, force_same_image: false, force_rabbitmq: false }], &snapshot, "headnode-1", false).await.unwrap();

        assert!(plan.changes.is_empty());
        assert!(plan.procs.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conflicting_service_and_instance_changes_report_conflict() {
        let images = Arc::new(FakeImages::new());
        images.add_image(Image { uuid: "img-a".to_string(), name: "cnapi".to_string(), version: "1.0.0".to_string(), published_at: Utc::now(), tags: vec![] }).await;
        images.add_image(Image { uuid: "img-b".to_string(), name: "cnapi".to_string(), version: "2.0.0".to_string(), published_at: Utc::now(), tags: vec![] }).await;
        let builder = make_builder(images);
        let snapshot = snapshot_with_cnapi("img-a");

        let requests = vec![
            ChangeRequest::UpdateService { service: "cnapi".to_string(), image: None, force_same_image: false, force_rabbitmq: false },
            ChangeRequest::UpdateInstance { instance: InstanceRef::Id("headnode-1/cnapi".to_string()), image: None },
        ];

        let err = builder.build(requests, &snapshot, "headnode-1", false).await.unwrap_err();
        assert!(matches!(err, crate::error::OrchestratorError::Update(UpdateError::Conflict(_))));
    }

    #[tokio::test]
    async fn rabbitmq_update_without_force_flag_is_rejected() {
        let images = Arc::new(FakeImages::new());
        images.add_image(Image { uuid: "img-a".to_string(), name: "rabbitmq".to_string(), version: "1.0.0".to_string(), published_at: Utc::now(), tags: vec![] }).await;
        images.add_image(Image { uuid: "img-b".to_string(), name: "rabbitmq".to_string(), version: "2.0.0".to_string(), published_at: Utc::now(), tags: vec![] }).await;
        let builder = make_builder(images);

        let mut snapshot = snapshot_with_cnapi("img-a");
        snapshot.services.push(Service::new("rabbitmq", ServiceType::Agent));
        snapshot.instances.push(Instance {
            service_name: "rabbitmq".to_string(),
            kind: ServiceType::Agent,
            instance_id: "headnode-1/rabbitmq".to_string(),
            image_id: "img-a".to_string(),
            version: "1.0.0".to_string(),
            server_id: "headnode-1".to_string(),
            hostname: "headnode-1".to_string(),
            admin_ip: None,
            alias: None,
        });

        let err = builder
            .build(vec![ChangeRequest::UpdateService { service: "rabbitmq".to_string(), image: None, force_same_image: false, force_rabbitmq: false }], &snapshot, "headnode-1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::OrchestratorError::Update(UpdateError::SafetyGate(_))));
    }
}
