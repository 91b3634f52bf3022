use serde::{Deserialize, Serialize};

use super::image::Image;
use super::instance::Instance;
use super::service::Service;

/// Addresses a single instance by any of the three forms the planner
/// accepts: its stable id, its uuid (vm instances), or a human alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRef {
    Id(String),
    Uuid(String),
    Alias(String),
}

/// One of the seven input shapes a caller may submit, discriminated by
/// `type`. Each variant is validated independently (§4.3 Validation); any
/// other key combination is a `ValidationError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChangeRequest {
    CreateInstance { service: String, server: String },
    /// Agent instances are addressed by (service, server); there is no
    /// instance uuid for a legacy agent.
    DeleteInstanceAgent { service: String, server: String },
    /// Vm instances are addressed by instance ref (id/uuid/alias).
    DeleteInstanceVm { instance: InstanceRef },
    DeleteService { service: String },
    UpdateInstance { instance: InstanceRef, #[serde(default)] image: Option<String> },
    UpdateService {
        service: String,
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        force_same_image: bool,
        #[serde(default)]
        force_rabbitmq: bool,
    },
    /// `update-service` and `update-instance` share a `type` tag family but
    /// the two addressing variants above plus this bare service-name form
    /// round out the full set of seven validated shapes.
    UpdateServiceByUuid { uuid: String, #[serde(default)] image: Option<String> },
}

impl ChangeRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeRequest::CreateInstance { .. } => "create-instance",
            ChangeRequest::DeleteInstanceAgent { .. } => "delete-instance",
            ChangeRequest::DeleteInstanceVm { .. } => "delete-instance",
            ChangeRequest::DeleteService { .. } => "delete-service",
            ChangeRequest::UpdateInstance { .. } => "update-instance",
            ChangeRequest::UpdateService { .. } => "update-service",
            ChangeRequest::UpdateServiceByUuid { .. } => "update-service",
        }
    }

    /// True for the two `-service` shapes, used by conflict detection (§4.3).
    pub fn is_service_level(&self) -> bool {
        matches!(self, ChangeRequest::UpdateService { .. } | ChangeRequest::UpdateServiceByUuid { .. } | ChangeRequest::DeleteService { .. })
    }

    /// True for the two `-instance` shapes.
    pub fn is_instance_level(&self) -> bool {
        matches!(self, ChangeRequest::UpdateInstance { .. } | ChangeRequest::DeleteInstanceAgent { .. } | ChangeRequest::DeleteInstanceVm { .. })
    }
}

/// A change after normalization: every field resolved to a full object,
/// exactly one image attached (§4.3 Dependency resolution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedChange {
    pub kind: String,
    pub service: Service,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<Instance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(default)]
    pub force_same_image: bool,
    #[serde(default)]
    pub force_rabbitmq: bool,
}

impl NormalizedChange {
    /// Service this change targets, for conflict detection.
    pub fn target_service_name(&self) -> &str {
        &self.service.name
    }

    /// Instance this change targets, if it is an instance-level change.
    pub fn target_instance_id(&self) -> Option<&str> {
        self.instance.as_ref().map(|i| i.instance_id.as_str())
    }

    pub fn is_service_level(&self) -> bool {
        self.kind.ends_with("-service")
    }

    pub fn is_instance_level(&self) -> bool {
        self.kind.ends_with("-instance")
    }
}
