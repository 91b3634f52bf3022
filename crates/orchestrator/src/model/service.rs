use serde::{Deserialize, Serialize};

/// A catalog entry: a named, globally-unique service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ServiceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ServiceParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Vm,
    Agent,
}

/// Service-level parameters. `image_uuid` seeds the Image Resolver's
/// candidate set when the service currently has zero instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uuid: Option<String>,
}

impl Service {
    pub fn new(name: impl Into<String>, kind: ServiceType) -> Self {
        Self { name: name.into(), kind, uuid: None, params: None }
    }

    pub fn default_image_uuid(&self) -> Option<&str> {
        self.params.as_ref().and_then(|p| p.image_uuid.as_deref())
    }
}
