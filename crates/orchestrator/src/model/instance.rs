use serde::{Deserialize, Serialize};

use super::service::ServiceType;

/// A running materialization of a service on exactly one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub service_name: String,
    #[serde(rename = "type")]
    pub kind: ServiceType,
    pub instance_id: String,
    pub image_id: String,
    pub version: String,
    pub server_id: String,
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Instance {
    /// Stable instance id. Legacy agent instances without a registry-assigned
    /// id use the synthetic form `server_id/service_name`.
    pub fn synthetic_id(server_id: &str, service_name: &str) -> String {
        format!("{}/{}", server_id, service_name)
    }

    pub fn with_image(&self, image_id: impl Into<String>, version: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.image_id = image_id.into();
        copy.version = version.into();
        copy
    }
}
