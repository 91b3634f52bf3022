use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A physical host in the fleet. Exactly one server is the headnode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub uuid: String,
    pub hostname: String,
    pub is_headnode: bool,
    /// Platform image timestamp, e.g. `20240101T000000Z`. Compared
    /// lexicographically against the configured safety-gate minimum (§4.3).
    pub current_platform: String,
    #[serde(default)]
    pub sysinfo: Value,
}

impl Server {
    pub fn meets_platform_minimum(&self, minimum: &str) -> bool {
        self.current_platform.as_str() >= minimum
    }
}
