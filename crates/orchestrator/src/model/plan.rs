use serde::{Deserialize, Serialize};

use super::change::NormalizedChange;
use super::instance::Instance;
use crate::error::InternalError;

/// On-disk/wire format version. Readers must reject any other value.
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// A validated, conflict-free, dependency-ordered set of changes, plus the
/// inventory snapshot it was computed against.
///
/// Invariants (§3):
/// - `curr` is the inventory snapshot at planning time.
/// - `targ` equals `curr` with each affected instance's `image_id`/`version`
///   substituted by the resolved image.
/// - every change has exactly one resolved image and a fully-normalized
///   service object.
/// - no two changes target the same service, no two target the same
///   instance, and no change targets both a service and an instance of
///   that service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub v: u32,
    pub curr: Vec<Instance>,
    pub targ: Vec<Instance>,
    pub changes: Vec<NormalizedChange>,
    #[serde(default, rename = "justImages")]
    pub just_images: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procs: Option<crate::procedure::ProcedureList>,
}

impl UpdatePlan {
    pub fn new(curr: Vec<Instance>, targ: Vec<Instance>, changes: Vec<NormalizedChange>, just_images: bool) -> Self {
        Self { v: PLAN_FORMAT_VERSION, curr, targ, changes, just_images, procs: None }
    }

    /// Serialize as 4-space indented JSON, matching the persisted work
    /// directory layout (`plan.json`, §6).
    pub fn to_json_pretty(&self) -> Result<String, InternalError> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, serde_json::ser::PrettyFormatter::with_indent(b"    "));
        serde::Serialize::serialize(self, &mut ser).map_err(|e| InternalError::Serialization(e.to_string()))?;
        Ok(String::from_utf8(buf).expect("serde_json always produces valid utf8"))
    }

    pub fn from_json(data: &str) -> Result<Self, InternalError> {
        let plan: Self = serde_json::from_str(data).map_err(|e| InternalError::Serialization(e.to_string()))?;
        if plan.v != PLAN_FORMAT_VERSION {
            return Err(InternalError::UnsupportedPlanVersion(plan.v));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let plan = UpdatePlan::new(vec![], vec![], vec![], false);
        let json = plan.to_json_pretty().unwrap();
        let back = UpdatePlan::from_json(&json).unwrap();
        assert_eq!(back.v, PLAN_FORMAT_VERSION);
    }

    #[test]
    fn rejects_unsupported_version() {
        let json = r#"{"v":2,"curr":[],"targ":[],"changes":[],"justImages":false}"#;
        assert!(matches!(UpdatePlan::from_json(json), Err(InternalError::UnsupportedPlanVersion(2))));
    }
}
