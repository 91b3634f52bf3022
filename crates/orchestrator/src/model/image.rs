use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable image artifact. Ordering within a name is by `published_at`
/// ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub uuid: String,
    pub name: String,
    pub version: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Image {
    pub fn sort_by_published_at(images: &mut [Image]) {
        images.sort_by_key(|i| i.published_at);
    }
}
