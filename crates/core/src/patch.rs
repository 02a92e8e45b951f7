//! Merge patches touching only the two annotations this agent owns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{format_token, ANNOTATION_ACCESS_CONTROL_POLICY, ANNOTATION_LAST_PATCH_REQUESTED_AT};

/// JSON merge patch `{"metadata": {"annotations": {...}}}`.
///
/// A `None` value serializes to `null`, which makes the API server drop the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationPatch {
    metadata: PatchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct PatchMetadata {
    annotations: BTreeMap<String, Option<String>>,
}

impl AnnotationPatch {
    fn new(requested_at: DateTime<Utc>, policy: Option<&str>) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_LAST_PATCH_REQUESTED_AT.to_string(), Some(format_token(requested_at)));
        annotations.insert(ANNOTATION_ACCESS_CONTROL_POLICY.to_string(), policy.map(str::to_string));
        Self { metadata: PatchMetadata { annotations } }
    }

    pub fn set_policy(requested_at: DateTime<Utc>, policy_name: &str) -> Self {
        Self::new(requested_at, Some(policy_name))
    }

    pub fn delete_policy(requested_at: DateTime<Utc>) -> Self {
        Self::new(requested_at, None)
    }

    /// Apply with merge-patch semantics: set keys with a value, remove keys set to null.
    pub fn apply_to(&self, target: &mut BTreeMap<String, String>) {
        for (k, v) in &self.metadata.annotations {
            match v {
                Some(v) => {
                    target.insert(k.clone(), v.clone());
                }
                None => {
                    target.remove(k);
                }
            }
        }
    }
}
