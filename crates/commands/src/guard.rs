//! Idempotency guard backed by the `last-patch-requested-at` annotation.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::warn;
use warden_core::{parse_token, ANNOTATION_LAST_PATCH_REQUESTED_AT};

/// Token stored on the object, if present and well-formed.
///
/// A malformed token is logged and ignored.
pub fn last_patch_requested_at(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    let raw = meta.annotations.as_ref()?.get(ANNOTATION_LAST_PATCH_REQUESTED_AT)?;
    match parse_token(raw) {
        Ok(ts) => Some(ts),
        Err(e) => {
            warn!(
                error = %e,
                value = %raw,
                "unexpected {:?} annotation format, expected RFC-3339; ignoring annotation",
                ANNOTATION_LAST_PATCH_REQUESTED_AT
            );
            None
        }
    }
}

/// A command is stale unless it was requested strictly after the stored token.
pub fn is_stale(meta: &ObjectMeta, requested_at: DateTime<Utc>) -> bool {
    match last_patch_requested_at(meta) {
        Some(stored) => requested_at <= stored,
        None => false,
    }
}
