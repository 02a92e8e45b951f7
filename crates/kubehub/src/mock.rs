//! In-memory cluster for tests.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;
use warden_core::AnnotationPatch;

use crate::{IngressStore, PolicyStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub patch: usize,
    pub exists: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.get + self.patch + self.exists
    }
}

/// Annotations of an Ingress right after a successful patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Default)]
struct Inner {
    ingresses: BTreeMap<(String, String), Ingress>,
    policies: BTreeSet<String>,
    calls: CallCounts,
    history: Vec<PatchRecord>,
    fail_get: Option<String>,
    fail_patch: Option<String>,
    fail_exists: Option<String>,
}

/// Ingresses and policy names held in memory, patched with merge-patch semantics.
#[derive(Default)]
pub struct MockCluster {
    inner: Mutex<Inner>,
}

/// Build a bare Ingress carrying the given annotations.
pub fn ingress(name: &str, namespace: &str, annotations: &[(&str, &str)]) -> Ingress {
    let anns: BTreeMap<String, String> =
        annotations.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(anns),
            ..Default::default()
        },
        ..Default::default()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ingress(self, ing: Ingress) -> Self {
        self.insert_ingress(ing);
        self
    }

    pub fn with_policy(self, name: &str) -> Self {
        self.inner.lock().policies.insert(name.to_string());
        self
    }

    pub fn insert_ingress(&self, ing: Ingress) {
        let ns = ing.metadata.namespace.clone().unwrap_or_default();
        let name = ing.metadata.name.clone().unwrap_or_default();
        self.inner.lock().ingresses.insert((ns, name), ing);
    }

    pub fn ingress(&self, name: &str, namespace: &str) -> Option<Ingress> {
        self.inner.lock().ingresses.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Current annotations, empty if the Ingress has none or does not exist.
    pub fn annotations(&self, name: &str, namespace: &str) -> BTreeMap<String, String> {
        self.ingress(name, namespace).and_then(|i| i.metadata.annotations).unwrap_or_default()
    }

    pub fn calls(&self) -> CallCounts {
        self.inner.lock().calls
    }

    pub fn history(&self) -> Vec<PatchRecord> {
        self.inner.lock().history.clone()
    }

    pub fn fail_get(&self, msg: &str) {
        self.inner.lock().fail_get = Some(msg.to_string());
    }

    pub fn fail_patch(&self, msg: &str) {
        self.inner.lock().fail_patch = Some(msg.to_string());
    }

    pub fn fail_exists(&self, msg: &str) {
        self.inner.lock().fail_exists = Some(msg.to_string());
    }
}

#[async_trait::async_trait]
impl IngressStore for MockCluster {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<Ingress>> {
        let mut g = self.inner.lock();
        g.calls.get += 1;
        if let Some(msg) = &g.fail_get {
            return Err(anyhow!("{}", msg));
        }
        Ok(g.ingresses.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn merge_patch(&self, name: &str, namespace: &str, patch: &AnnotationPatch) -> Result<()> {
        let mut g = self.inner.lock();
        g.calls.patch += 1;
        if let Some(msg) = &g.fail_patch {
            return Err(anyhow!("{}", msg));
        }
        let key = (namespace.to_string(), name.to_string());
        let ing = g
            .ingresses
            .get_mut(&key)
            .ok_or_else(|| anyhow!("ingresses.networking.k8s.io {:?} not found", name))?;
        let anns = ing.metadata.annotations.get_or_insert_with(BTreeMap::new);
        patch.apply_to(anns);
        let record = PatchRecord { namespace: key.0, name: key.1, annotations: anns.clone() };
        g.history.push(record);
        Ok(())
    }
}

#[async_trait::async_trait]
impl PolicyStore for MockCluster {
    async fn exists(&self, name: &str) -> Result<bool> {
        let mut g = self.inner.lock();
        g.calls.exists += 1;
        if let Some(msg) = &g.fail_exists {
            return Err(anyhow!("{}", msg));
        }
        Ok(g.policies.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use warden_core::{ANNOTATION_ACCESS_CONTROL_POLICY, ANNOTATION_LAST_PATCH_REQUESTED_AT};

    #[tokio::test]
    async fn merge_patch_records_history_and_counts_calls() {
        let cluster = MockCluster::new().with_ingress(ingress("web", "prod", &[("something", "somewhere")]));
        let at = Utc.with_ymd_and_hms(2022, 5, 1, 10, 0, 0).unwrap();

        assert!(cluster.get("web", "prod").await.unwrap().is_some());
        assert!(cluster.get("web", "other").await.unwrap().is_none());
        cluster.merge_patch("web", "prod", &AnnotationPatch::set_policy(at, "basic")).await.unwrap();

        let anns = cluster.annotations("web", "prod");
        assert_eq!(anns.get("something").map(String::as_str), Some("somewhere"));
        assert_eq!(anns.get(ANNOTATION_ACCESS_CONTROL_POLICY).map(String::as_str), Some("basic"));
        assert_eq!(anns.get(ANNOTATION_LAST_PATCH_REQUESTED_AT).map(String::as_str), Some("2022-05-01T10:00:00Z"));
        assert_eq!(cluster.calls(), CallCounts { get: 2, patch: 1, exists: 0 });
        assert_eq!(cluster.history().len(), 1);
    }

    #[tokio::test]
    async fn patching_a_missing_ingress_fails() {
        let cluster = MockCluster::new();
        let at = Utc.with_ymd_and_hms(2022, 5, 1, 10, 0, 0).unwrap();
        let err = cluster.merge_patch("web", "prod", &AnnotationPatch::delete_policy(at)).await.unwrap_err();
        assert!(err.to_string().contains("not found"), "{}", err);
        assert!(cluster.history().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let cluster = MockCluster::new().with_policy("basic");
        assert!(cluster.exists("basic").await.unwrap());
        assert!(!cluster.exists("other").await.unwrap());
        cluster.fail_exists("connection refused");
        assert_eq!(cluster.exists("basic").await.unwrap_err().to_string(), "connection refused");
        cluster.fail_get("timeout");
        assert!(cluster.get("web", "prod").await.is_err());
    }
}
