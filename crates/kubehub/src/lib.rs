//! Warden kubehub – the cluster objects commands act upon.
//!
//! Two seams: [`IngressStore`] (read an Ingress, merge-patch its annotations)
//! and [`PolicyStore`] (does an AccessControlPolicy exist). Both have a kube-rs
//! implementation and an in-memory one in [`mock`].

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{Context, Result};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{Api, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use metrics::histogram;
use tracing::debug;
use warden_core::AnnotationPatch;

pub mod mock;

pub use mock::MockCluster;

pub const ACP_GROUP: &str = "hub.traefik.io";
pub const ACP_VERSION: &str = "v1alpha1";
pub const ACP_KIND: &str = "AccessControlPolicy";

/// Build a client from the ambient kubeconfig or in-cluster service account.
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client (kubeconfig or in-cluster env)")
}

/// Read/patch access to Ingress objects.
#[async_trait::async_trait]
pub trait IngressStore: Send + Sync {
    /// `Ok(None)` when the Ingress does not exist.
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<Ingress>>;

    /// Apply a JSON merge patch; only the keys present in the patch are touched.
    async fn merge_patch(&self, name: &str, namespace: &str, patch: &AnnotationPatch) -> Result<()>;
}

/// Existence check for cluster-scoped access control policies.
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;
}

pub struct KubeIngressStore {
    client: Client,
}

impl KubeIngressStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl IngressStore for KubeIngressStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<Ingress>> {
        let t0 = Instant::now();
        let res = self
            .api(namespace)
            .get_opt(name)
            .await
            .with_context(|| format!("getting ingress {}/{}", namespace, name));
        histogram!("kube_call_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => "get_ingress");
        res
    }

    async fn merge_patch(&self, name: &str, namespace: &str, patch: &AnnotationPatch) -> Result<()> {
        let t0 = Instant::now();
        let pp = PatchParams::default();
        let res = self.api(namespace).patch(name, &pp, &Patch::Merge(patch)).await;
        histogram!("kube_call_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => "patch_ingress");
        let obj = res.with_context(|| format!("patching ingress {}/{}", namespace, name))?;
        debug!(ns = %namespace, name = %name, rv = ?obj.metadata.resource_version, "ingress patched");
        Ok(())
    }
}

pub struct KubePolicyStore {
    api: Api<DynamicObject>,
}

impl KubePolicyStore {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(ACP_GROUP, ACP_VERSION, ACP_KIND);
        let ar = ApiResource::from_gvk(&gvk);
        Self { api: Api::all_with(client, &ar) }
    }
}

#[async_trait::async_trait]
impl PolicyStore for KubePolicyStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let t0 = Instant::now();
        let res = self.api.get_opt(name).await;
        histogram!("kube_call_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => "get_acp");
        let found = res.with_context(|| format!("getting {} {}", ACP_KIND, name))?;
        Ok(found.is_some())
    }
}
