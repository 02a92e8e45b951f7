//! Set/delete the access control policy of an Ingress.
//!
//! Each handler short-circuits on the first failure and always yields exactly
//! one report: parse id, fetch Ingress, check the idempotency token, (set only)
//! check the policy exists, then merge-patch the two annotations.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use warden_core::{AnnotationPatch, CommandReport, DeletePolicy, IngressId, ReportErrorKind, SetPolicy};
use warden_kubehub::{IngressStore, PolicyStore};

use crate::guard;

pub const ALREADY_EXECUTED: &str = "operation already executed";

/// Shared prefix of both handlers: resolve the target and run the guard.
async fn load_target(
    ingresses: &dyn IngressStore,
    command_id: &str,
    requested_at: DateTime<Utc>,
    ingress_id: &str,
) -> Result<IngressId, CommandReport> {
    let id = match IngressId::parse(ingress_id) {
        Ok(id) => id,
        Err(e) => {
            error!(ingress_id = %ingress_id, error = %e, "unable to extract name and namespace from ingress id");
            return Err(CommandReport::failure(command_id, ReportErrorKind::InvalidIngressId));
        }
    };

    let ingress = match ingresses.get(&id.name, &id.namespace).await {
        Ok(Some(ing)) => ing,
        Ok(None) => {
            error!(ingress_name = %id.name, ingress_namespace = %id.namespace, "ingress not found");
            return Err(CommandReport::failure(command_id, ReportErrorKind::IngressNotFound));
        }
        Err(e) => {
            error!(ingress_name = %id.name, ingress_namespace = %id.namespace, error = ?e, "unable to get ingress");
            return Err(CommandReport::internal_error(command_id, format!("{:#}", e)));
        }
    };

    if guard::is_stale(&ingress.metadata, requested_at) {
        debug!(ingress_name = %id.name, ingress_namespace = %id.namespace, "command already applied; ignoring");
        return Err(CommandReport::internal_error(command_id, ALREADY_EXECUTED));
    }

    Ok(id)
}

pub async fn set_policy(
    ingresses: &dyn IngressStore,
    policies: &dyn PolicyStore,
    command_id: &str,
    requested_at: DateTime<Utc>,
    data: &SetPolicy,
) -> CommandReport {
    let id = match load_target(ingresses, command_id, requested_at, &data.ingress_id).await {
        Ok(id) => id,
        Err(report) => return report,
    };
    let acp = data.policy_name.as_str();

    match policies.exists(acp).await {
        Ok(true) => {}
        Ok(false) => {
            error!(acp_name = %acp, "access control policy not found");
            return CommandReport::failure(command_id, ReportErrorKind::AcpNotFound);
        }
        Err(e) => {
            error!(acp_name = %acp, error = ?e, "unable to look up access control policy");
            return CommandReport::internal_error(command_id, format!("{:#}", e));
        }
    }

    let patch = AnnotationPatch::set_policy(requested_at, acp);
    if let Err(e) = ingresses.merge_patch(&id.name, &id.namespace, &patch).await {
        error!(
            ingress_name = %id.name,
            ingress_namespace = %id.namespace,
            acp_name = %acp,
            error = ?e,
            "unable to set ACP on ingress"
        );
        return CommandReport::internal_error(command_id, format!("{:#}", e));
    }

    info!(ingress_name = %id.name, ingress_namespace = %id.namespace, acp_name = %acp, "ACP set on ingress");
    CommandReport::success(command_id)
}

pub async fn delete_policy(
    ingresses: &dyn IngressStore,
    command_id: &str,
    requested_at: DateTime<Utc>,
    data: &DeletePolicy,
) -> CommandReport {
    let id = match load_target(ingresses, command_id, requested_at, &data.ingress_id).await {
        Ok(id) => id,
        Err(report) => return report,
    };

    let patch = AnnotationPatch::delete_policy(requested_at);
    if let Err(e) = ingresses.merge_patch(&id.name, &id.namespace, &patch).await {
        error!(ingress_name = %id.name, ingress_namespace = %id.namespace, error = ?e, "unable to remove ACP from ingress");
        return CommandReport::internal_error(command_id, format!("{:#}", e));
    }

    info!(ingress_name = %id.name, ingress_namespace = %id.namespace, "ACP removed from ingress");
    CommandReport::success(command_id)
}
