use std::sync::Arc;

use metrics::counter;
use tracing::{error, info_span, Instrument};
use warden_core::{Command, CommandPayload, CommandReport, ReportErrorKind};
use warden_kubehub::{IngressStore, PolicyStore};

use crate::handlers;

/// Dispatches a command to its handler by payload variant.
#[derive(Clone)]
pub struct Router {
    ingresses: Arc<dyn IngressStore>,
    policies: Arc<dyn PolicyStore>,
}

impl Router {
    pub fn new(ingresses: Arc<dyn IngressStore>, policies: Arc<dyn PolicyStore>) -> Self {
        Self { ingresses, policies }
    }

    pub async fn route(&self, cmd: &Command) -> CommandReport {
        let span = info_span!("command", command_id = %cmd.id, command_type = %cmd.payload.kind());
        let report = async {
            match &cmd.payload {
                CommandPayload::SetPolicy(data) => {
                    handlers::set_policy(&*self.ingresses, &*self.policies, &cmd.id, cmd.created_at, data).await
                }
                CommandPayload::DeletePolicy(data) => {
                    handlers::delete_policy(&*self.ingresses, &cmd.id, cmd.created_at, data).await
                }
                CommandPayload::Unknown { .. } => {
                    error!("command unsupported on this agent version");
                    CommandReport::failure(&cmd.id, ReportErrorKind::UnsupportedCommand)
                }
            }
        }
        .instrument(span)
        .await;

        match report.error_kind() {
            None => counter!("commands_applied_total", 1u64),
            Some(kind) => counter!("commands_failed_total", 1u64, "kind" => kind.as_str()),
        }
        report
    }
}
