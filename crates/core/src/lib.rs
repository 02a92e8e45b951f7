//! Warden core types.
//!
//! Commands arrive from the control plane, are applied against Ingress
//! annotations and answered with exactly one [`CommandReport`] each.

#![forbid(unsafe_code)]

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod ingress_id;
pub mod patch;

pub use ingress_id::{IngressId, IngressIdError};
pub use patch::AnnotationPatch;

/// Idempotency token: `CreatedAt` of the last command applied to an Ingress.
pub const ANNOTATION_LAST_PATCH_REQUESTED_AT: &str = "hub.traefik.io/last-patch-requested-at";

/// Name of the access control policy assigned to an Ingress.
pub const ANNOTATION_ACCESS_CONTROL_POLICY: &str = "hub.traefik.io/access-control-policy";

pub const KIND_SET_INGRESS_ACP: &str = "set-ingress-acp";
pub const KIND_DELETE_INGRESS_ACP: &str = "delete-ingress-acp";

pub mod prelude {
    pub use super::{
        AnnotationPatch, Command, CommandPayload, CommandReport, DeletePolicy, IngressId, ReportError,
        ReportErrorKind, ReportStatus, SetPolicy,
    };
}

/// Render a timestamp the way it is stored in the token annotation.
///
/// UTC with a `Z` suffix. Sub-second digits are kept only when present, so
/// `2022-05-01T10:00:00Z` and `2022-05-01T10:00:00.250Z` both round-trip through
/// [`parse_token`] unchanged.
pub fn format_token(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_token(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

// ---------------- Commands ----------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPolicy {
    pub ingress_id: String,
    #[serde(rename = "acpName")]
    pub policy_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePolicy {
    pub ingress_id: String,
}

/// What a command asks for. Anything this agent version does not understand is `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPayload {
    SetPolicy(SetPolicy),
    DeletePolicy(DeletePolicy),
    Unknown { kind: Option<String> },
}

impl CommandPayload {
    pub fn kind(&self) -> &str {
        match self {
            CommandPayload::SetPolicy(_) => KIND_SET_INGRESS_ACP,
            CommandPayload::DeletePolicy(_) => KIND_DELETE_INGRESS_ACP,
            CommandPayload::Unknown { kind } => kind.as_deref().unwrap_or("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: String,
    /// Logical ordering and idempotency key.
    pub created_at: DateTime<Utc>,
    pub payload: CommandPayload,
}

/// JSON shape of a command as exchanged with the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCommand {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid {kind} payload: {source}")]
    Payload { kind: String, source: serde_json::Error },
}

/// Decode the payload of a known command type. Unknown or absent types are not an error.
pub fn decode_payload(kind: Option<&str>, data: Option<&serde_json::Value>) -> Result<CommandPayload, DecodeError> {
    let data = data.cloned().unwrap_or(serde_json::Value::Null);
    let err = |k: &str, source| DecodeError::Payload { kind: k.to_string(), source };
    match kind {
        Some(KIND_SET_INGRESS_ACP) => serde_json::from_value(data)
            .map(CommandPayload::SetPolicy)
            .map_err(|e| err(KIND_SET_INGRESS_ACP, e)),
        Some(KIND_DELETE_INGRESS_ACP) => serde_json::from_value(data)
            .map(CommandPayload::DeletePolicy)
            .map_err(|e| err(KIND_DELETE_INGRESS_ACP, e)),
        other => Ok(CommandPayload::Unknown { kind: other.map(str::to_string) }),
    }
}

impl From<WireCommand> for Command {
    fn from(w: WireCommand) -> Self {
        let payload = match decode_payload(w.kind.as_deref(), w.data.as_ref()) {
            Ok(p) => p,
            Err(e) => {
                warn!(command_id = %w.id, error = %e, "undecodable command payload; treating as unsupported");
                CommandPayload::Unknown { kind: w.kind.clone() }
            }
        };
        Command { id: w.id, created_at: w.created_at, payload }
    }
}

// ---------------- Reports ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportErrorKind {
    InternalError,
    UnsupportedCommand,
    InvalidIngressId,
    IngressNotFound,
    AcpNotFound,
}

impl ReportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportErrorKind::InternalError => "internal-error",
            ReportErrorKind::UnsupportedCommand => "unsupported-command",
            ReportErrorKind::InvalidIngressId => "invalid-ingress-id",
            ReportErrorKind::IngressNotFound => "ingress-not-found",
            ReportErrorKind::AcpNotFound => "acp-not-found",
        }
    }
}

impl std::fmt::Display for ReportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportError {
    #[serde(rename = "type")]
    pub kind: ReportErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReport {
    pub command_id: String,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
}

impl CommandReport {
    pub fn success(command_id: impl Into<String>) -> Self {
        Self { command_id: command_id.into(), status: ReportStatus::Success, error: None }
    }

    pub fn failure(command_id: impl Into<String>, kind: ReportErrorKind) -> Self {
        Self {
            command_id: command_id.into(),
            status: ReportStatus::Failure,
            error: Some(ReportError { kind, data: None }),
        }
    }

    /// `internal-error` carrying the cause's message as diagnostic data.
    pub fn internal_error(command_id: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self {
            command_id: command_id.into(),
            status: ReportStatus::Failure,
            error: Some(ReportError {
                kind: ReportErrorKind::InternalError,
                data: Some(serde_json::Value::String(cause.to_string())),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }

    pub fn error_kind(&self) -> Option<ReportErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn token_keeps_full_precision_in_utc() {
        let whole = Utc.with_ymd_and_hms(2022, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(format_token(whole), "2022-05-01T10:00:00Z");
        let ts = whole + chrono::Duration::milliseconds(250);
        assert_eq!(format_token(ts), "2022-05-01T10:00:00.250Z");
        assert_eq!(parse_token(&format_token(ts)).unwrap(), ts);
        let back = parse_token("2022-05-01T12:00:00+02:00").unwrap();
        assert_eq!(back, Utc.with_ymd_and_hms(2022, 5, 1, 10, 0, 0).unwrap());
        assert!(parse_token("yesterday").is_err());
    }

    #[test]
    fn wire_command_decodes_known_kinds() {
        let raw = r#"[
            {"id": "c1", "createdAt": "2022-05-01T10:00:00Z", "type": "set-ingress-acp",
             "data": {"ingressId": "web@prod.ingress.networking.k8s.io", "acpName": "basic"}},
            {"id": "c2", "createdAt": "2022-05-01T10:00:01Z", "type": "delete-ingress-acp",
             "data": {"ingressId": "web@prod.ingress.networking.k8s.io"}}
        ]"#;
        let wire: Vec<WireCommand> = serde_json::from_str(raw).unwrap();
        let cmds: Vec<Command> = wire.into_iter().map(Command::from).collect();
        assert_eq!(
            cmds[0].payload,
            CommandPayload::SetPolicy(SetPolicy {
                ingress_id: "web@prod.ingress.networking.k8s.io".into(),
                policy_name: "basic".into(),
            })
        );
        assert_eq!(
            cmds[1].payload,
            CommandPayload::DeletePolicy(DeletePolicy { ingress_id: "web@prod.ingress.networking.k8s.io".into() })
        );
    }

    #[test]
    fn unknown_absent_and_malformed_payloads_are_unknown() {
        let raw = r#"[
            {"id": "a", "createdAt": "2022-05-01T10:00:00Z", "type": "restart-everything", "data": {}},
            {"id": "b", "createdAt": "2022-05-01T10:00:00Z"},
            {"id": "c", "createdAt": "2022-05-01T10:00:00Z", "type": "set-ingress-acp", "data": "nope"}
        ]"#;
        let wire: Vec<WireCommand> = serde_json::from_str(raw).unwrap();
        let kinds: Vec<CommandPayload> = wire.into_iter().map(|w| Command::from(w).payload).collect();
        assert_eq!(kinds[0], CommandPayload::Unknown { kind: Some("restart-everything".into()) });
        assert_eq!(kinds[1], CommandPayload::Unknown { kind: None });
        assert_eq!(kinds[2], CommandPayload::Unknown { kind: Some("set-ingress-acp".into()) });
    }

    #[test]
    fn decode_payload_reports_the_broken_kind() {
        let err = decode_payload(Some(KIND_DELETE_INGRESS_ACP), None).unwrap_err();
        assert!(err.to_string().starts_with("invalid delete-ingress-acp payload"), "{}", err);
    }

    #[test]
    fn report_wire_shape() {
        let ok = serde_json::to_value(CommandReport::success("c1")).unwrap();
        assert_eq!(ok, serde_json::json!({"commandId": "c1", "status": "success"}));

        let nf = serde_json::to_value(CommandReport::failure("c2", ReportErrorKind::AcpNotFound)).unwrap();
        assert_eq!(nf, serde_json::json!({"commandId": "c2", "status": "failure", "error": {"type": "acp-not-found"}}));

        let ie = serde_json::to_value(CommandReport::internal_error("c3", "operation already executed")).unwrap();
        assert_eq!(
            ie,
            serde_json::json!({
                "commandId": "c3",
                "status": "failure",
                "error": {"type": "internal-error", "data": "operation already executed"}
            })
        );
    }

    #[test]
    fn error_kind_strings_match_serde() {
        for kind in [
            ReportErrorKind::InternalError,
            ReportErrorKind::UnsupportedCommand,
            ReportErrorKind::InvalidIngressId,
            ReportErrorKind::IngressNotFound,
            ReportErrorKind::AcpNotFound,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), serde_json::Value::String(kind.as_str().into()));
        }
    }
}
