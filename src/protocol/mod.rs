//! Wire protocol: line-delimited JSON over stdio

pub mod router;
pub mod stdio;

pub use router::{RequestError, RequestRouter, ValidationError};

use crate::core::report::Report;
use serde::{Deserialize, Serialize};

/// Inbound message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Run(RunRequest),
    Cancel {
        id: String,
        /// Protocol id of the run to cancel
        run: String,
    },
}

/// One deployment-intent request as it arrives on the wire.
///
/// `kind` stays a string here; the router owns turning it into a typed
/// [`PipelineKind`](crate::core::PipelineKind) so an unknown kind is a
/// validation error, not a protocol error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub id: String,
    pub target: String,
    pub kind: String,
    #[serde(default)]
    pub enable: Vec<String>,
    #[serde(default)]
    pub disable: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub environment: Option<String>,
}

/// Outbound message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Report {
        id: String,
        report: Report,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: WireError,
    },
    Cancelled {
        id: String,
        run: String,
        /// Whether the named run was in flight
        found: bool,
    },
}

/// Structured error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// "validation", "graph" or "protocol"
    pub kind: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_decodes() {
        let line = r#"{"type":"run","id":"req-1","target":"app/Dockerfile","kind":"lint","disable":["cfn-lint"]}"#;
        let msg: InboundMessage = serde_json::from_str(line).unwrap();
        match msg {
            InboundMessage::Run(req) => {
                assert_eq!(req.id, "req-1");
                assert_eq!(req.kind, "lint");
                assert_eq!(req.disable, vec!["cfn-lint"]);
                assert!(req.enable.is_empty());
                assert!(req.timeout_secs.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_cancel_decodes() {
        let line = r#"{"type":"cancel","id":"req-2","run":"req-1"}"#;
        let msg: InboundMessage = serde_json::from_str(line).unwrap();
        assert!(matches!(msg, InboundMessage::Cancel { .. }));
    }

    #[test]
    fn test_error_without_id_omits_field() {
        let msg = OutboundMessage::Error {
            id: None,
            error: WireError {
                kind: "protocol".to_string(),
                message: "not json".to_string(),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("\"id\""));
    }
}
