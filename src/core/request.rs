//! Accepted deployment-intent request

use crate::core::catalog::PipelineKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// A validated request, immutable once accepted.
///
/// Constructed by the request router after validation; the orchestrator
/// and aggregator only ever read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Internal run identity
    pub id: Uuid,

    /// Caller-supplied correlation id from the wire message
    pub protocol_id: String,

    /// Target artifact (Dockerfile, template, SAM application directory)
    pub target: PathBuf,

    pub kind: PipelineKind,

    /// Steps explicitly added beyond the kind's subset
    pub enable: Vec<String>,

    /// Steps explicitly removed from the selection
    pub disable: Vec<String>,

    /// Per-step timeout override for this run
    pub timeout: Option<Duration>,

    /// Deployment target id; keys the exclusive deploy lock
    pub environment: String,
}

impl Request {
    pub fn new(
        protocol_id: impl Into<String>,
        target: impl Into<PathBuf>,
        kind: PipelineKind,
        environment: impl Into<String>,
    ) -> Self {
        Request {
            id: Uuid::new_v4(),
            protocol_id: protocol_id.into(),
            target: target.into(),
            kind,
            enable: Vec::new(),
            disable: Vec::new(),
            timeout: None,
            environment: environment.into(),
        }
    }

    /// Effective timeout for a step, honoring the request override.
    pub fn step_timeout(&self, step_timeout: Duration) -> Duration {
        self.timeout.unwrap_or(step_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_timeout_override() {
        let mut request = Request::new("req-1", "Dockerfile", PipelineKind::Lint, "default");
        assert_eq!(
            request.step_timeout(Duration::from_secs(300)),
            Duration::from_secs(300)
        );
        request.timeout = Some(Duration::from_secs(30));
        assert_eq!(
            request.step_timeout(Duration::from_secs(300)),
            Duration::from_secs(30)
        );
    }
}
