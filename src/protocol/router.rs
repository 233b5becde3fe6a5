//! Request router: validation boundary between the wire and the core

use crate::core::catalog::{Catalog, GraphError, PipelineKind};
use crate::core::report::{aggregate, Report};
use crate::core::request::Request;
use crate::core::run::PipelineRun;
use crate::execution::Orchestrator;
use crate::protocol::{OutboundMessage, RunRequest, WireError};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Malformed or unsupported request; no run is created
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown pipeline kind '{0}'")]
    UnknownKind(String),

    #[error("unknown step '{name}' in {list} list")]
    UnknownStep { name: String, list: &'static str },

    #[error("target '{target}' is not readable: {reason}")]
    UnreadableTarget { target: String, reason: String },

    #[error("timeout override must be positive")]
    NonPositiveTimeout,
}

/// Request rejection, before any tool runs
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl RequestError {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::Validation(_) => "validation",
            RequestError::Graph(_) => "graph",
        }
    }
}

/// Validates inbound requests, constructs runs, and serializes reports.
///
/// Purely a boundary layer: it never inspects step-result internals.
pub struct RequestRouter {
    catalog: Catalog,
    orchestrator: Orchestrator,
    default_environment: String,
}

impl RequestRouter {
    pub fn new(catalog: Catalog, orchestrator: Orchestrator, default_environment: String) -> Self {
        RequestRouter {
            catalog,
            orchestrator,
            default_environment,
        }
    }

    /// Serve one request end to end, always producing a wire response.
    pub async fn handle(&self, request: RunRequest, cancel: CancellationToken) -> OutboundMessage {
        let id = request.id.clone();
        match self.dispatch(request, cancel).await {
            Ok(report) => OutboundMessage::Report { id, report },
            Err(err) => {
                warn!(id = %id, kind = err.kind(), error = %err, "request rejected");
                OutboundMessage::Error {
                    id: Some(id),
                    error: WireError {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    },
                }
            }
        }
    }

    /// Validate, build the run, execute, aggregate.
    pub async fn dispatch(
        &self,
        wire: RunRequest,
        cancel: CancellationToken,
    ) -> Result<Report, RequestError> {
        let request = self.validate(&wire).await?;

        let specs = self
            .catalog
            .select(request.kind, &request.enable, &request.disable)?;
        let mut run = PipelineRun::new(request.id, request.kind, specs)?;

        info!(id = %wire.id, run = %run.id, kind = %run.kind, "request accepted");
        self.orchestrator.execute(&mut run, &request, cancel).await;
        Ok(aggregate(&run))
    }

    async fn validate(&self, wire: &RunRequest) -> Result<Request, ValidationError> {
        let kind = PipelineKind::from_str(&wire.kind)
            .map_err(|_| ValidationError::UnknownKind(wire.kind.clone()))?;

        for name in &wire.enable {
            if !self.catalog.contains(name) {
                return Err(ValidationError::UnknownStep {
                    name: name.clone(),
                    list: "enable",
                });
            }
        }
        for name in &wire.disable {
            if !self.catalog.contains(name) {
                return Err(ValidationError::UnknownStep {
                    name: name.clone(),
                    list: "disable",
                });
            }
        }

        if wire.timeout_secs == Some(0) {
            return Err(ValidationError::NonPositiveTimeout);
        }

        tokio::fs::metadata(&wire.target).await.map_err(|err| {
            ValidationError::UnreadableTarget {
                target: wire.target.clone(),
                reason: err.to_string(),
            }
        })?;

        let environment = wire
            .environment
            .clone()
            .unwrap_or_else(|| self.default_environment.clone());

        let mut request = Request::new(wire.id.clone(), wire.target.clone(), kind, environment);
        request.enable = wire.enable.clone();
        request.disable = wire.disable.clone();
        request.timeout = wire.timeout_secs.map(Duration::from_secs);
        Ok(request)
    }
}
