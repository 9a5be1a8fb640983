use std::fmt;

use control::ControlError;
use thiserror::Error;

use crate::package::PackageError;

/// Backend step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Create,
    Start,
    Destroy,
    Logs,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Create => "create",
            Stage::Start => "start",
            Stage::Destroy => "destroy",
            Stage::Logs => "logs",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("function {0} not found")]
    NotFound(String),
    #[error("staging package for {name} failed: {source}")]
    Package {
        name: String,
        #[source]
        source: PackageError,
    },
    #[error("backend {stage} failed for {name}: {source:#}")]
    Backend {
        name: String,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
    #[error("unit {endpoint} of {name} not healthy after {attempts} attempts")]
    HealthCheckTimeout {
        name: String,
        endpoint: String,
        attempts: u32,
        logs: String,
    },
    #[error("control plane update for {name} failed: {source}")]
    ControlPlane {
        name: String,
        #[source]
        source: ControlError,
    },
    #[error("wipe failed: {}", join_errors(.0))]
    Wipe(Vec<OrchestratorError>),
}

impl OrchestratorError {
    pub(crate) fn backend(name: &str, stage: Stage, source: anyhow::Error) -> Self {
        OrchestratorError::Backend {
            name: name.to_string(),
            stage,
            source,
        }
    }

    /// Whether the caller is at fault (bad name, bad package).
    pub fn is_client_error(&self) -> bool {
        match self {
            OrchestratorError::Validation(_) => true,
            OrchestratorError::Package { source, .. } => source.is_invalid_input(),
            _ => false,
        }
    }
}

fn join_errors(errors: &[OrchestratorError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
