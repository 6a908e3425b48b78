use std::fmt;

use thiserror::Error;

use crate::handle::HandleState;

/// Fault reported by a model, either while it is being built or while it runs.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown model kind `{0}`")]
    UnknownKind(String),

    #[error("missing required parameter `{0}`")]
    MissingParam(&'static str),

    #[error("invalid parameter `{param}`: {reason}")]
    InvalidParam { param: &'static str, reason: String },

    #[error("bus region 0x{start:08x}..0x{end:08x} already driven by `{owner}`")]
    RegionBusy { start: u64, end: u64, owner: String },

    #[error("{0}")]
    Fault(String),
}

impl ModelError {
    pub fn fault(msg: impl Into<String>) -> Self {
        Self::Fault(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("model #{id} cannot be stepped in state {state}")]
    InvalidState { id: usize, state: HandleState },

    #[error("model #{id} (`{name}`) faulted")]
    Fault {
        id: usize,
        name: String,
        #[source]
        source: ModelError,
    },
}

/// A model could not be instantiated. Handles built before it have already
/// been finalized and released by the time this is returned.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("no models to simulate")]
    NoModels,

    #[error("failed to construct model #{index} (`{kind}`)")]
    Failed {
        index: usize,
        kind: String,
        #[source]
        source: ModelError,
        /// Finalize failures hit while rolling back earlier handles.
        rollback: Vec<FinalizeFailure>,
    },
}

#[derive(Debug, Error)]
#[error("round {round}: {source}")]
pub struct StepError {
    /// 1-based number of the round that faulted.
    pub round: u64,
    #[source]
    pub source: HandleError,
}

#[derive(Debug)]
pub struct FinalizeFailure {
    pub id: usize,
    pub name: String,
    pub source: ModelError,
}

impl fmt::Display for FinalizeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model #{} (`{}`): {}", self.id, self.name, self.source)
    }
}

impl std::error::Error for FinalizeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Every finalize failure collected during one teardown.
#[derive(Debug, Error)]
#[error("{} model(s) failed to finalize: {}", .failures.len(), join(.failures))]
pub struct FinalizeError {
    pub failures: Vec<FinalizeFailure>,
}

fn join(failures: &[FinalizeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("scheduler has already been shut down")]
    ShutDown,

    #[error("simulation aborted")]
    Step {
        #[source]
        source: StepError,
        /// Secondary failures from the teardown that followed the fault.
        teardown: Option<FinalizeError>,
    },

    #[error(transparent)]
    Finalize(#[from] FinalizeError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed run config")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid run config: {0}")]
    Invalid(String),
}
