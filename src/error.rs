//! Error taxonomy for the build pipeline.
//!
//! Every variant is fatal to a run. The one recoverable condition in the
//! system (static init link falling back to dynamic) is handled inside the
//! finisher and only surfaces here when both attempts fail.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::stage::Step;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A manifest directory could not be created.
    #[error("failed to prepare {role} directory {}: {source}", path.display())]
    Manifest {
        role: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The archive transfer did not complete or the remote was unreachable.
    #[error("[{stage}] failed to fetch {url}: {reason}")]
    Fetch {
        stage: String,
        url: String,
        reason: String,
    },

    /// No cached source and nowhere to fetch it from.
    #[error("[{stage}] source not found at {} and no download location is available", path.display())]
    MissingSource { stage: String, path: PathBuf },

    /// A build-system step exited non-zero.
    #[error("[{stage}] {step} step failed (exit status {status}), build directory left for inspection")]
    StageFailure {
        stage: String,
        step: Step,
        status: i32,
    },

    /// A build-system step could not be started at all.
    #[error("[{stage}] {step} step could not run '{program}': {source}")]
    Launch {
        stage: String,
        step: Step,
        program: String,
        #[source]
        source: io::Error,
    },

    /// An expected install artifact is absent from the rootfs.
    #[error("[{stage}] verification failed: {missing} not found in rootfs")]
    Verification { stage: String, missing: String },

    /// Post-processing of the assembled rootfs failed.
    #[error("rootfs finisher failed: {0}")]
    Finisher(String),

    /// Filesystem failure inside a stage's own bookkeeping.
    #[error("[{stage}] {context}: {source}")]
    Io {
        stage: String,
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// Name of the stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::Fetch { stage, .. }
            | PipelineError::MissingSource { stage, .. }
            | PipelineError::StageFailure { stage, .. }
            | PipelineError::Launch { stage, .. }
            | PipelineError::Verification { stage, .. }
            | PipelineError::Io { stage, .. } => Some(stage),
            PipelineError::Manifest { .. } | PipelineError::Finisher(_) => None,
        }
    }

    /// Build an `Io` error scoped to a stage.
    pub(crate) fn io(stage: &str, context: impl Into<String>, source: io::Error) -> Self {
        PipelineError::Io {
            stage: stage.to_string(),
            context: context.into(),
            source,
        }
    }
}
