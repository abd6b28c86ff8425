//! Error taxonomy for the interpreter core.
//!
//! Every public function in this crate returns `Result<T, WorkflowError>`.
//! Exceptions (panics) are reserved for genuine programmer bugs; user- and
//! caller-triggerable failures are always values. `anyhow` belongs to the
//! CLI boundary, not here.

use crate::model::{LoopId, StepId};
use thiserror::Error;

/// Machine-readable + human-readable failure surfaced by the core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid workflow: {reason}")]
    InvalidWorkflow { reason: String },

    #[error("step not found: `{step_id}`")]
    StepNotFound { step_id: StepId },

    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("invalid loop `{loop_id}`: {reason}")]
    InvalidLoop { loop_id: LoopId, reason: String },

    #[error("missing context variable `{variable}` required by loop `{loop_id}`")]
    MissingContext { loop_id: LoopId, variable: String },

    #[error("loop `{loop_id}` exceeded max iterations ({max_iterations})")]
    MaxIterationsExceeded { loop_id: LoopId, max_iterations: u32 },

    #[error("loop stack corruption: {reason}")]
    LoopStackCorruption { reason: String },

    #[error("loop `{loop_id}` has an empty body")]
    EmptyLoopBody { loop_id: LoopId },

    #[error("loop `{loop_id}` body could not be resolved: {reason}")]
    LoopBodyResolution { loop_id: LoopId, reason: String },
}

impl WorkflowError {
    /// Machine-readable code, stable across releases, for an RPC layer to switch on.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::InvalidWorkflow { .. } => "INVALID_WORKFLOW",
            WorkflowError::StepNotFound { .. } => "STEP_NOT_FOUND",
            WorkflowError::InvalidState { .. } => "INVALID_STATE",
            WorkflowError::InvalidLoop { .. } => "INVALID_LOOP",
            WorkflowError::MissingContext { .. } => "MISSING_CONTEXT",
            WorkflowError::MaxIterationsExceeded { .. } => "MAX_ITERATIONS_EXCEEDED",
            WorkflowError::LoopStackCorruption { .. } => "LOOP_STACK_CORRUPTION",
            WorkflowError::EmptyLoopBody { .. } => "EMPTY_LOOP_BODY",
            WorkflowError::LoopBodyResolution { .. } => "LOOP_BODY_RESOLUTION",
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
