use thiserror::Error;

use super::plan::PlanValidationError;
use super::status::AppStatus;

/// Why a run (or an attempt to start one) failed. Every variant is terminal
/// for the run it belongs to; nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestoreError {
    #[error("gateway is not configured: {0}")]
    Config(String),
    #[error("could not create a restoration plan: {0}")]
    Plan(String),
    #[error("step {step}: could not write an edit prompt: {message}")]
    Prompt { step: u32, message: String },
    #[error("step {step}: image edit failed: {message}")]
    Edit { step: u32, message: String },
    #[error("a restoration run is already in progress")]
    Busy,
    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: AppStatus, to: AppStatus },
    #[error("run invariant violated: {0}")]
    Invariant(String),
    #[error("event journal write failed: {0}")]
    Journal(String),
}

impl RestoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Plan(_) => "plan",
            Self::Prompt { .. } => "prompt",
            Self::Edit { .. } => "edit",
            Self::Busy => "busy",
            Self::InvalidTransition { .. } => "transition",
            Self::Invariant(_) => "invariant",
            Self::Journal(_) => "journal",
        }
    }

    /// Plan step the failure belongs to, when it happened inside the step loop.
    pub fn step(&self) -> Option<u32> {
        match self {
            Self::Prompt { step, .. } | Self::Edit { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<PlanValidationError> for RestoreError {
    fn from(err: PlanValidationError) -> Self {
        Self::Plan(err.to_string())
    }
}
