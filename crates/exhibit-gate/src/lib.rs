//! Exhibit Comprehension Gates
//!
//! Per-component state machine that keeps deeper content locked behind
//! correctly answered checks, records every attempt and submits one
//! evaluation result when the last gate is passed.
//!
//! The crate consumes generated component data as JSON and has no
//! dependency on the generation pipeline.

pub mod definition;
pub mod evaluation;
pub mod machine;

use thiserror::Error;

pub use definition::{GateConfig, GateDefinition, GatedComponent, UnlockCondition};
pub use evaluation::{
    EvaluationResult, EvaluationSink, GateMetrics, GateSummary, SinkError, StudentWork,
};
pub use machine::{GateMachine, GatePhase, GateResult, GateState};

/// Result type alias using `GateError`.
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors raised by gate definitions and the gate state machine.
#[derive(Debug, Error)]
pub enum GateError {
    /// Component data could not be read as a gated component.
    #[error("invalid gated component: {message}\n\nSuggestion: Provide \"type\", \"instanceId\" and a non-empty \"data.gates\" array")]
    InvalidComponent {
        /// What was wrong.
        message: String,
    },

    /// Gate configuration is out of range.
    #[error("invalid gate configuration: {message}")]
    InvalidConfig {
        /// What was wrong.
        message: String,
    },

    /// The requested action is not allowed in the current phase.
    #[error("cannot {action} while {phase}")]
    InvalidTransition {
        /// Phase the machine was in.
        phase: GatePhase,
        /// What was attempted.
        action: &'static str,
    },

    /// The evaluation sink rejected the result.
    #[error("evaluation submission failed: {0}")]
    Sink(#[from] SinkError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GateError {
    /// Creates an `InvalidComponent` error.
    #[must_use]
    pub fn invalid_component(message: impl Into<String>) -> Self {
        Self::InvalidComponent {
            message: message.into(),
        }
    }

    /// Creates an `InvalidTransition` error.
    #[must_use]
    pub const fn invalid_transition(phase: GatePhase, action: &'static str) -> Self {
        Self::InvalidTransition { phase, action }
    }
}
