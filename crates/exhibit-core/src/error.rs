//! Error types for the exhibit generation pipeline.
//!
//! Two tiers exist. [`ExhibitError`] is request-level: it is the only error
//! that reaches the caller of a generation run. [`GenerationError`] is
//! item-level: it is recorded against one manifest slot and never escalated.

use std::path::PathBuf;

/// A specialized `Result` type for request-level pipeline operations.
pub type Result<T> = std::result::Result<T, ExhibitError>;

/// Errors that fail a whole request (or a configuration load).
#[derive(Debug, thiserror::Error)]
pub enum ExhibitError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your exhibit.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The generation request itself is malformed.
    #[error("Invalid exhibit request: {message}\n\nSuggestion: Provide a non-empty topic and a supported grade level")]
    InvalidRequest {
        /// What is wrong with the request.
        message: String,
    },

    // ========================================================================
    // Manifest Errors
    // ========================================================================
    /// The planning collaborator failed; there is no manifest to build against.
    #[error("Manifest generation failed ({kind}): {message}\n\nSuggestion: {suggestion}")]
    ManifestGenerationFailed {
        /// Classification of the collaborator failure.
        kind: CollaboratorErrorKind,
        /// Detailed error message from the collaborator.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The planning collaborator returned a manifest that breaks the item contract.
    #[error("Manifest is invalid: {message}\n\nSuggestion: The planner must return at least one item with unique, non-empty instance ids")]
    ManifestInvalid {
        /// Which rule the manifest violated.
        message: String,
    },

    // ========================================================================
    // Run Scoping Errors
    // ========================================================================
    /// A newer run started before this one finished; its results were discarded.
    #[error("Generation run {run_id} was superseded by a newer request")]
    RunSuperseded {
        /// The abandoned run.
        run_id: String,
    },

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categories of failures reported by external AI/content collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorErrorKind {
    /// Network connectivity issues.
    Network,
    /// Rate limit exceeded.
    RateLimit,
    /// The collaborator answered, but the payload was unusable.
    InvalidOutput,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for CollaboratorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::InvalidOutput => write!(f, "invalid_output"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl CollaboratorErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Network => "Check your network connection",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::InvalidOutput => "Retry the request; the collaborator returned malformed content",
            Self::Other => "Check the content service's status",
        }
    }

    /// Returns `true` if a later identical request could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimit)
    }
}

/// A failure reported by an external collaborator (planner, generator, repairer).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CollaboratorError {
    /// Classification of the failure.
    pub kind: CollaboratorErrorKind,
    /// Detail reported by the collaborator.
    pub message: String,
}

impl CollaboratorError {
    /// Creates a new collaborator error.
    #[must_use]
    pub fn new(kind: CollaboratorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a network failure.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::Network, message)
    }

    /// Shorthand for a rate-limit failure.
    #[must_use]
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::RateLimit, message)
    }

    /// Shorthand for an unusable payload.
    #[must_use]
    pub fn invalid_output(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::InvalidOutput, message)
    }
}

/// Per-item generation failures.
///
/// These are recorded as the `Failed` status of a single manifest slot and
/// surface only through the assembled exhibit's placeholders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// No generator is registered for the item's component.
    #[error("no generator registered for component '{component_id}'")]
    NoGenerator {
        /// The unregistered component identifier.
        component_id: String,
    },

    /// The content collaborator failed.
    #[error("content generation failed: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// The generator returned a component that does not belong to the item.
    #[error("generator returned invalid output: {message}")]
    InvalidOutput {
        /// What was wrong with the output.
        message: String,
    },

    /// Generated executable content still failed after the repair budget was spent.
    #[error("script execution failed after {retries} repair attempt(s): {message}")]
    ExecutionFailed {
        /// How many repairs were attempted.
        retries: u32,
        /// The last runtime error.
        message: String,
    },

    /// The repair collaborator itself failed.
    #[error("script repair failed after {retries} repair attempt(s): {source}")]
    RepairFailed {
        /// How many repairs succeeded before this one failed.
        retries: u32,
        /// The collaborator failure.
        source: CollaboratorError,
    },

    /// The generator panicked.
    #[error("generator panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The generator task was cancelled before settling.
    #[error("generation task was cancelled")]
    Cancelled,
}

impl ExhibitError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a `ManifestGenerationFailed` error from a collaborator failure.
    #[must_use]
    pub fn manifest_failed(error: CollaboratorError) -> Self {
        let suggestion = error.kind.suggestion().to_string();
        Self::ManifestGenerationFailed {
            kind: error.kind,
            message: error.message,
            suggestion,
        }
    }

    /// Creates a new `ManifestInvalid` error.
    #[must_use]
    pub fn manifest_invalid(message: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            message: message.into(),
        }
    }

    /// Creates a new `RunSuperseded` error.
    #[must_use]
    pub fn run_superseded(run_id: impl std::fmt::Display) -> Self {
        Self::RunSuperseded {
            run_id: run_id.to_string(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::ManifestGenerationFailed { kind, .. } => kind.is_transient(),
            Self::RunSuperseded { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this error is caused by the caller's input or setup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::InvalidRequest { .. }
        )
    }
}
