//! Bounded self-healing for generated executable content.
//!
//! A generated visualization script is run against a rendering surface. When
//! it throws, an external repair collaborator is asked for a corrected script
//! and the run is retried, at most `max_retries` times. Only script execution
//! failures enter this loop; every other generation failure is left to the
//! orchestrator's no-retry policy.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::ExecutableContent;
use crate::error::{CollaboratorError, GenerationError};

/// A runtime exception raised while executing a generated script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    /// The exception message.
    pub message: String,
}

impl ScriptError {
    /// Creates a new script error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Rendering surface that can execute a generated script.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Runs `script` against `library`.
    async fn execute(&self, script: &str, library: &str) -> Result<(), ScriptError>;
}

/// Input to the repair collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRequest {
    /// The failing script.
    pub script: String,
    /// What it threw.
    pub error_message: String,
    /// Library the script targets.
    pub library: String,
}

/// External collaborator that rewrites a failing script.
#[async_trait]
pub trait ScriptRepairer: Send + Sync {
    /// Returns a corrected script.
    async fn repair(&self, request: &RepairRequest) -> Result<String, CollaboratorError>;
}

/// A script that executed successfully, possibly after repairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealedScript {
    /// The script that finally ran.
    pub script: String,
    /// How many repairs it took.
    pub retries: u32,
    /// Runtime errors seen along the way, oldest first.
    pub errors: Vec<String>,
}

/// Runs executable content, repairing it up to a fixed bound.
#[derive(Clone)]
pub struct SelfHealingExecutor {
    runner: Arc<dyn ScriptRunner>,
    repairer: Arc<dyn ScriptRepairer>,
    max_retries: u32,
}

impl std::fmt::Debug for SelfHealingExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfHealingExecutor")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl SelfHealingExecutor {
    /// Default repair budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 2;

    /// Largest repair budget an executor accepts.
    pub const MAX_RETRIES_CEILING: u32 = 2;

    /// Creates an executor with the default repair budget.
    #[must_use]
    pub fn new(runner: Arc<dyn ScriptRunner>, repairer: Arc<dyn ScriptRepairer>) -> Self {
        Self {
            runner,
            repairer,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    /// Overrides the repair budget, capped at [`Self::MAX_RETRIES_CEILING`].
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = if max_retries > Self::MAX_RETRIES_CEILING {
            Self::MAX_RETRIES_CEILING
        } else {
            max_retries
        };
        self
    }

    /// The repair budget.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Executes `content`, repairing and retrying on runtime errors.
    ///
    /// # Errors
    ///
    /// Returns `GenerationError::ExecutionFailed` once the budget is spent and
    /// the script still throws, or `GenerationError::RepairFailed` if the
    /// repair collaborator itself fails.
    pub async fn run(
        &self,
        instance_id: &str,
        content: ExecutableContent,
    ) -> Result<HealedScript, GenerationError> {
        let ExecutableContent {
            mut script,
            library,
        } = content;
        let mut retries = 0;
        let mut errors = Vec::new();

        loop {
            let message = match self.runner.execute(&script, &library).await {
                Ok(()) => {
                    if retries > 0 {
                        info!(instance_id, retries, "Script healed");
                    }
                    return Ok(HealedScript {
                        script,
                        retries,
                        errors,
                    });
                }
                Err(e) => e.message,
            };

            errors.push(message.clone());

            if retries >= self.max_retries {
                warn!(
                    instance_id,
                    retries,
                    error = %message,
                    "Script still failing after repair budget"
                );
                return Err(GenerationError::ExecutionFailed { retries, message });
            }

            debug!(instance_id, retry = retries + 1, error = %message, "Requesting script repair");
            let request = RepairRequest {
                script,
                error_message: message,
                library: library.clone(),
            };
            let fixed = self
                .repairer
                .repair(&request)
                .await
                .map_err(|source| GenerationError::RepairFailed { retries, source })?;

            script = strip_code_fences(&fixed);
            retries += 1;
        }
    }
}

/// Removes a surrounding Markdown code fence from a repaired script.
///
/// Repair collaborators often answer with "```js ... ```"; anything that is
/// not fully fenced is returned trimmed but otherwise untouched.
#[must_use]
pub fn strip_code_fences(script: &str) -> String {
    let trimmed = script.trim();
    let Ok(re) = Regex::new(r"(?s)^```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)\r?\n?```$") else {
        return trimmed.to_string();
    };
    re.captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| trimmed.to_string(), |m| m.as_str().to_string())
}
