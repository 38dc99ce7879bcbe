//! Gate definitions, unlock conditions and gate configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GateError, Result};

/// Default delay between a correct answer and the next gate.
const fn default_feedback_delay_ms() -> u64 {
    1500
}

/// Default accuracy needed for a successful evaluation.
const fn default_pass_threshold() -> f64 {
    0.7
}

/// Precondition for a gate to leave `Locked`.
///
/// Supplied per gate by the component, never hard-coded in the machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnlockCondition {
    /// Opens as soon as the gate becomes current.
    #[default]
    Immediate,
    /// Opens once `count` distinct items were explored since the gate became current.
    Explored {
        /// Distinct items required.
        count: usize,
    },
    /// Opens once `ms` milliseconds passed since the gate became current.
    Elapsed {
        /// Required wait.
        ms: u64,
    },
}

impl UnlockCondition {
    /// Returns `true` if the condition holds.
    #[must_use]
    pub const fn is_met(&self, explored: usize, elapsed: Duration) -> bool {
        match self {
            Self::Immediate => true,
            Self::Explored { count } => explored >= *count,
            Self::Elapsed { ms } => elapsed.as_millis() >= *ms as u128,
        }
    }
}

/// One comprehension check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDefinition {
    /// Prompt shown to the learner.
    pub question: String,
    /// The only answer accepted as correct.
    pub correct_answer: String,
    /// Choices offered, if the gate is multiple choice.
    #[serde(default)]
    pub options: Vec<String>,
    /// When the gate opens.
    #[serde(default)]
    pub unlock: UnlockCondition,
}

impl GateDefinition {
    /// Creates an immediately unlocked free-answer gate.
    #[must_use]
    pub fn new(question: impl Into<String>, correct_answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            correct_answer: correct_answer.into(),
            options: Vec::new(),
            unlock: UnlockCondition::Immediate,
        }
    }

    /// Sets the multiple-choice options.
    #[must_use]
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the unlock condition.
    #[must_use]
    pub const fn with_unlock(mut self, unlock: UnlockCondition) -> Self {
        self.unlock = unlock;
        self
    }

    /// Exact-match correctness check.
    #[must_use]
    pub fn is_correct(&self, answer: &str) -> bool {
        answer == self.correct_answer
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.correct_answer.is_empty() {
            return Err(GateError::invalid_component(format!(
                "gate {index} has an empty correct answer"
            )));
        }
        if !self.options.is_empty() && !self.options.contains(&self.correct_answer) {
            return Err(GateError::invalid_component(format!(
                "gate {index}: correct answer '{}' is not among the options",
                self.correct_answer
            )));
        }
        Ok(())
    }
}

/// A generated component carrying gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatedComponent {
    /// Component kind, reported as the evaluation's primitive type.
    pub primitive_type: String,
    /// Component instance id.
    pub instance_id: String,
    /// Gates in the order they must be passed.
    pub gates: Vec<GateDefinition>,
}

impl GatedComponent {
    /// Creates a gated component.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidComponent` if there are no gates or a gate
    /// cannot be answered correctly.
    pub fn new(
        primitive_type: impl Into<String>,
        instance_id: impl Into<String>,
        gates: Vec<GateDefinition>,
    ) -> Result<Self> {
        let component = Self {
            primitive_type: primitive_type.into(),
            instance_id: instance_id.into(),
            gates,
        };
        component.validate()?;
        Ok(component)
    }

    /// Reads a component from generated component JSON:
    /// `{"type": ..., "instanceId": ..., "data": {"gates": [...]}}`.
    pub fn from_component_data(value: &Value) -> Result<Self> {
        let primitive_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GateError::invalid_component("missing \"type\""))?;
        let instance_id = value
            .get("instanceId")
            .and_then(Value::as_str)
            .ok_or_else(|| GateError::invalid_component("missing \"instanceId\""))?;
        let gates = value
            .get("data")
            .and_then(|data| data.get("gates"))
            .cloned()
            .ok_or_else(|| GateError::invalid_component("missing \"data.gates\""))?;
        let gates: Vec<GateDefinition> = serde_json::from_value(gates)?;

        Self::new(primitive_type, instance_id, gates)
    }

    /// Number of gates.
    #[must_use]
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    fn validate(&self) -> Result<()> {
        if self.instance_id.trim().is_empty() {
            return Err(GateError::invalid_component("empty instance id"));
        }
        if self.gates.is_empty() {
            return Err(GateError::invalid_component(format!(
                "component '{}' has no gates",
                self.instance_id
            )));
        }
        self.gates
            .iter()
            .enumerate()
            .try_for_each(|(index, gate)| gate.validate(index))
    }
}

/// Gate timing and scoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    /// How long feedback for a correct answer stays up before advancing.
    #[serde(default = "default_feedback_delay_ms")]
    pub feedback_delay_ms: u64,

    /// Accuracy in `[0, 1]` an evaluation needs to count as a success.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            feedback_delay_ms: default_feedback_delay_ms(),
            pass_threshold: default_pass_threshold(),
        }
    }
}

impl GateConfig {
    /// Feedback delay as a `Duration`.
    #[must_use]
    pub const fn feedback_delay(&self) -> Duration {
        Duration::from_millis(self.feedback_delay_ms)
    }

    /// Checks that `pass_threshold` lies within `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.pass_threshold) {
            return Err(GateError::InvalidConfig {
                message: format!(
                    "passThreshold must be between 0 and 1, got {}",
                    self.pass_threshold
                ),
            });
        }
        Ok(())
    }
}
