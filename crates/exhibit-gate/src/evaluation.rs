//! Evaluation results and the submission sink.
//!
//! Every metric is derived from the recorded results on demand; nothing here
//! keeps a running counter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::definition::{GateConfig, GatedComponent};
use crate::machine::GateResult;

/// Per-gate figures derived from the results log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSummary {
    /// Gate position.
    pub gate_index: usize,
    /// Answers submitted for this gate.
    pub attempts: u32,
    /// Whether the first answer was correct.
    pub first_attempt_correct: bool,
    /// Whether any answer was correct.
    pub passed: bool,
    /// Time spent answering, summed over attempts.
    pub time_ms: u64,
}

/// Metrics reported with an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateMetrics {
    /// One summary per gate, in gate order.
    pub gates: Vec<GateSummary>,
    /// Share of gates passed on the first attempt.
    pub first_attempt_success_rate: f64,
    /// Correct answers over all recorded answers.
    pub accuracy: f64,
    /// All recorded answers.
    pub total_attempts: usize,
    /// Correct recorded answers.
    pub correct_attempts: usize,
    /// Answering time over all gates.
    pub total_time_ms: u64,
}

impl GateMetrics {
    /// Derives the metrics of a component with `gate_count` gates.
    #[must_use]
    pub fn from_results(results: &[GateResult], gate_count: usize) -> Self {
        let gates: Vec<GateSummary> = (0..gate_count)
            .map(|gate_index| {
                let attempts: Vec<&GateResult> = results
                    .iter()
                    .filter(|r| r.gate_index == gate_index)
                    .collect();
                GateSummary {
                    gate_index,
                    attempts: u32::try_from(attempts.len()).unwrap_or(u32::MAX),
                    first_attempt_correct: attempts.first().is_some_and(|r| r.is_correct),
                    passed: attempts.iter().any(|r| r.is_correct),
                    time_ms: attempts.iter().map(|r| r.time_to_answer_ms).sum(),
                }
            })
            .collect();

        let total_attempts = results.len();
        let correct_attempts = results.iter().filter(|r| r.is_correct).count();
        let first_attempt_passes = gates.iter().filter(|g| g.first_attempt_correct).count();

        Self {
            first_attempt_success_rate: ratio(first_attempt_passes, gate_count),
            accuracy: ratio(correct_attempts, total_attempts),
            total_attempts,
            correct_attempts,
            total_time_ms: results.iter().map(|r| r.time_to_answer_ms).sum(),
            gates,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// The learner's answers, as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentWork {
    /// Every recorded answer in submission order.
    pub responses: Vec<GateResult>,
}

/// Payload delivered to the evaluation sink once per completed component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Component kind.
    pub primitive_type: String,
    /// Component instance.
    pub instance_id: String,
    /// Whether accuracy reached the pass threshold.
    pub success: bool,
    /// Accuracy as a percentage, rounded.
    pub score: f64,
    /// Derived metrics.
    pub metrics: GateMetrics,
    /// Raw answers.
    pub student_work: StudentWork,
}

impl EvaluationResult {
    /// Builds the evaluation of `component` from its results log.
    #[must_use]
    pub fn from_results(
        component: &GatedComponent,
        results: &[GateResult],
        config: &GateConfig,
    ) -> Self {
        let metrics = GateMetrics::from_results(results, component.gate_count());
        Self {
            primitive_type: component.primitive_type.clone(),
            instance_id: component.instance_id.clone(),
            success: metrics.accuracy >= config.pass_threshold,
            score: (metrics.accuracy * 100.0).round(),
            metrics,
            student_work: StudentWork {
                responses: results.to_vec(),
            },
        }
    }
}

/// Error returned by an evaluation sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SinkError {
    /// What went wrong.
    pub message: String,
}

impl SinkError {
    /// Creates a sink error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// External analytics collaborator receiving evaluation results.
#[async_trait]
pub trait EvaluationSink: Send + Sync {
    /// Records one evaluation.
    async fn submit(&self, result: &EvaluationResult) -> Result<(), SinkError>;
}
