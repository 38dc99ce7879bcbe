//! Comprehension gate state machine.
//!
//! ```text
//! Locked(g) --unlock condition--> Answering(g) --answer--> Submitted(g, ok?)
//! Submitted(g, wrong) --retry--> Answering(g)
//! Submitted(g, right) --> Advancing(g) --feedback delay--> Locked(g + 1) | Completed
//! Completed --> evaluation submitted exactly once
//! ```
//!
//! The gate index only moves forward, and only out of `Advancing`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::definition::{GateConfig, GateDefinition, GatedComponent};
use crate::evaluation::{EvaluationResult, EvaluationSink};
use crate::{GateError, Result};

/// Where a gated component is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum GatePhase {
    /// Waiting for the gate's unlock condition.
    Locked {
        /// Current gate.
        gate: usize,
    },
    /// Accepting an answer.
    Answering {
        /// Current gate.
        gate: usize,
    },
    /// An answer was judged.
    Submitted {
        /// Current gate.
        gate: usize,
        /// Whether it matched.
        correct: bool,
    },
    /// Showing feedback before moving on.
    Advancing {
        /// Gate just passed.
        gate: usize,
    },
    /// Every gate passed.
    Completed,
}

impl std::fmt::Display for GatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked { gate } => write!(f, "locked (gate {gate})"),
            Self::Answering { gate } => write!(f, "answering (gate {gate})"),
            Self::Submitted { gate, correct: true } => write!(f, "submitted (gate {gate}, correct)"),
            Self::Submitted {
                gate,
                correct: false,
            } => write!(f, "submitted (gate {gate}, incorrect)"),
            Self::Advancing { gate } => write!(f, "advancing (gate {gate})"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One recorded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    /// Gate answered.
    pub gate_index: usize,
    /// The gate's question.
    pub question: String,
    /// The answer that counts as correct.
    pub correct_answer: String,
    /// 1-based attempt number for that gate.
    pub attempt_number: u32,
    /// What the learner answered.
    pub student_answer: String,
    /// Exact match against the gate's correct answer.
    pub is_correct: bool,
    /// Time from the gate opening (or the last retry) to this answer.
    pub time_to_answer_ms: u64,
}

/// Observable gate bookkeeping of one component instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateState {
    /// Gate being worked on; equals the gate count once completed.
    pub current_gate_index: usize,
    /// Answers submitted per gate.
    pub attempts: BTreeMap<usize, u32>,
    /// Every answer in submission order.
    pub results: Vec<GateResult>,
    /// Set once the evaluation went out; never cleared.
    pub submitted: bool,
}

impl GateState {
    /// Answers submitted for `gate`.
    #[must_use]
    pub fn attempts_for(&self, gate: usize) -> u32 {
        self.attempts.get(&gate).copied().unwrap_or(0)
    }
}

/// Drives the gates of one component instance.
///
/// Owned by that instance alone; share it behind a mutex if several tasks
/// may trigger it.
#[derive(Debug, Clone)]
pub struct GateMachine {
    component: GatedComponent,
    config: GateConfig,
    phase: GatePhase,
    state: GateState,
    explored: BTreeSet<String>,
    gate_since: Instant,
    answering_since: Option<Instant>,
}

impl GateMachine {
    /// Creates a machine positioned at the first gate.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidConfig` if `config` is out of range.
    pub fn new(component: GatedComponent, config: GateConfig) -> Result<Self> {
        config.validate()?;
        let now = Instant::now();
        let mut machine = Self {
            component,
            config,
            phase: GatePhase::Locked { gate: 0 },
            state: GateState::default(),
            explored: BTreeSet::new(),
            gate_since: now,
            answering_since: None,
        };
        machine.try_unlock(now);
        Ok(machine)
    }

    /// Creates a machine from generated component JSON.
    pub fn from_component_data(value: &Value, config: GateConfig) -> Result<Self> {
        Self::new(GatedComponent::from_component_data(value)?, config)
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> GatePhase {
        self.phase
    }

    /// Bookkeeping so far.
    #[must_use]
    pub const fn state(&self) -> &GateState {
        &self.state
    }

    /// The component being gated.
    #[must_use]
    pub const fn component(&self) -> &GatedComponent {
        &self.component
    }

    /// The gate being worked on, if any remain.
    #[must_use]
    pub fn current_gate(&self) -> Option<&GateDefinition> {
        self.component.gates.get(self.state.current_gate_index)
    }

    /// Returns `true` once every gate is passed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.phase, GatePhase::Completed)
    }

    /// Notes that the learner explored `item`; may unlock the current gate.
    pub fn record_exploration(&mut self, item: impl Into<String>) -> GatePhase {
        self.explored.insert(item.into());
        self.try_unlock(Instant::now());
        self.phase
    }

    /// Re-checks time-based unlock conditions as of `now`.
    pub fn tick(&mut self, now: Instant) -> GatePhase {
        self.try_unlock(now);
        self.phase
    }

    fn try_unlock(&mut self, now: Instant) {
        let GatePhase::Locked { gate } = self.phase else {
            return;
        };
        let Some(definition) = self.component.gates.get(gate) else {
            return;
        };
        let elapsed = now.saturating_duration_since(self.gate_since);
        if definition.unlock.is_met(self.explored.len(), elapsed) {
            debug!(instance_id = %self.component.instance_id, gate, "Gate unlocked");
            self.phase = GatePhase::Answering { gate };
            self.answering_since = Some(now);
        }
    }

    /// Submits an answer to the open gate. Returns whether it was correct.
    ///
    /// Leaves the machine in `Submitted`. A correct answer is followed by
    /// [`GateMachine::advance`] (or [`GateMachine::advance_and_submit`]), an
    /// incorrect one by [`GateMachine::retry`]. [`GateMachine::answer`] does the
    /// advancing itself.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidTransition` unless the machine is answering.
    pub fn submit_answer(&mut self, answer: impl Into<String>) -> Result<bool> {
        self.submit_answer_at(answer, Instant::now())
    }

    /// Like [`GateMachine::submit_answer`], timed as of `now`.
    pub fn submit_answer_at(&mut self, answer: impl Into<String>, now: Instant) -> Result<bool> {
        let GatePhase::Answering { gate } = self.phase else {
            return Err(GateError::invalid_transition(self.phase, "submit an answer"));
        };
        let Some(definition) = self.component.gates.get(gate) else {
            return Err(GateError::invalid_transition(self.phase, "submit an answer"));
        };

        let answer = answer.into();
        let correct = definition.is_correct(&answer);
        let question = definition.question.clone();
        let correct_answer = definition.correct_answer.clone();
        let attempt = {
            let count = self.state.attempts.entry(gate).or_insert(0);
            *count += 1;
            *count
        };
        let since = self.answering_since.unwrap_or(now);
        let time_ms = u64::try_from(now.saturating_duration_since(since).as_millis())
            .unwrap_or(u64::MAX);

        self.state.results.push(GateResult {
            gate_index: gate,
            question,
            correct_answer,
            attempt_number: attempt,
            student_answer: answer,
            is_correct: correct,
            time_to_answer_ms: time_ms,
        });
        self.phase = GatePhase::Submitted { gate, correct };

        info!(
            instance_id = %self.component.instance_id,
            gate,
            attempt,
            correct,
            "Gate answer recorded"
        );
        Ok(correct)
    }

    /// Reopens the gate after an incorrect answer.
    pub fn retry(&mut self) -> Result<()> {
        let GatePhase::Submitted {
            gate,
            correct: false,
        } = self.phase
        else {
            return Err(GateError::invalid_transition(self.phase, "retry"));
        };
        self.phase = GatePhase::Answering { gate };
        self.answering_since = Some(Instant::now());
        Ok(())
    }

    /// Starts showing feedback for a correct answer.
    pub fn begin_advance(&mut self) -> Result<()> {
        let GatePhase::Submitted {
            gate,
            correct: true,
        } = self.phase
        else {
            return Err(GateError::invalid_transition(self.phase, "advance"));
        };
        self.phase = GatePhase::Advancing { gate };
        Ok(())
    }

    /// Moves past the gate being advanced.
    ///
    /// Locks the next gate, or completes the component after the last one.
    pub fn finish_advance(&mut self) -> Result<GatePhase> {
        let GatePhase::Advancing { gate } = self.phase else {
            return Err(GateError::invalid_transition(self.phase, "finish advancing"));
        };

        let next = gate + 1;
        self.state.current_gate_index = next;
        self.answering_since = None;

        if next >= self.component.gate_count() {
            info!(
                instance_id = %self.component.instance_id,
                attempts = self.state.results.len(),
                "All gates passed"
            );
            self.phase = GatePhase::Completed;
        } else {
            let now = Instant::now();
            self.phase = GatePhase::Locked { gate: next };
            self.explored.clear();
            self.gate_since = now;
            self.try_unlock(now);
        }
        Ok(self.phase)
    }

    /// Shows feedback for the configured delay, then moves past the gate.
    pub async fn advance(&mut self) -> Result<GatePhase> {
        self.begin_advance()?;
        tokio::time::sleep(self.config.feedback_delay()).await;
        self.finish_advance()
    }

    /// Advances and, if that completed the component, submits the evaluation.
    pub async fn advance_and_submit(&mut self, sink: &dyn EvaluationSink) -> Result<GatePhase> {
        let phase = self.advance().await?;
        if phase == GatePhase::Completed {
            self.submit_evaluation(sink).await?;
        }
        Ok(phase)
    }

    /// Submits an answer and, if it is correct, shows feedback and advances.
    ///
    /// Completing the last gate submits the evaluation to `sink`. An incorrect
    /// answer leaves the machine in `Submitted` until [`GateMachine::retry`].
    pub async fn answer(
        &mut self,
        answer: impl Into<String> + Send,
        sink: &dyn EvaluationSink,
    ) -> Result<bool> {
        let correct = self.submit_answer(answer)?;
        if correct {
            self.advance_and_submit(sink).await?;
        }
        Ok(correct)
    }

    /// The evaluation as it would be submitted now.
    #[must_use]
    pub fn evaluation(&self) -> EvaluationResult {
        EvaluationResult::from_results(&self.component, &self.state.results, &self.config)
    }

    /// Sends the evaluation to `sink`, at most once per machine.
    ///
    /// Returns `Ok(true)` for the call that submitted and `Ok(false)` for every
    /// later call. The `submitted` flag is set before the sink is called, so a
    /// failing sink is not retried.
    ///
    /// # Errors
    ///
    /// Returns `GateError::InvalidTransition` before completion and
    /// `GateError::Sink` if the sink rejects the result.
    pub async fn submit_evaluation(&mut self, sink: &dyn EvaluationSink) -> Result<bool> {
        if !self.is_completed() {
            return Err(GateError::invalid_transition(
                self.phase,
                "submit the evaluation",
            ));
        }
        if self.state.submitted {
            debug!(instance_id = %self.component.instance_id, "Evaluation already submitted");
            return Ok(false);
        }
        self.state.submitted = true;

        let evaluation = self.evaluation();
        if let Err(e) = sink.submit(&evaluation).await {
            warn!(instance_id = %self.component.instance_id, error = %e, "Evaluation sink failed");
            return Err(e.into());
        }

        info!(
            instance_id = %self.component.instance_id,
            success = evaluation.success,
            score = evaluation.score,
            "Evaluation submitted"
        );
        Ok(true)
    }
}
