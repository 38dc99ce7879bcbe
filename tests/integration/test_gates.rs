//! Comprehension gates driven by a generated exhibit.
//!
//! The knowledge check in the fractions fixture carries two gates; the second
//! opens only after the learner explores two items.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exhibit_core::{
    CollaboratorError, ComponentId, Config, ContentGenerator, ExhibitData, ExhibitPipeline,
    GeneratedComponent, GenerationContext, GenerationError, GeneratorRegistry, GradeLevel,
    Manifest, ManifestEvents, ManifestItem, ManifestPlanner, ManifestRequest,
};
use exhibit_gate::{
    EvaluationResult, EvaluationSink, GateConfig, GateError, GateMachine, GatePhase, SinkError,
};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;

fn fixture_manifest() -> Manifest {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/fractions/plan.json");
    let content = std::fs::read_to_string(path).expect("Failed to read plan fixture");
    serde_json::from_str(&content).expect("Failed to parse plan fixture")
}

struct FixturePlanner;

#[async_trait]
impl ManifestPlanner for FixturePlanner {
    async fn plan(
        &self,
        _request: &ManifestRequest,
        _events: &ManifestEvents,
    ) -> Result<Manifest, CollaboratorError> {
        Ok(fixture_manifest())
    }
}

/// Copies item configuration into the component data.
struct EchoGenerator;

#[async_trait]
impl ContentGenerator for EchoGenerator {
    async fn generate(
        &self,
        item: &ManifestItem,
        _ctx: &GenerationContext,
    ) -> Result<GeneratedComponent, GenerationError> {
        Ok(GeneratedComponent::for_item(
            item,
            Value::Object(item.config.clone()),
        ))
    }
}

async fn generate_exhibit() -> ExhibitData {
    let generator: Arc<dyn ContentGenerator> = Arc::new(EchoGenerator);
    let mut registry = GeneratorRegistry::new();
    for id in ComponentId::KNOWN {
        registry.register(id, Arc::clone(&generator));
    }
    let pipeline = ExhibitPipeline::new(Config::default(), Arc::new(FixturePlanner), registry);
    pipeline
        .generate(&ManifestRequest::new("Comparing Fractions", GradeLevel::Elementary))
        .await
        .expect("fixture exhibit should generate")
}

/// Builds a gate machine for the exhibit's knowledge check.
async fn knowledge_check_machine(config: GateConfig) -> GateMachine {
    let exhibit = generate_exhibit().await;
    let component = exhibit
        .ready_components()
        .find(|c| c.component_id == ComponentId::KnowledgeCheck)
        .expect("knowledge check should be ready");
    let value = serde_json::to_value(component).expect("component serializes");
    GateMachine::from_component_data(&value, config).expect("knowledge check carries valid gates")
}

#[derive(Default)]
struct RecordingSink {
    calls: AtomicUsize,
    received: Mutex<Vec<EvaluationResult>>,
}

#[async_trait]
impl EvaluationSink for RecordingSink {
    async fn submit(&self, result: &EvaluationResult) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.received.lock().await.push(result.clone());
        Ok(())
    }
}

/// Answers gate 0 wrong twice then right, explores two items, answers gate 1 right.
async fn complete_with_two_misses(machine: &mut GateMachine, sink: &dyn EvaluationSink) {
    assert_eq!(machine.phase(), GatePhase::Answering { gate: 0 });

    for wrong in ["1/3", "1/3"] {
        assert!(!machine.submit_answer(wrong).expect("gate 0 is open"));
        machine.retry().expect("retry after a miss");
    }
    assert!(machine.submit_answer("1/2").expect("gate 0 is open"));
    let phase = machine.advance_and_submit(sink).await.expect("advance past gate 0");
    assert_eq!(phase, GatePhase::Locked { gate: 1 });

    assert_eq!(machine.record_exploration("a"), GatePhase::Locked { gate: 1 });
    assert_eq!(machine.record_exploration("a"), GatePhase::Locked { gate: 1 });
    assert_eq!(machine.record_exploration("b"), GatePhase::Answering { gate: 1 });

    assert!(machine.submit_answer("1/4").expect("gate 1 is open"));
    let phase = machine.advance_and_submit(sink).await.expect("advance past gate 1");
    assert_eq!(phase, GatePhase::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_generated_knowledge_check_runs_to_completion() {
    let mut machine = knowledge_check_machine(GateConfig::default()).await;
    assert_eq!(machine.component().instance_id, "check");
    assert_eq!(machine.component().gate_count(), 2);

    let sink = RecordingSink::default();
    complete_with_two_misses(&mut machine, &sink).await;

    let state = machine.state();
    assert_eq!(state.current_gate_index, 2);
    assert_eq!(state.attempts_for(0), 3);
    assert_eq!(state.attempts_for(1), 1);
    assert!(state.submitted);

    let received = sink.received.lock().await;
    assert_eq!(received.len(), 1);
    let evaluation = &received[0];
    assert_eq!(evaluation.primitive_type, "knowledge-check");
    assert_eq!(evaluation.instance_id, "check");
    assert_eq!(evaluation.metrics.total_attempts, 4);
    assert!((evaluation.score - 50.0).abs() < f64::EPSILON);
    assert!(!evaluation.success);
}

#[tokio::test(start_paused = true)]
async fn test_answering_a_locked_gate_is_rejected() {
    let mut machine = knowledge_check_machine(GateConfig::default()).await;

    assert!(machine.submit_answer("1/2").expect("gate 0 is open"));
    machine.advance().await.expect("advance past gate 0");
    assert_eq!(machine.phase(), GatePhase::Locked { gate: 1 });

    let err = machine.submit_answer("1/4").expect_err("gate 1 is locked");
    assert!(matches!(err, GateError::InvalidTransition { .. }));
    assert_eq!(machine.state().results.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_reach_sink_once() {
    let config = GateConfig {
        feedback_delay_ms: 0,
        ..GateConfig::default()
    };
    let mut machine = knowledge_check_machine(config).await;

    assert!(machine.submit_answer("1/2").expect("gate 0 is open"));
    machine.advance().await.expect("advance past gate 0");
    machine.record_exploration("a");
    machine.record_exploration("b");
    assert!(machine.submit_answer("1/4").expect("gate 1 is open"));
    machine.advance().await.expect("advance past gate 1");
    assert!(machine.is_completed());
    assert!(!machine.state().submitted);

    let machine = Arc::new(Mutex::new(machine));
    let sink = Arc::new(RecordingSink::default());
    let tasks = (0..16).map(|_| {
        let machine = Arc::clone(&machine);
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            let mut machine = machine.lock().await;
            machine.submit_evaluation(sink.as_ref()).await
        })
    });

    let submitted = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task should not panic").expect("sink accepts"))
        .filter(|submitted| *submitted)
        .count();

    assert_eq!(submitted, 1);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    let received = sink.received.lock().await;
    assert!(received[0].success);
    assert!((received[0].score - 100.0).abs() < f64::EPSILON);
}
