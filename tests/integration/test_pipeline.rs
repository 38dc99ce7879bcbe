//! End-to-end tests for exhibit generation.
//!
//! Generators here are driven by item configuration: `delayMs` sets how long
//! an item takes and `fail` makes it fail, so tests can force any completion
//! order or failure pattern.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exhibit_core::{
    assemble, BuildOrchestrator, CollaboratorError, ComponentId, Config, ContentGenerator,
    ExhibitError, ExhibitEvent, ExhibitPipeline, ExhibitSlot, GeneratedComponent,
    GenerationContext, GenerationError, GenerationStatus, GeneratorRegistry, GradeLevel, Manifest,
    ManifestEvents, ManifestItem, ManifestPlanner, ManifestRequest, RepairRequest, RunId,
    ScriptError, ScriptRepairer, ScriptRunner,
};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Path to the fractions fixture directory.
fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/fractions")
}

/// Loads the fixture plan as a manifest.
fn fixture_manifest() -> Manifest {
    let content = std::fs::read_to_string(fixture_dir().join("plan.json"))
        .expect("Failed to read plan fixture");
    serde_json::from_str(&content).expect("Failed to parse plan fixture")
}

/// Sleeps for the item's `delayMs`, then echoes its config, or fails if `fail` is set.
struct ScriptedGenerator;

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        item: &ManifestItem,
        ctx: &GenerationContext,
    ) -> Result<GeneratedComponent, GenerationError> {
        let delay = item.config.get("delayMs").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if item.config.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(CollaboratorError::rate_limit("quota exceeded").into());
        }

        let mut data = Value::Object(item.config.clone());
        data["topic"] = json!(ctx.topic);
        data["runId"] = json!(ctx.run_id);
        Ok(GeneratedComponent::for_item(item, data))
    }
}

fn scripted_registry() -> GeneratorRegistry {
    let generator: Arc<dyn ContentGenerator> = Arc::new(ScriptedGenerator);
    let mut registry = GeneratorRegistry::new();
    for id in ComponentId::KNOWN {
        registry.register(id, Arc::clone(&generator));
    }
    registry
}

/// Returns a fixed manifest; topics starting with "slow" take a while to plan.
struct FixedPlanner {
    manifest: Manifest,
}

#[async_trait]
impl ManifestPlanner for FixedPlanner {
    async fn plan(
        &self,
        request: &ManifestRequest,
        events: &ManifestEvents,
    ) -> Result<Manifest, CollaboratorError> {
        events.progress("Choosing components");
        if request.topic.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let mut manifest = self.manifest.clone();
        manifest.topic.clone_from(&request.topic);
        manifest.grade_level = request.grade_level;
        Ok(manifest)
    }
}

fn item(id: &str, component: ComponentId, delay_ms: u64) -> ManifestItem {
    ManifestItem::new(id, component)
        .with_title(format!("Item {id}"))
        .with_config("delayMs", json!(delay_ms))
}

fn two_item_manifest() -> Manifest {
    Manifest::new(
        "Fractions",
        GradeLevel::Elementary,
        vec![
            item("a", ComponentId::BarModel, 80),
            item("b", ComponentId::NumberLine, 5),
        ],
    )
}

#[tokio::test]
async fn test_b_finishing_first_still_yields_a_then_b() {
    let pipeline = ExhibitPipeline::new(
        Config::default(),
        Arc::new(FixedPlanner {
            manifest: two_item_manifest(),
        }),
        scripted_registry(),
    );
    let mut events = pipeline.subscribe();

    let exhibit = pipeline
        .generate(&ManifestRequest::new("Fractions", GradeLevel::Elementary))
        .await
        .expect("generation should succeed");

    let mut completion_order = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExhibitEvent::ItemStatus(p) = event {
            if p.status == GenerationStatus::Completed {
                completion_order.push(p.instance_id);
            }
        }
    }

    assert_eq!(completion_order, vec!["b", "a"]);
    assert_eq!(exhibit.instance_ids(), vec!["a", "b"]);
    assert_eq!(exhibit.ready_count(), 2);
}

#[tokio::test]
async fn test_fixture_plan_with_fixture_config() {
    let config = Config::load_from_dir(&fixture_dir()).expect("Failed to load config fixture");
    assert_eq!(config.max_concurrency, Some(4));
    assert_eq!(config.event_capacity, 64);

    let pipeline = ExhibitPipeline::new(
        config,
        Arc::new(FixedPlanner {
            manifest: fixture_manifest(),
        }),
        scripted_registry(),
    );

    let exhibit = pipeline
        .generate(&ManifestRequest::new("Comparing Fractions", GradeLevel::Elementary))
        .await
        .expect("generation should succeed");

    assert_eq!(exhibit.instance_ids(), vec!["a", "b", "check"]);
    let check = exhibit.components[2]
        .component()
        .expect("knowledge check should be ready");
    assert_eq!(check.data["gates"].as_array().map(Vec::len), Some(2));
    assert_eq!(check.data["topic"], "Comparing Fractions");
}

#[tokio::test]
async fn test_partial_failure_keeps_full_length() {
    let mut manifest = two_item_manifest();
    manifest.items.push(
        item("c", ComponentId::FlashcardDeck, 1).with_config("fail", json!(true)),
    );
    manifest
        .items
        .push(item("d", ComponentId::Custom("periodic-table".into()), 1));

    let orchestrator = BuildOrchestrator::new(scripted_registry());
    let ctx = GenerationContext::new(RunId::new(), "Fractions", GradeLevel::Elementary);
    let outcome = orchestrator
        .build(&manifest, &ctx)
        .await
        .expect("manifest is valid");
    let exhibit = assemble(&manifest, &outcome);

    assert_eq!(exhibit.components.len(), manifest.len());
    assert_eq!(exhibit.instance_ids(), vec!["a", "b", "c", "d"]);
    assert_eq!(exhibit.ready_count(), 2);

    let reasons: Vec<&str> = exhibit
        .components
        .iter()
        .filter_map(|slot| match slot {
            ExhibitSlot::Unavailable { reason, .. } => Some(reason.as_str()),
            ExhibitSlot::Ready { .. } => None,
        })
        .collect();
    assert!(reasons[0].contains("quota exceeded"));
    assert!(reasons[1].contains("periodic-table"));
}

#[tokio::test]
async fn test_superseded_run_never_leaks_into_newer_exhibit() {
    let pipeline = Arc::new(ExhibitPipeline::new(
        Config::default(),
        Arc::new(FixedPlanner {
            manifest: two_item_manifest(),
        }),
        scripted_registry(),
    ));

    let stale = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .generate(&ManifestRequest::new("slow topic", GradeLevel::Elementary))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let fresh = pipeline
        .generate(&ManifestRequest::new("Decimals", GradeLevel::MiddleSchool))
        .await
        .expect("newer run should succeed");

    let stale = stale.await.expect("task should not panic");
    assert!(matches!(stale, Err(ExhibitError::RunSuperseded { .. })));

    let latest = pipeline.latest().await.expect("latest exhibit");
    assert_eq!(latest.run_id, fresh.run_id);
    for component in latest.ready_components() {
        assert_eq!(component.data["topic"], "Decimals");
        assert_eq!(component.data["runId"], json!(fresh.run_id));
    }
}

#[tokio::test]
async fn test_empty_plan_fails_whole_request() {
    let pipeline = ExhibitPipeline::new(
        Config::default(),
        Arc::new(FixedPlanner {
            manifest: Manifest::new("Fractions", GradeLevel::Elementary, vec![]),
        }),
        scripted_registry(),
    );
    let mut events = pipeline.subscribe();

    let err = pipeline
        .generate(&ManifestRequest::new("Fractions", GradeLevel::Elementary))
        .await
        .expect_err("an empty manifest is fatal");
    assert!(matches!(err, ExhibitError::ManifestInvalid { .. }));
    assert!(err.is_fatal());

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        assert_ne!(event.event_name(), "item_status");
        saw_error |= event.event_name() == "error";
    }
    assert!(saw_error);
}

#[tokio::test]
async fn test_blank_topic_is_rejected() {
    let pipeline = ExhibitPipeline::new(
        Config::default(),
        Arc::new(FixedPlanner {
            manifest: two_item_manifest(),
        }),
        scripted_registry(),
    );
    let err = pipeline
        .generate(&ManifestRequest::new("   ", GradeLevel::Elementary))
        .await
        .expect_err("blank topic");
    assert!(matches!(err, ExhibitError::InvalidRequest { .. }));
}

// ============================================================================
// Self-healing through the pipeline
// ============================================================================

struct AlwaysThrows;

#[async_trait]
impl ScriptRunner for AlwaysThrows {
    async fn execute(&self, _script: &str, _library: &str) -> Result<(), ScriptError> {
        Err(ScriptError::new("TypeError: d3.scaleLinear is not a function"))
    }
}

#[derive(Default)]
struct CountingRepairer {
    calls: AtomicUsize,
}

#[async_trait]
impl ScriptRepairer for CountingRepairer {
    async fn repair(&self, request: &RepairRequest) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("```js\n{}\n```", request.script))
    }
}

#[tokio::test]
async fn test_unfixable_script_fails_after_two_repairs() {
    let manifest = Manifest::new(
        "Fractions",
        GradeLevel::Elementary,
        vec![
            item("a", ComponentId::BarModel, 1),
            item("viz", ComponentId::CustomVisual, 1)
                .with_config("script", json!("d3.scaleLinear()")),
        ],
    );
    let repairer = Arc::new(CountingRepairer::default());
    let pipeline = ExhibitPipeline::new(
        Config::default(),
        Arc::new(FixedPlanner { manifest }),
        scripted_registry(),
    )
    .with_script_validation(Arc::new(AlwaysThrows), repairer.clone());

    let exhibit = pipeline
        .generate(&ManifestRequest::new("Fractions", GradeLevel::Elementary))
        .await
        .expect("script failures are per-item");

    assert_eq!(repairer.calls.load(Ordering::SeqCst), 2);
    assert!(exhibit.components[0].is_ready());
    match &exhibit.components[1] {
        ExhibitSlot::Unavailable { reason, .. } => {
            assert!(reason.contains("after 2 repair attempt(s)"));
        }
        ExhibitSlot::Ready { .. } => panic!("script never executes cleanly"),
    }
}

// ============================================================================
// Ordering property
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any completion timing and any failure pattern yields one slot per
    /// manifest item, in manifest order.
    #[test]
    fn prop_exhibit_order_matches_manifest(
        specs in prop::collection::vec((0u64..30, any::<bool>()), 1..8)
    ) {
        let items: Vec<ManifestItem> = specs
            .iter()
            .enumerate()
            .map(|(i, (delay, fail))| {
                let component = ComponentId::KNOWN[i % ComponentId::KNOWN.len()].clone();
                item(&format!("item-{i}"), component, *delay).with_config("fail", json!(*fail))
            })
            .collect();
        let manifest = Manifest::new("Fractions", GradeLevel::Elementary, items);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("Failed to build runtime");
        let exhibit = runtime.block_on(async {
            let orchestrator = BuildOrchestrator::new(scripted_registry());
            let ctx = GenerationContext::new(RunId::new(), "Fractions", GradeLevel::Elementary);
            let outcome = orchestrator.build(&manifest, &ctx).await.expect("manifest is valid");
            assemble(&manifest, &outcome)
        });

        prop_assert_eq!(exhibit.components.len(), manifest.len());
        for ((slot, planned), (_, fail)) in exhibit.components.iter().zip(&manifest.items).zip(&specs) {
            prop_assert_eq!(slot.instance_id(), planned.instance_id.as_str());
            prop_assert_eq!(slot.is_ready(), !*fail);
        }
    }
}
