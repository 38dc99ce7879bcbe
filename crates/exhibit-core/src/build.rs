//! Parallel build orchestration.
//!
//! Every manifest item is dispatched to its generator at once (optionally
//! capped by a semaphore) and settles independently. A failing item only
//! degrades its own slot.
//!
//! Each item's [`GenerationStatus`] moves forward only:
//! - `Pending` -> `Building` (at dispatch)
//! - `Building` -> `Completed` | `Failed` (at settlement)
//!
//! Terminal states are sticky.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::component::{ComponentId, GeneratedComponent};
use crate::config::Config;
use crate::error::{ExhibitError, GenerationError, Result};
use crate::events::{EventBroadcaster, ExhibitEvent};
use crate::manifest::{Manifest, ManifestItem};
use crate::registry::{ContentGenerator, GenerationContext, GeneratorRegistry};
use crate::repair::{ScriptRepairer, ScriptRunner, SelfHealingExecutor};
use crate::run::RunId;

// ============================================================================
// GenerationStatus
// ============================================================================

/// Generation status of one manifest item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Not dispatched yet.
    #[default]
    Pending,
    /// Generator running.
    Building,
    /// Generator produced a component.
    Completed,
    /// Generator failed; the slot is degraded.
    Failed,
}

impl GenerationStatus {
    /// Returns `true` for `Completed` and `Failed`.
    ///
    /// ```
    /// use exhibit_core::GenerationStatus;
    ///
    /// assert!(GenerationStatus::Failed.is_terminal());
    /// assert!(!GenerationStatus::Building.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` if moving to `next` is a forward transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Building) | (Self::Building, Self::Completed | Self::Failed)
        )
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Building => write!(f, "building"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Status of one item inside a [`BuildSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    /// Manifest instance id.
    pub instance_id: String,
    /// Component kind.
    pub component_id: ComponentId,
    /// Current status.
    pub status: GenerationStatus,
    /// Failure reason once `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full copy of every item's status for one run, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSnapshot {
    /// Run the snapshot belongs to.
    pub run_id: RunId,
    /// Per-item progress in manifest order.
    pub items: Vec<ItemProgress>,
}

impl BuildSnapshot {
    /// Creates an all-`Pending` snapshot for `manifest`.
    #[must_use]
    pub fn pending(run_id: RunId, manifest: &Manifest) -> Self {
        Self {
            run_id,
            items: manifest
                .items
                .iter()
                .map(|item| ItemProgress {
                    instance_id: item.instance_id.clone(),
                    component_id: item.component_id.clone(),
                    status: GenerationStatus::Pending,
                    error: None,
                })
                .collect(),
        }
    }

    /// Looks up one item's progress.
    #[must_use]
    pub fn item(&self, instance_id: &str) -> Option<&ItemProgress> {
        self.items.iter().find(|p| p.instance_id == instance_id)
    }

    /// Indexes every item's progress by instance id.
    #[must_use]
    pub fn by_instance(&self) -> HashMap<&str, &ItemProgress> {
        self.items
            .iter()
            .map(|p| (p.instance_id.as_str(), p))
            .collect()
    }

    /// Looks up one item's status.
    #[must_use]
    pub fn status(&self, instance_id: &str) -> Option<GenerationStatus> {
        self.item(instance_id).map(|p| p.status)
    }

    /// Number of items currently in `status`.
    #[must_use]
    pub fn count(&self, status: GenerationStatus) -> usize {
        self.items.iter().filter(|p| p.status == status).count()
    }

    /// Returns `true` once every item is terminal.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.items.iter().all(|p| p.status.is_terminal())
    }

    /// Fraction of items that are terminal, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.items.is_empty() {
            return 1.0;
        }
        let settled = self.items.iter().filter(|p| p.status.is_terminal()).count();
        settled as f64 / self.items.len() as f64
    }
}

/// Publishes status snapshots for one run.
///
/// Consumers either poll [`BuildTracker::snapshot`] or wait on a receiver from
/// [`BuildTracker::subscribe`]; either way they see whole snapshots.
#[derive(Debug)]
pub struct BuildTracker {
    sender: watch::Sender<BuildSnapshot>,
    index: HashMap<String, usize>,
}

impl BuildTracker {
    /// Creates a tracker with every item `Pending`.
    #[must_use]
    pub fn new(run_id: RunId, manifest: &Manifest) -> Self {
        let snapshot = BuildSnapshot::pending(run_id, manifest);
        let index = snapshot
            .items
            .iter()
            .enumerate()
            .map(|(i, p)| (p.instance_id.clone(), i))
            .collect();
        let (sender, _) = watch::channel(snapshot);
        Self { sender, index }
    }

    /// Returns a copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> BuildSnapshot {
        self.sender.borrow().clone()
    }

    /// Subscribes to snapshot updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BuildSnapshot> {
        self.sender.subscribe()
    }

    /// Moves one item to `next`.
    ///
    /// # Errors
    ///
    /// Returns `ExhibitError::InvalidStateTransition` for unknown items and for
    /// anything but a forward transition.
    pub fn transition(
        &self,
        instance_id: &str,
        next: GenerationStatus,
        error: Option<String>,
    ) -> Result<()> {
        let Some(&position) = self.index.get(instance_id) else {
            return Err(ExhibitError::invalid_transition(
                format!("unknown item '{instance_id}'"),
                next,
            ));
        };

        let mut outcome = Ok(());
        self.sender.send_if_modified(|snapshot| {
            let Some(item) = snapshot.items.get_mut(position) else {
                return false;
            };
            if !item.status.can_transition_to(next) {
                outcome = Err(ExhibitError::invalid_transition(item.status, next));
                return false;
            }
            item.status = next;
            item.error = error;
            true
        });
        outcome
    }
}

// ============================================================================
// BuildOutcome
// ============================================================================

/// Everything one run's build produced.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Run the outputs belong to.
    pub run_id: RunId,
    /// Final statuses.
    pub snapshot: BuildSnapshot,
    /// Successful outputs keyed by instance id.
    pub outputs: HashMap<String, GeneratedComponent>,
}

impl BuildOutcome {
    /// Number of completed items.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.snapshot.count(GenerationStatus::Completed)
    }

    /// Number of failed items.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.snapshot.count(GenerationStatus::Failed)
    }
}

// ============================================================================
// BuildOrchestrator
// ============================================================================

/// Dispatches manifest items to their generators concurrently.
#[derive(Clone)]
pub struct BuildOrchestrator {
    registry: Arc<GeneratorRegistry>,
    healer: Option<SelfHealingExecutor>,
    repair_enabled: bool,
    max_retries: u32,
    default_library: String,
    max_concurrency: Option<usize>,
    broadcaster: Option<EventBroadcaster>,
}

impl std::fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("registry", &self.registry)
            .field("self_healing", &self.healer.is_some())
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl BuildOrchestrator {
    /// Creates an orchestrator with default settings over `registry`.
    #[must_use]
    pub fn new(registry: GeneratorRegistry) -> Self {
        Self::from_config(&Config::default(), registry)
    }

    /// Creates an orchestrator using `config` for fan-out and repair settings.
    #[must_use]
    pub fn from_config(config: &Config, registry: GeneratorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            healer: None,
            repair_enabled: config.repair.enabled,
            max_retries: config.repair.max_retries,
            default_library: config.repair.default_library.clone(),
            max_concurrency: config.max_concurrency,
            broadcaster: None,
        }
    }

    /// Runs executable outputs on `runner` and repairs them through `repairer`.
    ///
    /// Ignored when repair is disabled in the configuration.
    #[must_use]
    pub fn with_script_validation(
        mut self,
        runner: Arc<dyn ScriptRunner>,
        repairer: Arc<dyn ScriptRepairer>,
    ) -> Self {
        if self.repair_enabled {
            self.healer =
                Some(SelfHealingExecutor::new(runner, repairer).with_max_retries(self.max_retries));
        }
        self
    }

    /// Publishes item status events on `broadcaster`.
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: EventBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Caps the number of generators running at once.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// The generator table.
    #[must_use]
    pub fn registry(&self) -> &GeneratorRegistry {
        &self.registry
    }

    /// Mutable access for late registration; builds already running keep their table.
    pub fn registry_mut(&mut self) -> &mut GeneratorRegistry {
        Arc::make_mut(&mut self.registry)
    }

    /// Builds every item of `manifest`.
    pub async fn build(&self, manifest: &Manifest, ctx: &GenerationContext) -> Result<BuildOutcome> {
        let tracker = BuildTracker::new(ctx.run_id, manifest);
        self.build_with_tracker(manifest, ctx, &tracker).await
    }

    /// Builds every item of `manifest`, publishing snapshots through `tracker`.
    ///
    /// Resolves once every item is terminal. Dropping the returned future
    /// aborts generators still in flight.
    ///
    /// # Errors
    ///
    /// Returns `ExhibitError::ManifestInvalid` for a manifest that breaks the
    /// item contract. Item failures never produce an error here.
    pub async fn build_with_tracker(
        &self,
        manifest: &Manifest,
        ctx: &GenerationContext,
        tracker: &BuildTracker,
    ) -> Result<BuildOutcome> {
        manifest.validate()?;

        let run_id = ctx.run_id;
        let registry = Arc::clone(&self.registry);
        let semaphore = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        info!(
            run_id = %run_id,
            items = manifest.len(),
            max_concurrency = ?self.max_concurrency,
            "Dispatching generators"
        );

        let mut set = JoinSet::new();
        for item in &manifest.items {
            self.settle(tracker, run_id, item, GenerationStatus::Building, None);

            let Some(generator) = registry.lookup(&item.component_id) else {
                let error = GenerationError::NoGenerator {
                    component_id: item.component_id.to_string(),
                };
                warn!(run_id = %run_id, instance_id = %item.instance_id, error = %error, "Item failed");
                self.settle(tracker, run_id, item, GenerationStatus::Failed, Some(error.to_string()));
                continue;
            };

            let item = item.clone();
            let ctx = ctx.clone();
            let healer = self.healer.clone();
            let library = self.default_library.clone();
            let semaphore = semaphore.clone();

            set.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let result = generate_item(generator, healer.as_ref(), &item, &ctx, &library).await;
                (item, result)
            });
        }

        let mut outputs = HashMap::with_capacity(manifest.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((item, Ok(component))) => {
                    debug!(run_id = %run_id, instance_id = %item.instance_id, "Item completed");
                    outputs.insert(item.instance_id.clone(), component);
                    self.settle(tracker, run_id, &item, GenerationStatus::Completed, None);
                }
                Ok((item, Err(error))) => {
                    warn!(run_id = %run_id, instance_id = %item.instance_id, error = %error, "Item failed");
                    self.settle(tracker, run_id, &item, GenerationStatus::Failed, Some(error.to_string()));
                }
                Err(join_error) => {
                    warn!(run_id = %run_id, error = %join_error, "Generator task ended abnormally");
                }
            }
        }

        // Anything still building lost its task without reporting back.
        let settled = tracker.snapshot();
        let unsettled: Vec<&ManifestItem> = manifest
            .items
            .iter()
            .filter(|item| {
                settled
                    .status(&item.instance_id)
                    .is_some_and(|s| !s.is_terminal())
            })
            .collect();
        for item in unsettled {
            self.settle(
                tracker,
                run_id,
                item,
                GenerationStatus::Failed,
                Some(GenerationError::Cancelled.to_string()),
            );
        }

        let snapshot = tracker.snapshot();
        let outcome = BuildOutcome {
            run_id,
            snapshot,
            outputs,
        };
        info!(
            run_id = %run_id,
            completed = outcome.completed(),
            failed = outcome.failed(),
            "Build settled"
        );
        self.publish(ExhibitEvent::build_complete(
            run_id,
            outcome.completed(),
            outcome.failed(),
        ));

        Ok(outcome)
    }

    fn settle(
        &self,
        tracker: &BuildTracker,
        run_id: RunId,
        item: &ManifestItem,
        status: GenerationStatus,
        error: Option<String>,
    ) {
        if let Err(e) = tracker.transition(&item.instance_id, status, error.clone()) {
            warn!(run_id = %run_id, instance_id = %item.instance_id, error = %e, "Status update rejected");
            return;
        }
        self.publish(ExhibitEvent::item_status(
            run_id,
            item.instance_id.clone(),
            item.component_id.clone(),
            status,
            error,
        ));
    }

    fn publish(&self, event: ExhibitEvent) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.send(event);
        }
    }
}

/// Runs one generator, guarding against panics and mismatched output, then
/// validates executable content when a healer is configured.
async fn generate_item(
    generator: Arc<dyn ContentGenerator>,
    healer: Option<&SelfHealingExecutor>,
    item: &ManifestItem,
    ctx: &GenerationContext,
    default_library: &str,
) -> std::result::Result<GeneratedComponent, GenerationError> {
    let mut component = match AssertUnwindSafe(generator.generate(item, ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => result?,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            return Err(GenerationError::Panicked { message });
        }
    };

    if component.instance_id != item.instance_id {
        return Err(GenerationError::InvalidOutput {
            message: format!(
                "expected instance '{}', got '{}'",
                item.instance_id, component.instance_id
            ),
        });
    }
    if component.component_id != item.component_id {
        return Err(GenerationError::InvalidOutput {
            message: format!(
                "expected component '{}', got '{}'",
                item.component_id, component.component_id
            ),
        });
    }

    if let Some(healer) = healer {
        if let Some(content) = component.executable(default_library) {
            let healed = healer.run(&item.instance_id, content).await?;
            component.apply_script(&healed.script, healed.retries);
        }
    }

    Ok(component)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::BoxFuture;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::error::CollaboratorError;
    use crate::manifest::GradeLevel;
    use crate::repair::{RepairRequest, ScriptError};

    fn manifest(items: &[(&str, ComponentId)]) -> Manifest {
        Manifest::new(
            "Fractions",
            GradeLevel::Elementary,
            items
                .iter()
                .map(|(id, component)| {
                    ManifestItem::new(*id, component.clone()).with_title(format!("Item {id}"))
                })
                .collect(),
        )
    }

    fn ctx() -> GenerationContext {
        GenerationContext::new(RunId::new(), "Fractions", GradeLevel::Elementary)
    }

    fn delayed(
        ms: u64,
    ) -> impl Fn(ManifestItem, GenerationContext) -> BoxFuture<'static, std::result::Result<GeneratedComponent, GenerationError>>
           + Send
           + Sync
           + 'static {
        move |item, _ctx| {
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(GeneratedComponent::for_item(&item, json!({"ms": ms})))
            }
            .boxed()
        }
    }

    #[test]
    fn test_status_transitions_forward_only() {
        use GenerationStatus::{Building, Completed, Failed, Pending};

        assert!(Pending.can_transition_to(Building));
        assert!(Building.can_transition_to(Completed));
        assert!(Building.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Building.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Building));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&GenerationStatus::Building).unwrap(),
            r#""building""#
        );
        assert_eq!(GenerationStatus::default(), GenerationStatus::Pending);
    }

    #[test]
    fn test_tracker_rejects_backward_and_unknown() {
        let manifest = manifest(&[("a", ComponentId::BarModel)]);
        let tracker = BuildTracker::new(RunId::new(), &manifest);

        assert_ok!(tracker.transition("a", GenerationStatus::Building, None));
        assert_ok!(tracker.transition("a", GenerationStatus::Completed, None));
        assert_err!(tracker.transition("a", GenerationStatus::Failed, None));
        assert_err!(tracker.transition("zzz", GenerationStatus::Building, None));

        assert_eq!(
            tracker.snapshot().status("a"),
            Some(GenerationStatus::Completed)
        );
    }

    #[test]
    fn test_snapshot_is_a_full_copy() {
        let manifest = manifest(&[("a", ComponentId::BarModel), ("b", ComponentId::NumberLine)]);
        let tracker = BuildTracker::new(RunId::new(), &manifest);

        let before = tracker.snapshot();
        tracker
            .transition("b", GenerationStatus::Building, None)
            .unwrap();

        assert_eq!(before.count(GenerationStatus::Pending), 2);
        assert_eq!(tracker.snapshot().count(GenerationStatus::Building), 1);
        assert!((tracker.snapshot().progress() - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_build_completes_out_of_order() {
        let mut registry = GeneratorRegistry::new();
        registry.register_fn(ComponentId::BarModel, delayed(60));
        registry.register_fn(ComponentId::NumberLine, delayed(5));
        let orchestrator = BuildOrchestrator::new(registry);

        let manifest = manifest(&[("a", ComponentId::BarModel), ("b", ComponentId::NumberLine)]);
        let outcome = orchestrator.build(&manifest, &ctx()).await.unwrap();

        assert_eq!(outcome.completed(), 2);
        assert_eq!(outcome.failed(), 0);
        assert!(outcome.snapshot.is_settled());
        assert_eq!(outcome.outputs["a"].data["ms"], 60);
        assert_eq!(outcome.outputs["b"].data["ms"], 5);
    }

    #[tokio::test]
    async fn test_build_is_fan_out_not_sequential() {
        let mut registry = GeneratorRegistry::new();
        for id in [ComponentId::BarModel, ComponentId::NumberLine, ComponentId::FlashcardDeck] {
            registry.register_fn(id, delayed(150));
        }
        let orchestrator = BuildOrchestrator::new(registry);
        let manifest = manifest(&[
            ("a", ComponentId::BarModel),
            ("b", ComponentId::NumberLine),
            ("c", ComponentId::FlashcardDeck),
        ]);

        let started = std::time::Instant::now();
        orchestrator.build(&manifest, &ctx()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mut registry = GeneratorRegistry::new();
        registry.register_fn(ComponentId::BarModel, delayed(10));
        registry.register_fn(ComponentId::NumberLine, |_item, _ctx| {
            async move { Err(GenerationError::from(CollaboratorError::rate_limit("429"))) }.boxed()
        });
        registry.register_fn(ComponentId::KnowledgeCheck, |item, _ctx| {
            async move {
                if item.instance_id == "c" {
                    panic!("generator bug");
                }
                Ok(GeneratedComponent::for_item(&item, json!({})))
            }
            .boxed()
        });
        let orchestrator = BuildOrchestrator::new(registry);

        let manifest = manifest(&[
            ("a", ComponentId::BarModel),
            ("b", ComponentId::NumberLine),
            ("c", ComponentId::KnowledgeCheck),
            ("d", ComponentId::ComparisonPanel),
        ]);
        let outcome = orchestrator.build(&manifest, &ctx()).await.unwrap();

        assert_eq!(outcome.completed(), 1);
        assert_eq!(outcome.failed(), 3);
        assert!(outcome.outputs.contains_key("a"));

        let b = outcome.snapshot.item("b").unwrap();
        assert!(b.error.as_deref().unwrap().contains("429"));
        let c = outcome.snapshot.item("c").unwrap();
        assert!(c.error.as_deref().unwrap().contains("generator bug"));
        let d = outcome.snapshot.item("d").unwrap();
        assert!(d
            .error
            .as_deref()
            .unwrap()
            .contains("no generator registered for component 'comparison-panel'"));
    }

    #[tokio::test]
    async fn test_mismatched_output_fails_item() {
        let mut registry = GeneratorRegistry::new();
        registry.register_fn(ComponentId::BarModel, |item, _ctx| {
            async move {
                let mut component = GeneratedComponent::for_item(&item, json!({}));
                component.instance_id = "someone-else".to_string();
                Ok(component)
            }
            .boxed()
        });
        let orchestrator = BuildOrchestrator::new(registry);

        let outcome = orchestrator
            .build(&manifest(&[("a", ComponentId::BarModel)]), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome.failed(), 1);
        assert!(outcome.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_status_events_and_subscription() {
        let mut registry = GeneratorRegistry::new();
        registry.register_fn(ComponentId::BarModel, delayed(5));
        let broadcaster = EventBroadcaster::new(32);
        let mut events = broadcaster.subscribe();
        let orchestrator = BuildOrchestrator::new(registry).with_broadcaster(broadcaster);

        let manifest = manifest(&[("a", ComponentId::BarModel)]);
        let ctx = ctx();
        let tracker = BuildTracker::new(ctx.run_id, &manifest);
        let mut snapshots = tracker.subscribe();

        orchestrator
            .build_with_tracker(&manifest, &ctx, &tracker)
            .await
            .unwrap();

        assert!(snapshots.has_changed().unwrap());
        assert!(snapshots.borrow_and_update().is_settled());

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                ExhibitEvent::ItemStatus(p) => statuses.push(p.status),
                ExhibitEvent::BuildComplete(p) => {
                    assert_eq!(p.run_id, ctx.run_id);
                    assert_eq!(p.completed, 1);
                }
                other => panic!("unexpected event {}", other.event_name()),
            }
        }
        assert_eq!(
            statuses,
            vec![GenerationStatus::Building, GenerationStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut registry = GeneratorRegistry::new();
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        registry.register_fn(ComponentId::FlashcardDeck, move |item, _ctx| {
            let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(GeneratedComponent::for_item(&item, json!({})))
            }
            .boxed()
        });
        let orchestrator = BuildOrchestrator::new(registry).with_max_concurrency(Some(2));

        let ids: Vec<String> = (0..6).map(|i| format!("card-{i}")).collect();
        let items: Vec<(&str, ComponentId)> = ids
            .iter()
            .map(|id| (id.as_str(), ComponentId::FlashcardDeck))
            .collect();
        let outcome = orchestrator.build(&manifest(&items), &ctx()).await.unwrap();

        assert_eq!(outcome.completed(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    struct ThrowingSurface;

    #[async_trait::async_trait]
    impl ScriptRunner for ThrowingSurface {
        async fn execute(&self, script: &str, _library: &str) -> std::result::Result<(), ScriptError> {
            if script.contains("ok") {
                Ok(())
            } else {
                Err(ScriptError::new("SyntaxError"))
            }
        }
    }

    struct FixingRepairer;

    #[async_trait::async_trait]
    impl ScriptRepairer for FixingRepairer {
        async fn repair(
            &self,
            request: &RepairRequest,
        ) -> std::result::Result<String, CollaboratorError> {
            Ok(format!("{} // ok", request.script))
        }
    }

    #[tokio::test]
    async fn test_executable_output_is_healed_during_build() {
        let mut registry = GeneratorRegistry::new();
        registry.register_fn(ComponentId::CustomVisual, |item, _ctx| {
            async move { Ok(GeneratedComponent::for_item(&item, json!({"script": "draw("}))) }.boxed()
        });
        let orchestrator = BuildOrchestrator::new(registry)
            .with_script_validation(Arc::new(ThrowingSurface), Arc::new(FixingRepairer));

        let outcome = orchestrator
            .build(&manifest(&[("viz", ComponentId::CustomVisual)]), &ctx())
            .await
            .unwrap();

        let viz = &outcome.outputs["viz"];
        assert_eq!(viz.data["script"], "draw( // ok");
        assert_eq!(viz.data["repairCount"], 1);
    }

    #[tokio::test]
    async fn test_repair_disabled_skips_validation() {
        let mut config = Config::default();
        config.repair.enabled = false;

        let mut registry = GeneratorRegistry::new();
        registry.register_fn(ComponentId::CustomVisual, |item, _ctx| {
            async move { Ok(GeneratedComponent::for_item(&item, json!({"script": "draw("}))) }.boxed()
        });
        let orchestrator = BuildOrchestrator::from_config(&config, registry)
            .with_script_validation(Arc::new(ThrowingSurface), Arc::new(FixingRepairer));

        let outcome = orchestrator
            .build(&manifest(&[("viz", ComponentId::CustomVisual)]), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome.outputs["viz"].data["script"], "draw(");
    }

    #[tokio::test]
    async fn test_late_registration_through_orchestrator() {
        let mut orchestrator = BuildOrchestrator::new(GeneratorRegistry::new());
        let manifest = manifest(&[("a", ComponentId::Custom("periodic-table".into()))]);

        let outcome = orchestrator.build(&manifest, &ctx()).await.unwrap();
        assert_eq!(outcome.failed(), 1);

        orchestrator
            .registry_mut()
            .register_fn(ComponentId::Custom("periodic-table".into()), delayed(1));
        let outcome = orchestrator.build(&manifest, &ctx()).await.unwrap();
        assert_eq!(outcome.completed(), 1);
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_rejected() {
        let orchestrator = BuildOrchestrator::new(GeneratorRegistry::new());
        let empty = Manifest::new("Fractions", GradeLevel::Elementary, vec![]);
        let err = orchestrator.build(&empty, &ctx()).await.unwrap_err();
        assert!(matches!(err, ExhibitError::ManifestInvalid { .. }));
    }
}
