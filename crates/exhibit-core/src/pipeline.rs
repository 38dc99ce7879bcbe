//! Run-scoped exhibit generation.
//!
//! [`ExhibitPipeline`] chains manifest generation, the parallel build and
//! assembly for one request at a time. Each request gets its own [`RunId`];
//! starting a new request supersedes the previous one, and a superseded run
//! can never publish its exhibit.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use exhibit_core::{
//!     Config, ExhibitPipeline, GeneratorRegistry, GradeLevel, ManifestPlanner, ManifestRequest,
//! };
//!
//! # async fn example(planner: Arc<dyn ManifestPlanner>) -> exhibit_core::Result<()> {
//! let pipeline = ExhibitPipeline::new(Config::default(), planner, GeneratorRegistry::new());
//! let exhibit = pipeline
//!     .generate(&ManifestRequest::new("Fractions", GradeLevel::Elementary))
//!     .await?;
//! println!("{} of {} components ready", exhibit.ready_count(), exhibit.components.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};

use crate::assembler::{assemble, ExhibitData};
use crate::build::{BuildOrchestrator, BuildSnapshot, BuildTracker};
use crate::config::Config;
use crate::error::{ExhibitError, Result};
use crate::events::{EventBroadcaster, ExhibitEvent, ManifestEvents, ManifestStreamView};
use crate::manifest::{ManifestGenerator, ManifestPlanner, ManifestRequest};
use crate::registry::{GenerationContext, GeneratorRegistry};
use crate::repair::{ScriptRepairer, ScriptRunner};
use crate::run::RunId;

/// Exhibit generation session.
///
/// Share it behind an `Arc` to start runs from several tasks.
pub struct ExhibitPipeline {
    config: Config,
    manifests: ManifestGenerator,
    orchestrator: BuildOrchestrator,
    broadcaster: EventBroadcaster,
    current: Mutex<Option<RunId>>,
    build_status: Mutex<Option<watch::Receiver<BuildSnapshot>>>,
    latest: Mutex<Option<ExhibitData>>,
}

impl std::fmt::Debug for ExhibitPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExhibitPipeline")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl ExhibitPipeline {
    /// Creates a pipeline from a planner and a populated registry.
    #[must_use]
    pub fn new(config: Config, planner: Arc<dyn ManifestPlanner>, registry: GeneratorRegistry) -> Self {
        let broadcaster = EventBroadcaster::new(config.event_capacity);
        let orchestrator =
            BuildOrchestrator::from_config(&config, registry).with_broadcaster(broadcaster.clone());
        Self {
            config,
            manifests: ManifestGenerator::new(planner),
            orchestrator,
            broadcaster,
            current: Mutex::new(None),
            build_status: Mutex::new(None),
            latest: Mutex::new(None),
        }
    }

    /// Validates executable outputs through the self-healing repairer.
    #[must_use]
    pub fn with_script_validation(
        mut self,
        runner: Arc<dyn ScriptRunner>,
        repairer: Arc<dyn ScriptRepairer>,
    ) -> Self {
        self.orchestrator = self.orchestrator.with_script_validation(runner, repairer);
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The orchestrator, for late generator registration via `registry_mut`.
    pub fn orchestrator_mut(&mut self) -> &mut BuildOrchestrator {
        &mut self.orchestrator
    }

    /// Subscribes to every event the pipeline emits.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExhibitEvent> {
        self.broadcaster.subscribe()
    }

    /// A manifest stream view for `run_id` sized from the configuration.
    #[must_use]
    pub fn stream_view(&self, run_id: RunId) -> ManifestStreamView {
        ManifestStreamView::new(run_id, self.config.thinking_buffer_size)
    }

    /// The run whose results may currently be published.
    pub async fn current_run(&self) -> Option<RunId> {
        *self.current.lock().await
    }

    /// Snapshot updates for the current run's build, once it has started.
    pub async fn build_status(&self) -> Option<watch::Receiver<BuildSnapshot>> {
        self.build_status.lock().await.clone()
    }

    /// The exhibit of the current request, once published.
    ///
    /// Starting a new request discards the previous exhibit.
    pub async fn latest(&self) -> Option<ExhibitData> {
        self.latest.lock().await.clone()
    }

    /// Abandons the current run. Its results will be discarded.
    pub async fn cancel(&self) {
        if let Some(run_id) = self.current.lock().await.take() {
            info!(run_id = %run_id, "Run abandoned");
        }
        *self.build_status.lock().await = None;
    }

    /// Generates an exhibit under a fresh run id.
    pub async fn generate(&self, request: &ManifestRequest) -> Result<ExhibitData> {
        self.generate_run(RunId::new(), request).await
    }

    /// Generates an exhibit under `run_id`, superseding any earlier run.
    ///
    /// Listeners can build a [`ManifestStreamView`] for `run_id` before
    /// calling this to follow planning progress.
    ///
    /// # Errors
    ///
    /// Manifest failures are fatal to the request. Returns
    /// `ExhibitError::RunSuperseded` if a newer run started (or this one was
    /// cancelled) before the exhibit could be published. Per-item failures
    /// only show up as unavailable slots.
    pub async fn generate_run(
        &self,
        run_id: RunId,
        request: &ManifestRequest,
    ) -> Result<ExhibitData> {
        {
            let mut current = self.current.lock().await;
            if let Some(previous) = current.replace(run_id) {
                info!(run_id = %run_id, superseded = %previous, "Superseding earlier run");
            }
            *self.latest.lock().await = None;
        }

        let events = ManifestEvents::new(run_id, self.broadcaster.clone());
        let manifest = self.manifests.generate_streaming(request, &events).await?;
        self.ensure_current(run_id).await?;

        let ctx = GenerationContext::new(run_id, manifest.topic.clone(), manifest.grade_level);
        let tracker = BuildTracker::new(run_id, &manifest);
        {
            let current = self.current.lock().await;
            if *current == Some(run_id) {
                *self.build_status.lock().await = Some(tracker.subscribe());
            }
        }

        let outcome = self
            .orchestrator
            .build_with_tracker(&manifest, &ctx, &tracker)
            .await?;
        let exhibit = assemble(&manifest, &outcome);

        {
            let current = self.current.lock().await;
            if *current != Some(run_id) {
                warn!(run_id = %run_id, "Discarding exhibit of superseded run");
                return Err(ExhibitError::run_superseded(run_id));
            }
            *self.latest.lock().await = Some(exhibit.clone());
        }

        info!(
            run_id = %run_id,
            ready = exhibit.ready_count(),
            unavailable = exhibit.unavailable_count(),
            "Exhibit ready"
        );
        self.broadcaster.send(ExhibitEvent::exhibit_ready(
            run_id,
            exhibit.ready_count(),
            exhibit.unavailable_count(),
        ));

        Ok(exhibit)
    }

    async fn ensure_current(&self, run_id: RunId) -> Result<()> {
        if *self.current.lock().await == Some(run_id) {
            Ok(())
        } else {
            warn!(run_id = %run_id, "Run superseded; stopping early");
            Err(ExhibitError::run_superseded(run_id))
        }
    }
}
