//! Content generator registry.
//!
//! Maps a [`ComponentId`] to the generator that produces its content. The
//! registry is the only seam through which generators are invoked, so adding
//! a content type never touches orchestration code.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::component::{ComponentId, GeneratedComponent};
use crate::error::GenerationError;
use crate::manifest::{GradeLevel, ManifestItem};
use crate::run::RunId;

/// Context shared with every generator of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationContext {
    /// Run the generation belongs to.
    pub run_id: RunId,
    /// Exhibit topic.
    pub topic: String,
    /// Audience band.
    pub grade_level: GradeLevel,
    /// Audience description for prompts.
    pub grade_context: String,
}

impl GenerationContext {
    /// Creates a context for `topic` and `grade_level`.
    #[must_use]
    pub fn new(run_id: RunId, topic: impl Into<String>, grade_level: GradeLevel) -> Self {
        Self {
            run_id,
            topic: topic.into(),
            grade_level,
            grade_context: grade_level.grade_context().to_string(),
        }
    }
}

/// Produces content for one manifest item.
///
/// Timeouts and local retries, if any, are the generator's own business.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generates the component for `item`.
    async fn generate(
        &self,
        item: &ManifestItem,
        ctx: &GenerationContext,
    ) -> Result<GeneratedComponent, GenerationError>;
}

type GeneratorFn = dyn Fn(ManifestItem, GenerationContext) -> BoxFuture<'static, Result<GeneratedComponent, GenerationError>>
    + Send
    + Sync;

/// Adapts a closure returning a boxed future into a [`ContentGenerator`].
struct FnGenerator {
    func: Box<GeneratorFn>,
}

#[async_trait]
impl ContentGenerator for FnGenerator {
    async fn generate(
        &self,
        item: &ManifestItem,
        ctx: &GenerationContext,
    ) -> Result<GeneratedComponent, GenerationError> {
        (self.func)(item.clone(), ctx.clone()).await
    }
}

/// Dispatch table from component kind to generator.
///
/// Built at startup, then shared read-only behind an `Arc`. Late
/// registration goes through `Arc::make_mut`, which leaves runs already in
/// flight on the table they started with.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<ComponentId, Arc<dyn ContentGenerator>>,
}

impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("components", &self.component_ids())
            .finish()
    }
}

impl GeneratorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `generator` for `component_id`.
    ///
    /// Custom names are matched case-insensitively. A duplicate registration
    /// is logged and overwrites the previous generator. Returns `true` if an
    /// earlier generator was replaced.
    pub fn register(
        &mut self,
        component_id: ComponentId,
        generator: Arc<dyn ContentGenerator>,
    ) -> bool {
        let component_id = component_id.normalized();
        let replaced = self
            .generators
            .insert(component_id.clone(), generator)
            .is_some();
        if replaced {
            warn!(component_id = %component_id, "Generator registered twice; overwriting");
        } else {
            debug!(component_id = %component_id, "Generator registered");
        }
        replaced
    }

    /// Registers a closure as the generator for `component_id`.
    ///
    /// ```
    /// use exhibit_core::{ComponentId, GeneratedComponent, GeneratorRegistry};
    /// use futures::FutureExt;
    /// use serde_json::json;
    ///
    /// let mut registry = GeneratorRegistry::new();
    /// registry.register_fn(ComponentId::BarModel, |item, _ctx| {
    ///     async move { Ok(GeneratedComponent::for_item(&item, json!({"bars": []}))) }.boxed()
    /// });
    /// assert!(registry.lookup(&ComponentId::BarModel).is_some());
    /// ```
    pub fn register_fn<F>(&mut self, component_id: ComponentId, func: F) -> bool
    where
        F: Fn(
                ManifestItem,
                GenerationContext,
            ) -> BoxFuture<'static, Result<GeneratedComponent, GenerationError>>
            + Send
            + Sync
            + 'static,
    {
        self.register(
            component_id,
            Arc::new(FnGenerator {
                func: Box::new(func),
            }),
        )
    }

    /// Returns the generator for `component_id`, if one is registered.
    #[must_use]
    pub fn lookup(&self, component_id: &ComponentId) -> Option<Arc<dyn ContentGenerator>> {
        self.generators.get(&component_id.normalized()).cloned()
    }

    /// Returns `true` if a generator is registered for `component_id`.
    #[must_use]
    pub fn contains(&self, component_id: &ComponentId) -> bool {
        self.generators.contains_key(&component_id.normalized())
    }

    /// Known component kinds that have no generator.
    #[must_use]
    pub fn missing_known(&self) -> Vec<ComponentId> {
        ComponentId::KNOWN
            .into_iter()
            .filter(|id| !self.contains(id))
            .collect()
    }

    /// Registered component kinds, sorted.
    #[must_use]
    pub fn component_ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<_> = self.generators.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered generators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}
