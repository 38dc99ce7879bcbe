//! Offline collaborators: a planner that reads a plan file and template
//! generators that fill components from manifest metadata.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use exhibit_core::{
    CollaboratorError, ComponentId, ContentGenerator, GeneratedComponent, GenerationContext,
    GenerationError, GeneratorRegistry, GradeLevel, LearningObjective, Manifest, ManifestEvents,
    ManifestItem, ManifestPlanner, ManifestRequest,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// A manifest plan on disk. Topic and grade may be overridden from the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFile {
    /// Default topic.
    #[serde(default)]
    pub topic: Option<String>,
    /// Default grade level.
    #[serde(default)]
    pub grade_level: Option<GradeLevel>,
    /// Objectives the items serve.
    #[serde(default)]
    pub objectives: Vec<LearningObjective>,
    /// Planned items in rendering order.
    pub items: Vec<ManifestItem>,
}

impl PlanFile {
    /// Reads a plan file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "Plan file not found: '{}'\n\nSuggestion: Pass the path of a manifest plan JSON file with --manifest",
                path.display()
            );
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            anyhow::anyhow!(
                "Invalid plan file '{}': {e}\n\nSuggestion: Each item needs \"instanceId\" and \"componentId\"",
                path.display()
            )
        })
    }

    /// Custom component kinds named by the plan.
    pub fn custom_components(&self) -> impl Iterator<Item = &ComponentId> {
        self.items
            .iter()
            .map(|item| &item.component_id)
            .filter(|id| id.is_custom())
    }
}

/// Plans by replaying a plan file, reporting each item as it goes.
#[derive(Debug, Clone)]
pub struct FilePlanner {
    plan: PlanFile,
}

impl FilePlanner {
    /// Wraps a loaded plan.
    #[must_use]
    pub const fn new(plan: PlanFile) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl ManifestPlanner for FilePlanner {
    async fn plan(
        &self,
        request: &ManifestRequest,
        events: &ManifestEvents,
    ) -> Result<Manifest, CollaboratorError> {
        let mut planned: Vec<&str> = Vec::with_capacity(self.plan.items.len());
        for item in &self.plan.items {
            events.thinking(format!(
                "{} -> {} ({})",
                item.instance_id, item.component_id, item.title
            ));
            planned.push(&item.instance_id);
            events.partial(json!({ "items": planned }));
        }

        if self.plan.items.is_empty() {
            return Err(CollaboratorError::invalid_output("plan file has no items"));
        }

        let mut manifest = Manifest::new(
            request.topic.clone(),
            request.grade_level,
            self.plan.items.clone(),
        );
        manifest.objectives.clone_from(&self.plan.objectives);
        Ok(manifest)
    }
}

/// Fills a component from its manifest item and the run context.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(
        &self,
        item: &ManifestItem,
        ctx: &GenerationContext,
    ) -> Result<GeneratedComponent, GenerationError> {
        Ok(GeneratedComponent::for_item(item, template_data(item, ctx)))
    }
}

fn template_data(item: &ManifestItem, ctx: &GenerationContext) -> Value {
    let mut data = json!({
        "title": item.title,
        "intent": item.intent,
        "topic": ctx.topic,
        "audience": ctx.grade_context,
        "objectiveIds": item.objective_ids(),
    });
    if let Value::Object(map) = &mut data {
        for (key, value) in &item.config {
            if key != "objectiveIds" && key != "objectiveId" {
                map.insert(key.clone(), value.clone());
            }
        }
    }
    data
}

/// Registers the template generator for every known kind and for the plan's custom kinds.
pub fn offline_registry(plan: &PlanFile) -> GeneratorRegistry {
    let generator: Arc<dyn ContentGenerator> = Arc::new(TemplateGenerator);
    let mut registry = GeneratorRegistry::new();
    for id in ComponentId::KNOWN {
        registry.register(id, Arc::clone(&generator));
    }
    for id in plan.custom_components() {
        if !registry.contains(id) {
            registry.register(id.clone(), Arc::clone(&generator));
        }
    }
    registry
}
