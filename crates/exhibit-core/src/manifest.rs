//! Manifest types and the manifest generator.
//!
//! A [`Manifest`] is the ordered blueprint of one exhibit. Its item order is
//! the single source of truth for final rendering order. The composition of a
//! manifest is decided by an external [`ManifestPlanner`]; the
//! [`ManifestGenerator`] only validates the request, forwards streaming events
//! and rejects any output that breaks the item contract.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::component::ComponentId;
use crate::error::{CollaboratorError, ExhibitError, Result};
use crate::events::ManifestEvents;

// ============================================================================
// GradeLevel
// ============================================================================

/// Audience band an exhibit is written for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GradeLevel {
    /// Ages 3-5.
    Preschool,
    /// Ages 5-6.
    Kindergarten,
    /// Grades 1-5 (default).
    #[default]
    Elementary,
    /// Grades 6-8.
    MiddleSchool,
    /// Grades 9-12.
    HighSchool,
    /// College undergraduates.
    Undergraduate,
    /// Graduate students.
    Graduate,
    /// Doctoral level.
    Phd,
}

impl GradeLevel {
    /// Parses a grade band case-insensitively; `-`, `_` and spaces are interchangeable.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect();
        match normalized.as_str() {
            "preschool" => Some(Self::Preschool),
            "kindergarten" => Some(Self::Kindergarten),
            "elementary" => Some(Self::Elementary),
            "middleschool" => Some(Self::MiddleSchool),
            "highschool" => Some(Self::HighSchool),
            "undergraduate" => Some(Self::Undergraduate),
            "graduate" => Some(Self::Graduate),
            "phd" => Some(Self::Phd),
            _ => None,
        }
    }

    /// Returns the wire name of this grade band.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Preschool => "preschool",
            Self::Kindergarten => "kindergarten",
            Self::Elementary => "elementary",
            Self::MiddleSchool => "middle_school",
            Self::HighSchool => "high_school",
            Self::Undergraduate => "undergraduate",
            Self::Graduate => "graduate",
            Self::Phd => "phd",
        }
    }

    /// Audience description handed to content generators.
    #[must_use]
    pub const fn grade_context(&self) -> &'static str {
        match self {
            Self::Preschool => "preschool learners (ages 3-5)",
            Self::Kindergarten => "kindergarten students (ages 5-6)",
            Self::Elementary => "elementary school students (grades 1-5)",
            Self::MiddleSchool => "middle school students (grades 6-8)",
            Self::HighSchool => "high school students (grades 9-12)",
            Self::Undergraduate => "undergraduate college students",
            Self::Graduate => "graduate students",
            Self::Phd => "doctoral-level researchers",
        }
    }
}

impl std::fmt::Display for GradeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GradeLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid grade level '{s}': expected one of 'preschool', 'kindergarten', \
                 'elementary', 'middle_school', 'high_school', 'undergraduate', 'graduate', 'phd'"
            ))
        })
    }
}

impl Serialize for GradeLevel {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Objectives, items, manifest
// ============================================================================

/// A learning objective an exhibit should serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningObjective {
    /// Stable identifier referenced from item configuration.
    pub id: String,
    /// Objective statement.
    pub text: String,
}

impl LearningObjective {
    /// Creates a new objective.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// One component to render, as planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestItem {
    /// Unique within its manifest.
    pub instance_id: String,
    /// Which generator produces this item.
    pub component_id: ComponentId,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// What the item is meant to teach.
    #[serde(default)]
    pub intent: String,
    /// Per-item configuration, including the objective(s) it serves.
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl ManifestItem {
    /// Creates an item with empty display metadata and configuration.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, component_id: ComponentId) -> Self {
        Self {
            instance_id: instance_id.into(),
            component_id,
            title: String::new(),
            intent: String::new(),
            config: Map::new(),
        }
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the intent.
    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = intent.into();
        self
    }

    /// Adds a configuration entry.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Objective ids this item serves, read from `objectiveIds` (array) or `objectiveId` (string).
    #[must_use]
    pub fn objective_ids(&self) -> Vec<&str> {
        if let Some(ids) = self.config.get("objectiveIds").and_then(Value::as_array) {
            return ids.iter().filter_map(Value::as_str).collect();
        }
        self.config
            .get("objectiveId")
            .and_then(Value::as_str)
            .into_iter()
            .collect()
    }
}

/// The ordered blueprint for one exhibit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Topic the exhibit covers.
    pub topic: String,
    /// Audience band.
    pub grade_level: GradeLevel,
    /// Objectives the items serve.
    #[serde(default)]
    pub objectives: Vec<LearningObjective>,
    /// Items in rendering order.
    pub items: Vec<ManifestItem>,
}

impl Manifest {
    /// Creates a manifest.
    #[must_use]
    pub fn new(topic: impl Into<String>, grade_level: GradeLevel, items: Vec<ManifestItem>) -> Self {
        Self {
            topic: topic.into(),
            grade_level,
            objectives: Vec::new(),
            items,
        }
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the manifest has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Looks up an item by instance id.
    #[must_use]
    pub fn item(&self, instance_id: &str) -> Option<&ManifestItem> {
        self.items.iter().find(|item| item.instance_id == instance_id)
    }

    /// Checks the item contract: at least one item, non-blank unique instance
    /// ids, non-blank titles.
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(ExhibitError::manifest_invalid("manifest has no items"));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for (index, item) in self.items.iter().enumerate() {
            if item.instance_id.trim().is_empty() {
                return Err(ExhibitError::manifest_invalid(format!(
                    "item {index} has an empty instance id"
                )));
            }
            if !seen.insert(item.instance_id.as_str()) {
                return Err(ExhibitError::manifest_invalid(format!(
                    "duplicate instance id '{}'",
                    item.instance_id
                )));
            }
            if item.title.trim().is_empty() {
                return Err(ExhibitError::manifest_invalid(format!(
                    "item '{}' has an empty title",
                    item.instance_id
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Input to manifest generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRequest {
    /// Topic to build an exhibit for. Must not be blank.
    pub topic: String,
    /// Audience band.
    pub grade_level: GradeLevel,
    /// Pre-computed objectives, if the caller already has them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<Vec<LearningObjective>>,
}

impl ManifestRequest {
    /// Creates a request without pre-computed objectives.
    #[must_use]
    pub fn new(topic: impl Into<String>, grade_level: GradeLevel) -> Self {
        Self {
            topic: topic.into(),
            grade_level,
            objectives: None,
        }
    }

    /// Attaches pre-computed objectives.
    #[must_use]
    pub fn with_objectives(mut self, objectives: Vec<LearningObjective>) -> Self {
        self.objectives = Some(objectives);
        self
    }

    /// Rejects blank topics.
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(ExhibitError::invalid_request("topic must not be empty"));
        }
        Ok(())
    }
}

/// External content-planning collaborator (LLM or rules engine).
///
/// Implementations may report progress through `events` while they work;
/// partial manifests sent that way are informational only.
#[async_trait]
pub trait ManifestPlanner: Send + Sync {
    /// Produces a manifest for the request.
    async fn plan(
        &self,
        request: &ManifestRequest,
        events: &ManifestEvents,
    ) -> std::result::Result<Manifest, CollaboratorError>;
}

/// Validates requests, drives a [`ManifestPlanner`] and vets its output.
#[derive(Clone)]
pub struct ManifestGenerator {
    planner: Arc<dyn ManifestPlanner>,
}

impl std::fmt::Debug for ManifestGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestGenerator").finish_non_exhaustive()
    }
}

impl ManifestGenerator {
    /// Wraps a planner.
    #[must_use]
    pub fn new(planner: Arc<dyn ManifestPlanner>) -> Self {
        Self { planner }
    }

    /// Generates a manifest without streaming events.
    pub async fn generate(&self, request: &ManifestRequest) -> Result<Manifest> {
        self.generate_streaming(request, &ManifestEvents::disabled())
            .await
    }

    /// Generates a manifest, forwarding progress, thinking and partial-manifest
    /// events through `events`.
    ///
    /// # Errors
    ///
    /// Fails the whole request if the topic is blank, the planner errors, or
    /// the planner's manifest is empty or malformed. There is no partial
    /// manifest fallback.
    pub async fn generate_streaming(
        &self,
        request: &ManifestRequest,
        events: &ManifestEvents,
    ) -> Result<Manifest> {
        request.validate()?;

        info!(
            run_id = %events.run_id(),
            topic = %request.topic,
            grade = %request.grade_level,
            "Generating manifest"
        );
        events.progress(format!(
            "Planning an exhibit on \"{}\" for {}",
            request.topic,
            request.grade_level.grade_context()
        ));

        let mut manifest = match self.planner.plan(request, events).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(run_id = %events.run_id(), error = %e, "Manifest planner failed");
                events.error(format!("Manifest generation failed: {e}"));
                return Err(ExhibitError::manifest_failed(e));
            }
        };

        if let Err(e) = manifest.validate() {
            warn!(run_id = %events.run_id(), error = %e, "Planner returned an invalid manifest");
            events.error(e.to_string());
            return Err(e);
        }

        if manifest.topic.trim().is_empty() {
            manifest.topic.clone_from(&request.topic);
        }
        if manifest.objectives.is_empty() {
            if let Some(objectives) = &request.objectives {
                manifest.objectives.clone_from(objectives);
            }
        }

        debug!(
            run_id = %events.run_id(),
            items = manifest.len(),
            "Manifest finalized"
        );
        events.ready(&manifest);

        Ok(manifest)
    }
}
