//! Exhibit assembly.
//!
//! Joins a manifest with the outputs of its build. The manifest alone decides
//! the order of the exhibit; completion order never leaks into it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::build::{BuildOutcome, GenerationStatus};
use crate::component::{ComponentId, GeneratedComponent};
use crate::manifest::{GradeLevel, Manifest};
use crate::run::RunId;

/// One position in an assembled exhibit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExhibitSlot {
    /// Content generated successfully.
    Ready {
        /// The generated component.
        component: GeneratedComponent,
    },
    /// Generation failed; renderers show a placeholder here.
    #[serde(rename_all = "camelCase")]
    Unavailable {
        /// Manifest instance id.
        instance_id: String,
        /// Component kind that failed.
        component_id: ComponentId,
        /// Item title from the manifest.
        title: String,
        /// Why the content is missing.
        reason: String,
    },
}

impl ExhibitSlot {
    /// Instance id of the slot.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        match self {
            Self::Ready { component } => &component.instance_id,
            Self::Unavailable { instance_id, .. } => instance_id,
        }
    }

    /// Component kind of the slot.
    #[must_use]
    pub const fn component_id(&self) -> &ComponentId {
        match self {
            Self::Ready { component } => &component.component_id,
            Self::Unavailable { component_id, .. } => component_id,
        }
    }

    /// The generated component, if ready.
    #[must_use]
    pub const fn component(&self) -> Option<&GeneratedComponent> {
        match self {
            Self::Ready { component } => Some(component),
            Self::Unavailable { .. } => None,
        }
    }

    /// Returns `true` if content was generated.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// A finished exhibit, ordered exactly as its manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExhibitData {
    /// Run that produced the exhibit.
    pub run_id: RunId,
    /// Exhibit topic.
    pub topic: String,
    /// Audience band.
    pub grade_level: GradeLevel,
    /// One slot per manifest item, in manifest order.
    pub components: Vec<ExhibitSlot>,
}

impl ExhibitData {
    /// Number of slots with generated content.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.components.iter().filter(|s| s.is_ready()).count()
    }

    /// Number of placeholder slots.
    #[must_use]
    pub fn unavailable_count(&self) -> usize {
        self.components.len() - self.ready_count()
    }

    /// Generated components in exhibit order, skipping placeholders.
    pub fn ready_components(&self) -> impl Iterator<Item = &GeneratedComponent> {
        self.components.iter().filter_map(ExhibitSlot::component)
    }

    /// Instance ids in exhibit order.
    #[must_use]
    pub fn instance_ids(&self) -> Vec<&str> {
        self.components.iter().map(ExhibitSlot::instance_id).collect()
    }
}

/// Builds the exhibit for `manifest` from `outcome`.
///
/// Walks the manifest in order. Items without a completed output become
/// [`ExhibitSlot::Unavailable`], so the exhibit always has one slot per
/// manifest item. Pure: identical inputs give identical exhibits.
#[must_use]
pub fn assemble(manifest: &Manifest, outcome: &BuildOutcome) -> ExhibitData {
    let statuses = outcome.snapshot.by_instance();
    let components = manifest
        .items
        .iter()
        .map(|item| {
            let progress = statuses.get(item.instance_id.as_str()).copied();
            let completed = progress.is_some_and(|p| p.status == GenerationStatus::Completed);

            match outcome.outputs.get(&item.instance_id) {
                Some(component) if completed => ExhibitSlot::Ready {
                    component: component.clone(),
                },
                _ => ExhibitSlot::Unavailable {
                    instance_id: item.instance_id.clone(),
                    component_id: item.component_id.clone(),
                    title: item.title.clone(),
                    reason: progress
                        .and_then(|p| p.error.clone())
                        .unwrap_or_else(|| "content was not generated".to_string()),
                },
            }
        })
        .collect();

    let exhibit = ExhibitData {
        run_id: outcome.run_id,
        topic: manifest.topic.clone(),
        grade_level: manifest.grade_level,
        components,
    };
    debug!(
        run_id = %exhibit.run_id,
        ready = exhibit.ready_count(),
        unavailable = exhibit.unavailable_count(),
        "Exhibit assembled"
    );
    exhibit
}
