//! Exhibit Core
//!
//! Plans a manifest for a topic, generates every item in parallel, heals
//! generated scripts and assembles the results in manifest order.

pub mod assembler;
pub mod build;
pub mod component;
pub mod config;
pub mod error;
pub mod events;
pub mod manifest;
pub mod pipeline;
pub mod registry;
pub mod repair;
pub mod run;

pub use assembler::{assemble, ExhibitData, ExhibitSlot};
pub use build::{
    BuildOrchestrator, BuildOutcome, BuildSnapshot, BuildTracker, GenerationStatus, ItemProgress,
};
pub use component::{ComponentId, ExecutableContent, GeneratedComponent};
pub use config::{Config, RepairConfig, CONFIG_FILE_NAME};
pub use error::{
    CollaboratorError, CollaboratorErrorKind, ExhibitError, GenerationError, Result,
};
pub use events::{EventBroadcaster, ExhibitEvent, ManifestEvents, ManifestStreamView};
pub use manifest::{
    GradeLevel, LearningObjective, Manifest, ManifestGenerator, ManifestItem, ManifestPlanner,
    ManifestRequest,
};
pub use pipeline::ExhibitPipeline;
pub use registry::{ContentGenerator, GenerationContext, GeneratorRegistry};
pub use repair::{
    strip_code_fences, HealedScript, RepairRequest, ScriptError, ScriptRepairer, ScriptRunner,
    SelfHealingExecutor,
};
pub use run::RunId;
