//! Event types and broadcasting for observing exhibit generation.
//!
//! All progress leaves the pipeline through one [`EventBroadcaster`] carrying
//! [`ExhibitEvent`]s. Every event names the run it belongs to, so listeners
//! can drop traffic from abandoned runs.
//!
//! # Event Types
//!
//! - `manifest_progress` - Human-readable planning phase update
//! - `manifest_thinking` - Diagnostic planner trace
//! - `manifest_partial` - Speculative intermediate manifest (never authoritative)
//! - `manifest_ready` - The manifest was finalized
//! - `item_status` - One item changed generation status
//! - `build_complete` - Every item reached a terminal status
//! - `exhibit_ready` - The exhibit was assembled
//! - `error` - A request-level failure
//!
//! # Example
//!
//! ```no_run
//! use exhibit_core::{EventBroadcaster, ManifestEvents, RunId};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! let events = ManifestEvents::new(RunId::new(), broadcaster.clone());
//! events.progress("Choosing components");
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {}", event.event_name());
//! }
//! # }
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::build::GenerationStatus;
use crate::component::ComponentId;
use crate::manifest::Manifest;
use crate::run::RunId;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `manifest_progress` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Phase description.
    pub message: String,
    /// When the phase was reported.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `manifest_thinking` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingPayload {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Planner trace line.
    pub thought: String,
}

/// Payload for the `manifest_partial` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialManifestPayload {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Whatever structure the planner has so far.
    pub partial: Value,
}

/// Payload for the `manifest_ready` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestReadyPayload {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Instance ids in manifest order.
    pub instance_ids: Vec<String>,
}

/// Payload for the `item_status` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStatusPayload {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Item that changed.
    pub instance_id: String,
    /// Its component kind.
    pub component_id: ComponentId,
    /// The new status.
    pub status: GenerationStatus,
    /// Failure reason, for `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for the `build_complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCompletePayload {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Items that completed.
    pub completed: usize,
    /// Items that failed.
    pub failed: usize,
}

/// Payload for the `exhibit_ready` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExhibitReadyPayload {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Slots holding generated content.
    pub ready: usize,
    /// Slots holding an unavailable placeholder.
    pub unavailable: usize,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Run the event belongs to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events emitted while an exhibit is generated.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ExhibitEvent {
    /// Planning phase update.
    ManifestProgress(ProgressPayload),
    /// Planner trace.
    ManifestThinking(ThinkingPayload),
    /// Speculative manifest.
    ManifestPartial(PartialManifestPayload),
    /// Manifest finalized.
    ManifestReady(ManifestReadyPayload),
    /// Item status change.
    ItemStatus(ItemStatusPayload),
    /// All items settled.
    BuildComplete(BuildCompletePayload),
    /// Exhibit assembled.
    ExhibitReady(ExhibitReadyPayload),
    /// Request-level failure.
    Error(ErrorPayload),
}

impl ExhibitEvent {
    /// Creates an `ItemStatus` event.
    #[must_use]
    pub fn item_status(
        run_id: RunId,
        instance_id: impl Into<String>,
        component_id: ComponentId,
        status: GenerationStatus,
        error: Option<String>,
    ) -> Self {
        Self::ItemStatus(ItemStatusPayload {
            run_id,
            instance_id: instance_id.into(),
            component_id,
            status,
            error,
        })
    }

    /// Creates a `BuildComplete` event.
    #[must_use]
    pub const fn build_complete(run_id: RunId, completed: usize, failed: usize) -> Self {
        Self::BuildComplete(BuildCompletePayload {
            run_id,
            completed,
            failed,
        })
    }

    /// Creates an `ExhibitReady` event.
    #[must_use]
    pub const fn exhibit_ready(run_id: RunId, ready: usize, unavailable: usize) -> Self {
        Self::ExhibitReady(ExhibitReadyPayload {
            run_id,
            ready,
            unavailable,
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(run_id: Option<RunId>, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            run_id,
            message: message.into(),
        })
    }

    /// Returns the run this event belongs to.
    #[must_use]
    pub const fn run_id(&self) -> Option<RunId> {
        match self {
            Self::ManifestProgress(p) => Some(p.run_id),
            Self::ManifestThinking(p) => Some(p.run_id),
            Self::ManifestPartial(p) => Some(p.run_id),
            Self::ManifestReady(p) => Some(p.run_id),
            Self::ItemStatus(p) => Some(p.run_id),
            Self::BuildComplete(p) => Some(p.run_id),
            Self::ExhibitReady(p) => Some(p.run_id),
            Self::Error(p) => p.run_id,
        }
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::ManifestProgress(_) => "manifest_progress",
            Self::ManifestThinking(_) => "manifest_thinking",
            Self::ManifestPartial(_) => "manifest_partial",
            Self::ManifestReady(_) => "manifest_ready",
            Self::ItemStatus(_) => "item_status",
            Self::BuildComplete(_) => "build_complete",
            Self::ExhibitReady(_) => "exhibit_ready",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts exhibit events to every subscriber.
///
/// Uses a tokio broadcast channel. Events are not persisted for late subscribers.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ExhibitEvent>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the specified buffer capacity.
    ///
    /// The buffer determines how many events can be queued per subscriber
    /// before old events are dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber for receiving events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExhibitEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event to all current subscribers.
    ///
    /// Returns the number of receivers; 0 means nobody is listening.
    pub fn send(&self, event: ExhibitEvent) -> usize {
        // send() returns Err only if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// Planner-facing handle
// ============================================================================

/// Handle a [`crate::ManifestPlanner`] uses to report progress for one run.
///
/// A disabled handle accepts every call and sends nothing.
#[derive(Debug, Clone)]
pub struct ManifestEvents {
    run_id: RunId,
    broadcaster: Option<EventBroadcaster>,
}

impl ManifestEvents {
    /// Creates a handle that publishes on `broadcaster`.
    #[must_use]
    pub const fn new(run_id: RunId, broadcaster: EventBroadcaster) -> Self {
        Self {
            run_id,
            broadcaster: Some(broadcaster),
        }
    }

    /// Creates a handle that discards everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            run_id: RunId::new(),
            broadcaster: None,
        }
    }

    /// The run these events belong to.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    fn send(&self, event: ExhibitEvent) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.send(event);
        }
    }

    /// Reports a planning phase.
    pub fn progress(&self, message: impl Into<String>) {
        self.send(ExhibitEvent::ManifestProgress(ProgressPayload {
            run_id: self.run_id,
            message: message.into(),
            timestamp: Utc::now(),
        }));
    }

    /// Reports a diagnostic trace line.
    pub fn thinking(&self, thought: impl Into<String>) {
        self.send(ExhibitEvent::ManifestThinking(ThinkingPayload {
            run_id: self.run_id,
            thought: thought.into(),
        }));
    }

    /// Reports a speculative intermediate manifest.
    pub fn partial(&self, partial: Value) {
        self.send(ExhibitEvent::ManifestPartial(PartialManifestPayload {
            run_id: self.run_id,
            partial,
        }));
    }

    /// Reports the finalized manifest.
    pub fn ready(&self, manifest: &Manifest) {
        self.send(ExhibitEvent::ManifestReady(ManifestReadyPayload {
            run_id: self.run_id,
            instance_ids: manifest
                .items
                .iter()
                .map(|item| item.instance_id.clone())
                .collect(),
        }));
    }

    /// Reports a request-level failure.
    pub fn error(&self, message: impl Into<String>) {
        self.send(ExhibitEvent::error(Some(self.run_id), message));
    }
}

// ============================================================================
// Consumer-side view
// ============================================================================

/// Folds manifest events for one run into what a progress display needs.
///
/// Only the most recent `capacity` thinking traces are kept.
#[derive(Debug, Clone)]
pub struct ManifestStreamView {
    run_id: RunId,
    capacity: usize,
    latest_progress: Option<String>,
    thoughts: VecDeque<String>,
    partial: Option<Value>,
    ready: bool,
    error: Option<String>,
}

impl ManifestStreamView {
    /// Creates an empty view for `run_id`.
    #[must_use]
    pub fn new(run_id: RunId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            run_id,
            capacity,
            latest_progress: None,
            thoughts: VecDeque::with_capacity(capacity),
            partial: None,
            ready: false,
            error: None,
        }
    }

    /// Applies one event. Returns `false` if it belonged to another run or was irrelevant.
    pub fn apply(&mut self, event: &ExhibitEvent) -> bool {
        if event.run_id() != Some(self.run_id) {
            return false;
        }
        match event {
            ExhibitEvent::ManifestProgress(p) => {
                self.latest_progress = Some(p.message.clone());
            }
            ExhibitEvent::ManifestThinking(p) => {
                if self.thoughts.len() == self.capacity {
                    self.thoughts.pop_front();
                }
                self.thoughts.push_back(p.thought.clone());
            }
            ExhibitEvent::ManifestPartial(p) => {
                self.partial = Some(p.partial.clone());
            }
            ExhibitEvent::ManifestReady(_) => {
                self.ready = true;
            }
            ExhibitEvent::Error(p) => {
                self.error = Some(p.message.clone());
            }
            _ => return false,
        }
        true
    }

    /// Consumes events until the manifest is ready or planning failed.
    ///
    /// Returns early if the channel closes.
    pub async fn follow(mut self, mut receiver: broadcast::Receiver<ExhibitEvent>) -> Self {
        while !self.is_finished() {
            match receiver.recv().await {
                Ok(event) => {
                    self.apply(&event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(run_id = %self.run_id, "Manifest listener lagged, missed {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(run_id = %self.run_id, "Event channel closed");
                    break;
                }
            }
        }
        self
    }

    /// Returns `true` once the manifest is ready or planning failed.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.ready || self.error.is_some()
    }

    /// Latest phase message.
    #[must_use]
    pub fn latest_progress(&self) -> Option<&str> {
        self.latest_progress.as_deref()
    }

    /// Retained thinking traces, oldest first.
    #[must_use]
    pub fn thoughts(&self) -> Vec<&str> {
        self.thoughts.iter().map(String::as_str).collect()
    }

    /// Latest speculative manifest.
    #[must_use]
    pub const fn partial(&self) -> Option<&Value> {
        self.partial.as_ref()
    }

    /// Planning failure, if one was reported.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

// ============================================================================
// Tests
// ============================================================================
