//! Progress event streaming
//!
//! The lifecycle controller reports what it is doing as [`ProgressEvent`]s.
//! Events go through a [`ProgressTracker`] to whichever [`ProgressEmitter`]
//! the front end installed, such as a terminal spinner, or to nothing at all.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Global event ID counter for deterministic ordering
pub static EVENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Progress event types for the phases of a launch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    /// Cache refresh and workspace copy
    #[serde(rename = "workspace.prepare.begin")]
    WorkspacePrepareBegin {
        id: u64,
        timestamp: u64,
        spec: String,
    },
    #[serde(rename = "workspace.prepare.end")]
    WorkspacePrepareEnd {
        id: u64,
        timestamp: u64,
        spec: String,
        duration_ms: u64,
        success: bool,
    },

    /// Build tool invocation through container running
    #[serde(rename = "container.create.begin")]
    ContainerCreateBegin {
        id: u64,
        timestamp: u64,
        name: String,
        image: String,
    },
    #[serde(rename = "container.create.end")]
    ContainerCreateEnd {
        id: u64,
        timestamp: u64,
        name: String,
        duration_ms: u64,
        success: bool,
    },

    /// Existing running container kept as is
    #[serde(rename = "container.reuse")]
    ContainerReuse {
        id: u64,
        timestamp: u64,
        name: String,
    },

    /// Stopped container started again
    #[serde(rename = "container.start")]
    ContainerStart {
        id: u64,
        timestamp: u64,
        name: String,
    },

    /// Container removed before being recreated
    #[serde(rename = "container.remove")]
    ContainerRemove {
        id: u64,
        timestamp: u64,
        name: String,
        reason: String,
    },

    /// Workspace mount vanished and the environment is being rebuilt
    #[serde(rename = "container.recover")]
    ContainerRecover {
        id: u64,
        timestamp: u64,
        name: String,
    },
}

impl ProgressEvent {
    /// Unique identifier of this event
    pub fn id(&self) -> u64 {
        match self {
            ProgressEvent::WorkspacePrepareBegin { id, .. }
            | ProgressEvent::WorkspacePrepareEnd { id, .. }
            | ProgressEvent::ContainerCreateBegin { id, .. }
            | ProgressEvent::ContainerCreateEnd { id, .. }
            | ProgressEvent::ContainerReuse { id, .. }
            | ProgressEvent::ContainerStart { id, .. }
            | ProgressEvent::ContainerRemove { id, .. }
            | ProgressEvent::ContainerRecover { id, .. } => *id,
        }
    }

    /// Milliseconds since the Unix epoch
    pub fn timestamp(&self) -> u64 {
        match self {
            ProgressEvent::WorkspacePrepareBegin { timestamp, .. }
            | ProgressEvent::WorkspacePrepareEnd { timestamp, .. }
            | ProgressEvent::ContainerCreateBegin { timestamp, .. }
            | ProgressEvent::ContainerCreateEnd { timestamp, .. }
            | ProgressEvent::ContainerReuse { timestamp, .. }
            | ProgressEvent::ContainerStart { timestamp, .. }
            | ProgressEvent::ContainerRemove { timestamp, .. }
            | ProgressEvent::ContainerRecover { timestamp, .. } => *timestamp,
        }
    }
}

/// Trait for progress event emission
pub trait ProgressEmitter: Send + Sync + std::fmt::Debug {
    /// Emit a progress event
    fn emit(&mut self, event: &ProgressEvent) -> Result<()>;
}

/// Emitter that keeps every event in memory, for tests and summaries
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl ProgressEmitter for RecordingEmitter {
    fn emit(&mut self, event: &ProgressEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Routes events to an optional emitter
#[derive(Debug)]
pub struct ProgressTracker {
    emitter: Option<Box<dyn ProgressEmitter>>,
}

impl ProgressTracker {
    pub fn new(emitter: Option<Box<dyn ProgressEmitter>>) -> Self {
        Self { emitter }
    }

    /// Tracker that drops every event
    pub fn silent() -> Self {
        Self::new(None)
    }

    /// Forward `event`; emitter failures are logged, never fatal
    pub fn emit_event(&mut self, event: ProgressEvent) {
        if let Some(emitter) = self.emitter.as_mut() {
            if let Err(e) = emitter.emit(&event) {
                warn!("Failed to emit progress event: {}", e);
            }
        }
    }

    /// Drop the emitter, letting it clean up its terminal output
    pub fn finish(&mut self) {
        self.emitter = None;
    }

    /// Allocate the next event id
    pub fn next_event_id() -> u64 {
        EVENT_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
    }

    /// Current time in milliseconds since the Unix epoch
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::silent()
    }
}

/// Tracker shared between the front end and core operations
pub type SharedTracker = Arc<Mutex<ProgressTracker>>;

/// Emit through a shared tracker, tolerating a poisoned lock
pub fn emit(tracker: &SharedTracker, event: ProgressEvent) {
    tracker
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .emit_event(event);
}
