//! Trackers receiving action state transitions from the orchestrator.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::action::{ActionDef, ActionId};

/// How a tracked action finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The output was loaded from the cache; compute did not run.
    CacheHit,
    /// Compute ran and succeeded.
    Computed,
    /// The action (or one of its dependencies) failed.
    Failed(String),
    /// The action was cancelled before it finished.
    Cancelled,
}

/// Receives progress notifications for every node the orchestrator runs.
///
/// Implementations must be cheap and must never fail: tracking is purely
/// observational.
pub trait ActionTracker: Send + Sync {
    /// A node was dispatched and is waiting on its dependencies.
    fn waiting(&self, id: ActionId, def: &ActionDef);

    /// A node's dependencies are resolved and its own work started.
    fn running(&self, id: ActionId);

    /// A node finished.
    fn done(&self, id: ActionId, outcome: &Outcome);
}

/// A tracker that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl ActionTracker for NullTracker {
    fn waiting(&self, _id: ActionId, _def: &ActionDef) {}

    fn running(&self, _id: ActionId) {}

    fn done(&self, _id: ActionId, _outcome: &Outcome) {}
}

/// A tracker that reports transitions through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracker;

impl ActionTracker for LogTracker {
    fn waiting(&self, id: ActionId, def: &ActionDef) {
        debug!(%id, action = %def, "waiting");
    }

    fn running(&self, id: ActionId) {
        debug!(%id, "running");
    }

    fn done(&self, id: ActionId, outcome: &Outcome) {
        match outcome {
            Outcome::CacheHit => info!(%id, "cached"),
            Outcome::Computed => info!(%id, "done"),
            Outcome::Failed(reason) => warn!(%id, %reason, "failed"),
            Outcome::Cancelled => debug!(%id, "cancelled"),
        }
    }
}

/// One transition observed by a [`RecordingTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    /// See [`ActionTracker::waiting`].
    Waiting(ActionId, String),
    /// See [`ActionTracker::running`].
    Running(ActionId),
    /// See [`ActionTracker::done`].
    Done(ActionId, Outcome),
}

/// A tracker that keeps every transition in memory, for inspection.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    events: Mutex<Vec<ActionEvent>>,
}

impl RecordingTracker {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded transitions.
    pub fn events(&self) -> Vec<ActionEvent> {
        self.events.lock().clone()
    }

    /// Returns the outcomes recorded for actions with the given label.
    pub fn outcomes_for(&self, label: &str) -> Vec<Outcome> {
        let events = self.events.lock();
        let ids: Vec<ActionId> = events
            .iter()
            .filter_map(|e| match e {
                ActionEvent::Waiting(id, l) if l == label => Some(*id),
                _ => None,
            })
            .collect();
        events
            .iter()
            .filter_map(|e| match e {
                ActionEvent::Done(id, outcome) if ids.contains(id) => Some(outcome.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ActionEvent) {
        self.events.lock().push(event);
    }
}

impl ActionTracker for RecordingTracker {
    fn waiting(&self, id: ActionId, def: &ActionDef) {
        self.push(ActionEvent::Waiting(id, def.label.clone()));
    }

    fn running(&self, id: ActionId) {
        self.push(ActionEvent::Running(id));
    }

    fn done(&self, id: ActionId, outcome: &Outcome) {
        self.push(ActionEvent::Done(id, outcome.clone()));
    }
}
