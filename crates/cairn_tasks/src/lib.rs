//! Action tracking boundary for the Cairn engine.
//!
//! Every node exposes an [`ActionDef`] describing what it does. The
//! orchestrator reports each node's progress (waiting, running, done) to an
//! [`ActionTracker`]. Tracking is for observability only: the engine behaves
//! identically with [`NullTracker`].

#![warn(missing_docs)]

pub mod action;
pub mod tracker;

pub use action::{ActionDef, ActionId};
pub use tracker::{ActionEvent, ActionTracker, LogTracker, NullTracker, Outcome, RecordingTracker};
