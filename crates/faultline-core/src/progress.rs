//! Phase progress events.
//!
//! The indexer and detector emit [`PhaseEvent`]s through a
//! [`ProgressReporter`]. The app crate provides the stderr and trace-file
//! reporters; [`NoProgress`] and [`CollectingProgress`] live here.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Index,
    Detect,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Index => "index",
            Phase::Detect => "detect",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PhaseEvent {
    Started {
        phase: Phase,
        total: usize,
    },
    /// One chunk finished; `cached` when the result came from the cache.
    ChunkDone {
        phase: Phase,
        chunk_id: String,
        n: usize,
        total: usize,
        cached: bool,
    },
    /// The model answered but no structured region was recoverable.
    Unparsed {
        phase: Phase,
        chunk_id: String,
    },
    /// A completed model call.
    Exchange {
        phase: Phase,
        chunk_id: String,
        prompt: String,
        response: String,
        duration_ms: u64,
    },
    Finished {
        phase: Phase,
        attempted: usize,
        reused: usize,
        unparsed: usize,
    },
}

/// Receives phase events. Implementations must not fail the run.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: PhaseEvent);
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: PhaseEvent) {}
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CollectingProgress {
    events: Mutex<Vec<PhaseEvent>>,
}

impl CollectingProgress {
    pub fn events(&self) -> Vec<PhaseEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressReporter for CollectingProgress {
    fn report(&self, event: PhaseEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Fans one event out to several reporters.
pub struct Tee(pub Vec<Box<dyn ProgressReporter>>);

impl ProgressReporter for Tee {
    fn report(&self, event: PhaseEvent) {
        for r in &self.0 {
            r.report(event.clone());
        }
    }
}
