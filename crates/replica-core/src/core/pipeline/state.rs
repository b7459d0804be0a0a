use std::fmt;
use std::time::Instant;

use serde::Serialize;

/// Orchestrator state. `Done` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Extracting,
    Injecting,
    Building,
    Signing,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Next stage on the success path; terminal stages have none.
    pub(crate) fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Extracting),
            Self::Extracting => Some(Self::Injecting),
            Self::Injecting => Some(Self::Building),
            Self::Building => Some(Self::Signing),
            Self::Signing => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Injecting => "injecting",
            Self::Building => "building",
            Self::Signing => "signing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current stage and refuses transitions out of a terminal one.
///
/// With timings on, the wall time of every stage is logged as it is left,
/// and the whole run once a terminal stage is reached.
#[derive(Debug)]
pub(crate) struct StageTracker {
    current: Stage,
    visited: Vec<Stage>,
    timings: bool,
    started: Instant,
    entered: Instant,
}

impl StageTracker {
    pub(crate) fn with_timings(timings: bool) -> Self {
        let now = Instant::now();
        Self {
            current: Stage::Idle,
            visited: vec![Stage::Idle],
            timings,
            started: now,
            entered: now,
        }
    }

    pub(crate) fn current(&self) -> Stage {
        self.current
    }

    /// Moves to `stage`, which must be the successor of the current stage.
    pub(crate) fn advance(&mut self, stage: Stage) {
        debug_assert_eq!(self.current.next(), Some(stage), "out-of-order stage");
        if self.current.is_terminal() {
            return;
        }
        tracing::info!(stage = %stage, "pipeline stage");
        self.enter(stage);
    }

    pub(crate) fn fail(&mut self) {
        if self.current.is_terminal() {
            return;
        }
        self.enter(Stage::Failed);
    }

    fn enter(&mut self, stage: Stage) {
        if self.timings {
            tracing::info!(
                stage = %self.current,
                elapsed_ms = millis(self.entered),
                "stage timing"
            );
            if stage.is_terminal() {
                tracing::info!(outcome = %stage, elapsed_ms = millis(self.started), "pipeline timing");
            }
        }
        self.entered = Instant::now();
        self.current = stage;
        self.visited.push(stage);
    }

    pub(crate) fn visited(&self) -> &[Stage] {
        &self.visited
    }
}

fn millis(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
