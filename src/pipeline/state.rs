use std::fmt;

use serde::{Deserialize, Serialize};

/// Stages of one frame-to-provider pipeline.
///
/// A fresh activity flows UPLOADING → PREPARING → RENDERING → DOWNLOADING and
/// ends in ACCEPTED, REJECTED or TIMED_OUT. A reused activity starts at
/// RENDERING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Uploading,
    Preparing,
    Rendering,
    Downloading,
    Accepted,
    Rejected,
    TimedOut,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Accepted | Stage::Rejected | Stage::TimedOut)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Uploading => write!(f, "UPLOADING"),
            Stage::Preparing => write!(f, "PREPARING"),
            Stage::Rendering => write!(f, "RENDERING"),
            Stage::Downloading => write!(f, "DOWNLOADING"),
            Stage::Accepted => write!(f, "ACCEPTED"),
            Stage::Rejected => write!(f, "REJECTED"),
            Stage::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Result of the remote step run in the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure,
}

/// Drives a pipeline through its stages and records the path taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMachine {
    stage: Stage,
    history: Vec<Stage>,
}

impl StageMachine {
    /// Pipeline on a newly created activity: starts by uploading the archive.
    pub fn fresh() -> Self {
        Self::starting_at(Stage::Uploading)
    }

    /// Pipeline on an activity that already holds the unpacked project.
    pub fn reused() -> Self {
        Self::starting_at(Stage::Rendering)
    }

    fn starting_at(stage: Stage) -> Self {
        Self {
            stage,
            history: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Stages left so far, in order, excluding the current one.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Computes and applies the next stage for the outcome of the current step.
    ///
    /// - Upload failure counts as a timeout.
    /// - Preparation and render outcomes are ignored; a provider that cannot
    ///   render shows up as a missing output at download.
    /// - The download alone decides acceptance.
    /// - Terminal stages never change.
    pub fn next(&mut self, outcome: StepOutcome) -> Stage {
        let next = match (self.stage, outcome) {
            (Stage::Uploading, StepOutcome::Success) => Stage::Preparing,
            (Stage::Uploading, StepOutcome::Failure) => Stage::TimedOut,
            (Stage::Preparing, _) => Stage::Rendering,
            (Stage::Rendering, _) => Stage::Downloading,
            (Stage::Downloading, StepOutcome::Success) => Stage::Accepted,
            (Stage::Downloading, StepOutcome::Failure) => Stage::Rejected,
            (terminal, _) => terminal,
        };
        self.move_to(next);
        next
    }

    /// The pipeline's time budget ran out in the current stage.
    pub fn time_out(&mut self) -> Stage {
        self.move_to(Stage::TimedOut);
        self.stage
    }

    fn move_to(&mut self, next: Stage) {
        if self.stage.is_terminal() || next == self.stage {
            return;
        }
        self.history.push(self.stage);
        self.stage = next;
    }
}
