use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::commands;
use super::state::{Stage, StageMachine, StepOutcome};
use crate::config::{JobConfig, OutputFormat};
use crate::market::{Activity, MarketError, ProviderId};

/// What every pipeline of a job renders and where the results go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPlan {
    pub scene: String,
    pub format: OutputFormat,
    pub output_dir: PathBuf,
    pub archive: PathBuf,
}

impl RenderPlan {
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            scene: config.scene.clone(),
            format: config.settings.format,
            output_dir: config.output_dir.clone(),
            archive: config.archive_path(),
        }
    }

    /// Local destination of a downloaded frame.
    pub fn frame_path(&self, frame: u32) -> PathBuf {
        self.output_dir
            .join(commands::frame_file_name(frame, self.format))
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub frame: u32,
    pub provider: ProviderId,
    /// Terminal stage reached.
    pub stage: Stage,
    pub history: Vec<Stage>,
    #[serde(skip)]
    pub elapsed: Duration,
    /// Error that decided a non-accepted outcome, if any.
    pub error: Option<String>,
}

impl PipelineReport {
    pub fn is_accepted(&self) -> bool {
        self.stage == Stage::Accepted
    }
}

/// Runs one frame through the remote stages on one activity.
pub struct PipelineExecutor<'a, A> {
    activity: &'a A,
    plan: &'a RenderPlan,
}

impl<'a, A: Activity> PipelineExecutor<'a, A> {
    pub fn new(activity: &'a A, plan: &'a RenderPlan) -> Self {
        Self { activity, plan }
    }

    /// Drives `machine` to a terminal stage within `limit`.
    ///
    /// When the limit expires the remote step in progress is dropped and the
    /// pipeline ends TIMED_OUT from whatever stage it was in.
    pub async fn run(&self, frame: u32, mut machine: StageMachine, limit: Duration) -> PipelineReport {
        let started = Instant::now();
        let provider = self.activity.provider_id().clone();
        let mut error = None;

        let finished = tokio::time::timeout(limit, self.drive(frame, &mut machine, &mut error)).await;
        if finished.is_err() {
            tracing::warn!(
                frame,
                %provider,
                stage = %machine.stage(),
                limit_secs = limit.as_secs(),
                "Pipeline timed out"
            );
            machine.time_out();
            error = Some(format!("timed out after {}s", limit.as_secs()));
        }

        PipelineReport {
            frame,
            provider,
            stage: machine.stage(),
            history: machine.history().to_vec(),
            elapsed: started.elapsed(),
            error,
        }
    }

    async fn drive(&self, frame: u32, machine: &mut StageMachine, error: &mut Option<String>) {
        while !machine.stage().is_terminal() {
            let stage = machine.stage();
            tracing::debug!(frame, provider = %self.activity.provider_id(), %stage, "Pipeline stage");

            let outcome = match stage {
                Stage::Uploading => {
                    record(self.activity.upload(&self.plan.archive, commands::REMOTE_ARCHIVE).await, error)
                }
                Stage::Preparing => {
                    let mut outcome = StepOutcome::Success;
                    for script in commands::prepare() {
                        if self.run_script(&script).await == StepOutcome::Failure {
                            outcome = StepOutcome::Failure;
                        }
                    }
                    outcome
                }
                Stage::Rendering => {
                    let script = commands::render(&self.plan.scene, self.plan.format, frame);
                    self.run_script(&script).await
                }
                Stage::Downloading => {
                    let remote = commands::remote_frame_path(frame, self.plan.format);
                    let local = self.plan.frame_path(frame);
                    record(self.download(&remote, &local).await, error)
                }
                Stage::Accepted | Stage::Rejected | Stage::TimedOut => break,
            };

            machine.next(outcome);
        }
    }

    // Exit status is logged only; it never decides the outcome.
    async fn run_script(&self, script: &str) -> StepOutcome {
        match self.activity.run(script).await {
            Ok(output) if output.success() => StepOutcome::Success,
            Ok(output) => {
                tracing::debug!(
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "Remote command failed"
                );
                StepOutcome::Failure
            }
            Err(e) => {
                tracing::debug!(error = %e, "Remote command not executed");
                StepOutcome::Failure
            }
        }
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), MarketError> {
        self.activity.download(remote, local).await?;
        tracing::info!(path = %local.display(), "Frame downloaded");
        Ok(())
    }
}

fn record(result: Result<(), MarketError>, error: &mut Option<String>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Success,
        Err(e) => {
            *error = Some(e.to_string());
            StepOutcome::Failure
        }
    }
}
