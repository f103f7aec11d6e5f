//! Host side of the process boundary.
//!
//! The supervisor runs in a child worker process so a stalled network call
//! or a crash cannot freeze the host. [`JobHandle`] spawns that process,
//! hands it the job configuration as JSON on stdin and turns its stdout
//! lines back into progress messages.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::config::JobConfig;
use crate::error::FarmError;
use crate::progress::{
    self, JobPhase, JobStatus, ProgressMessage, ProgressReceiver, ProgressSender,
};

/// Program and arguments that start a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// This executable's hidden `worker` subcommand.
    pub fn current_exe() -> Result<Self, FarmError> {
        Ok(Self::new(std::env::current_exe()?, ["worker"]))
    }
}

/// A running job as seen from the host.
pub struct JobHandle {
    child: Child,
    reader: JoinHandle<()>,
    progress: Option<ProgressReceiver>,
    status: JobStatus,
    settled: bool,
}

impl JobHandle {
    /// Spawns the worker and sends it `config`. Returns once the config is
    /// written; the job itself runs in the child.
    pub async fn start(command: &WorkerCommand, config: &JobConfig) -> Result<Self, FarmError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let payload = serde_json::to_vec(config)?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| FarmError::Worker("worker stdin not captured".into()))?;
        stdin.write_all(&payload).await?;
        stdin.shutdown().await?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FarmError::Worker("worker stdout not captured".into()))?;
        let (tx, rx) = progress::channel();
        let reader = tokio::spawn(read_progress(stdout, tx));

        tracing::info!(
            job_id = %config.job_id,
            pid = child.id(),
            frames = config.frames.len(),
            "Worker started"
        );

        Ok(Self {
            child,
            reader,
            progress: Some(rx),
            status: JobStatus::new(distinct_frames(&config.frames)),
            settled: false,
        })
    }

    /// Applies every message received since the last call and returns them.
    /// Empty most of the time; never blocks.
    pub fn poll(&mut self) -> Vec<ProgressMessage> {
        let Some(rx) = self.progress.as_mut() else {
            return Vec::new();
        };
        let messages = rx.drain();
        for message in &messages {
            self.status.apply(*message);
        }
        messages
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    /// Final phase once the worker has exited and its output is fully read,
    /// `None` while it is still running.
    pub fn try_exit(&mut self) -> Result<Option<JobPhase>, FarmError> {
        if self.settled {
            return Ok(Some(self.status.phase));
        }
        let Some(exit) = self.child.try_wait()? else {
            return Ok(None);
        };
        if !self.reader.is_finished() {
            return Ok(None);
        }
        self.settle(exit.code());
        Ok(Some(self.status.phase))
    }

    /// Waits for the worker to exit on its own.
    pub async fn wait(&mut self) -> Result<JobStatus, FarmError> {
        if !self.settled {
            let exit = self.child.wait().await?;
            if let Err(e) = (&mut self.reader).await {
                tracing::debug!(error = %e, "Progress reader ended abnormally");
            }
            self.settle(exit.code());
        }
        Ok(self.status.clone())
    }

    /// Kills the worker. In-flight remote work is abandoned and no further
    /// progress is delivered.
    pub async fn cancel(&mut self) -> Result<(), FarmError> {
        if self.settled {
            return Ok(());
        }
        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        self.reader.abort();
        self.progress = None;
        self.status.phase = JobPhase::Cancelled;
        self.settled = true;
        tracing::warn!(
            finished = self.status.finished,
            outstanding = self.status.outstanding(),
            "Job cancelled"
        );
        Ok(())
    }

    fn settle(&mut self, code: Option<i32>) {
        self.poll();
        self.status.finish(code);
        self.settled = true;
        match code {
            Some(0) | None => {}
            Some(code) => tracing::error!(code, reason = FarmError::describe_exit_code(code), "Worker failed"),
        }
    }
}

fn distinct_frames(frames: &[u32]) -> usize {
    let mut frames = frames.to_vec();
    frames.sort_unstable();
    frames.dedup();
    frames.len()
}

async fn read_progress(stdout: ChildStdout, tx: ProgressSender) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match ProgressMessage::from_line(&line) {
                Ok(message) => tx.send(message),
                Err(_) => tracing::debug!(%line, "Ignoring non-progress output"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read worker output");
                break;
            }
        }
    }
}

/// Worker side: writes every progress message as one line on `out` until
/// all senders are gone.
pub async fn write_progress<W>(mut rx: ProgressReceiver, mut out: W) -> Result<(), FarmError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = format!("{}\n", message.to_line());
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}
