//! Progress Channel between the supervisor and its host.
//!
//! Messages are opaque tags, delivered FIFO with no acknowledgement. Inside the
//! worker they travel over an unbounded tokio channel; across the process
//! boundary each one is a JSON string on its own line of the worker's stdout.
//! [`JobStatus`] is the host's queryable view built from those messages.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMessage {
    FrameFinished,
    AddProvider,
    RemoveProvider,
}

impl ProgressMessage {
    /// One line of the worker's stdout protocol, without the newline.
    pub fn to_line(&self) -> String {
        format!("\"{}\"", self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

impl fmt::Display for ProgressMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressMessage::FrameFinished => write!(f, "frame_finished"),
            ProgressMessage::AddProvider => write!(f, "add_provider"),
            ProgressMessage::RemoveProvider => write!(f, "remove_provider"),
        }
    }
}

/// Sending half. Never blocks; sends after the host went away are dropped.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressMessage>,
}

impl ProgressSender {
    pub fn send(&self, message: ProgressMessage) {
        // A closed channel only means nobody listens any more.
        let _ = self.tx.send(message);
    }
}

/// Receiving half, polled without blocking.
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::UnboundedReceiver<ProgressMessage>,
}

impl ProgressReceiver {
    /// Next message if one is queued. An empty poll is the normal case.
    pub fn poll(&mut self) -> Option<ProgressMessage> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next message; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<ProgressMessage> {
        self.rx.recv().await
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<ProgressMessage> {
        std::iter::from_fn(|| self.poll()).collect()
    }
}

pub fn channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx }, ProgressReceiver { rx })
}

/// Where a job is in its life, as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Running,
    /// Every frame finished.
    Completed,
    /// The worker ended with frames still outstanding (global timeout or
    /// attempt limit).
    Incomplete,
    /// The worker exited with a non-zero code.
    Failed(i32),
    Cancelled,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Running => write!(f, "RUNNING"),
            JobPhase::Completed => write!(f, "COMPLETED"),
            JobPhase::Incomplete => write!(f, "INCOMPLETE"),
            JobPhase::Failed(code) => write!(f, "FAILED({code})"),
            JobPhase::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Queryable job status: phase, frame counts and live provider count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub total: usize,
    pub finished: usize,
    /// Providers confirmed minus providers removed.
    pub providers: i64,
}

impl JobStatus {
    pub fn new(total: usize) -> Self {
        Self {
            phase: JobPhase::Running,
            total,
            finished: 0,
            providers: 0,
        }
    }

    pub fn apply(&mut self, message: ProgressMessage) {
        match message {
            ProgressMessage::FrameFinished => {
                self.finished = (self.finished + 1).min(self.total);
                if self.finished == self.total && self.phase == JobPhase::Running {
                    self.phase = JobPhase::Completed;
                }
            }
            ProgressMessage::AddProvider => self.providers += 1,
            ProgressMessage::RemoveProvider => self.providers = (self.providers - 1).max(0),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.total - self.finished
    }

    /// Whole-number completion percentage.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.finished * 100 / self.total) as u8
    }

    pub fn is_running(&self) -> bool {
        self.phase == JobPhase::Running
    }

    /// Settles the phase once the worker process has exited.
    pub fn finish(&mut self, exit_code: Option<i32>) {
        if !self.is_running() && self.phase != JobPhase::Completed {
            return;
        }
        self.phase = match exit_code {
            Some(0) if self.finished == self.total => JobPhase::Completed,
            Some(0) => JobPhase::Incomplete,
            Some(code) => JobPhase::Failed(code),
            None => JobPhase::Failed(-1),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_a_json_string_per_line() {
        assert_eq!(ProgressMessage::FrameFinished.to_line(), r#""frame_finished""#);
        assert_eq!(
            ProgressMessage::from_line("\"remove_provider\"\n").unwrap(),
            ProgressMessage::RemoveProvider
        );
        assert!(ProgressMessage::from_line("\"bogus\"").is_err());
    }

    #[test]
    fn to_line_matches_serde() {
        for message in [
            ProgressMessage::FrameFinished,
            ProgressMessage::AddProvider,
            ProgressMessage::RemoveProvider,
        ] {
            assert_eq!(message.to_line(), serde_json::to_string(&message).unwrap());
        }
    }

    #[test]
    fn channel_is_fifo_and_empty_poll_is_none() {
        let (tx, mut rx) = channel();
        assert_eq!(rx.poll(), None);
        tx.send(ProgressMessage::AddProvider);
        tx.send(ProgressMessage::FrameFinished);
        assert_eq!(
            rx.drain(),
            vec![ProgressMessage::AddProvider, ProgressMessage::FrameFinished]
        );
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn send_after_receiver_dropped_does_not_panic() {
        let (tx, rx) = channel();
        drop(rx);
        tx.send(ProgressMessage::FrameFinished);
    }

    #[test]
    fn status_counts_frames_and_providers() {
        let mut status = JobStatus::new(4);
        status.apply(ProgressMessage::AddProvider);
        status.apply(ProgressMessage::AddProvider);
        status.apply(ProgressMessage::RemoveProvider);
        status.apply(ProgressMessage::FrameFinished);
        assert_eq!(status.providers, 1);
        assert_eq!(status.finished, 1);
        assert_eq!(status.outstanding(), 3);
        assert_eq!(status.percent(), 25);
        assert!(status.is_running());
    }

    #[test]
    fn status_completes_on_last_frame() {
        let mut status = JobStatus::new(2);
        status.apply(ProgressMessage::FrameFinished);
        status.apply(ProgressMessage::FrameFinished);
        assert_eq!(status.phase, JobPhase::Completed);
        assert_eq!(status.percent(), 100);
    }

    #[test]
    fn finish_classifies_exit() {
        let mut incomplete = JobStatus::new(10);
        incomplete.apply(ProgressMessage::FrameFinished);
        incomplete.finish(Some(0));
        assert_eq!(incomplete.phase, JobPhase::Incomplete);

        let mut failed = JobStatus::new(1);
        failed.finish(Some(4));
        assert_eq!(failed.phase, JobPhase::Failed(4));

        let mut cancelled = JobStatus::new(1);
        cancelled.phase = JobPhase::Cancelled;
        cancelled.finish(Some(0));
        assert_eq!(cancelled.phase, JobPhase::Cancelled);
    }

    #[test]
    fn provider_count_never_negative() {
        let mut status = JobStatus::new(1);
        status.apply(ProgressMessage::RemoveProvider);
        assert_eq!(status.providers, 0);
    }
}
