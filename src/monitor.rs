use std::fmt;

use crate::market::ProviderId;
use crate::policy::Blacklist;
use crate::progress::{ProgressMessage, ProgressSender};
use crate::queue::FrameQueue;

/// Marketplace/runtime lifecycle events the engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Agreement signed and activity created on the provider.
    AgreementConfirmed { provider: ProviderId },
    /// Agreement or activity creation failed.
    ActivityCreateFailed { provider: ProviderId, reason: String },
    /// The frame's output was retrieved.
    TaskAccepted { frame: u32, provider: ProviderId },
    /// The frame's output was missing.
    TaskRejected { frame: u32, provider: ProviderId },
    /// The provider's worker ended abnormally (pipeline timeout, upload failure).
    WorkerFinished { provider: ProviderId, reason: String },
}

impl LifecycleEvent {
    pub fn provider(&self) -> &ProviderId {
        match self {
            LifecycleEvent::AgreementConfirmed { provider }
            | LifecycleEvent::ActivityCreateFailed { provider, .. }
            | LifecycleEvent::TaskAccepted { provider, .. }
            | LifecycleEvent::TaskRejected { provider, .. }
            | LifecycleEvent::WorkerFinished { provider, .. } => provider,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::AgreementConfirmed { .. } => write!(f, "AgreementConfirmed"),
            LifecycleEvent::ActivityCreateFailed { .. } => write!(f, "ActivityCreateFailed"),
            LifecycleEvent::TaskAccepted { .. } => write!(f, "TaskAccepted"),
            LifecycleEvent::TaskRejected { .. } => write!(f, "TaskRejected"),
            LifecycleEvent::WorkerFinished { .. } => write!(f, "WorkerFinished"),
        }
    }
}

/// Maps lifecycle events onto blacklist and queue mutations plus progress
/// messages. Holds nothing but the progress sender; the blacklist and queue
/// belong to the supervisor and are lent per event.
#[derive(Debug, Clone)]
pub struct EventMonitor {
    progress: ProgressSender,
}

impl EventMonitor {
    pub fn new(progress: ProgressSender) -> Self {
        Self { progress }
    }

    /// Applies one event. Repeating an event has no further effect: a provider
    /// is announced as removed once, a frame as finished once.
    pub fn handle(&self, event: LifecycleEvent, blacklist: &mut Blacklist, queue: &mut FrameQueue) {
        match event {
            LifecycleEvent::AgreementConfirmed { provider } => {
                tracing::info!(%provider, "Agreement confirmed");
                self.progress.send(ProgressMessage::AddProvider);
            }
            LifecycleEvent::TaskAccepted { frame, provider } => {
                if queue.mark_done(frame) {
                    tracing::info!(frame, %provider, "Frame accepted");
                    self.progress.send(ProgressMessage::FrameFinished);
                }
            }
            LifecycleEvent::ActivityCreateFailed { ref reason, .. }
            | LifecycleEvent::WorkerFinished { ref reason, .. } => {
                tracing::warn!(event = %event, provider = %event.provider(), reason = %reason, "Provider failed");
                self.exclude(event.provider().clone(), blacklist);
            }
            LifecycleEvent::TaskRejected { frame, ref provider } => {
                tracing::warn!(frame, %provider, "Frame rejected, output missing");
                self.exclude(provider.clone(), blacklist);
            }
        }
    }

    fn exclude(&self, provider: ProviderId, blacklist: &mut Blacklist) {
        if blacklist.insert(provider) {
            self.progress.send(ProgressMessage::RemoveProvider);
        }
    }
}
