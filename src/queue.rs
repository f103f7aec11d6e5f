use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Lifecycle status of one frame task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameStatus {
    Pending,
    Assigned,
    /// Failed on some provider; waiting to be reassigned (or abandoned when
    /// the attempt limit is reached).
    Rejected,
    Done,
}

/// One unit of work: render a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameTask {
    pub frame: u32,
    pub status: FrameStatus,
    pub attempts: u32,
}

/// Outstanding frame tasks of a job.
///
/// Every frame stays in the table until it is marked done, so whatever is
/// not done at job end is reported as outstanding.
#[derive(Debug, Default)]
pub struct FrameQueue {
    tasks: BTreeMap<u32, FrameTask>,
    pending: VecDeque<u32>,
}

impl FrameQueue {
    /// Builds the queue from the caller's frame list. Duplicates collapse
    /// into one task; order of first appearance is kept.
    pub fn new(frames: &[u32]) -> Self {
        let mut queue = Self::default();
        for &frame in frames {
            if queue.tasks.contains_key(&frame) {
                continue;
            }
            queue.tasks.insert(
                frame,
                FrameTask {
                    frame,
                    status: FrameStatus::Pending,
                    attempts: 0,
                },
            );
            queue.pending.push_back(frame);
        }
        queue
    }

    /// Removes and returns some pending frame, marking it assigned.
    pub fn take(&mut self) -> Option<u32> {
        let frame = self.pending.pop_front()?;
        if let Some(task) = self.tasks.get_mut(&frame) {
            task.status = FrameStatus::Assigned;
            task.attempts += 1;
        }
        Some(frame)
    }

    /// Puts a failed frame back for reassignment. Done or unknown frames are
    /// ignored.
    pub fn requeue(&mut self, frame: u32) {
        let Some(task) = self.tasks.get_mut(&frame) else {
            return;
        };
        if task.status == FrameStatus::Done || self.pending.contains(&frame) {
            return;
        }
        task.status = FrameStatus::Rejected;
        self.pending.push_back(frame);
    }

    /// Marks a frame failed without queuing it again.
    pub fn abandon(&mut self, frame: u32) {
        if let Some(task) = self.tasks.get_mut(&frame) {
            if task.status != FrameStatus::Done {
                task.status = FrameStatus::Rejected;
            }
        }
    }

    /// Marks a frame done. Returns `true` only the first time.
    pub fn mark_done(&mut self, frame: u32) -> bool {
        let Some(task) = self.tasks.get_mut(&frame) else {
            return false;
        };
        if task.status == FrameStatus::Done {
            return false;
        }
        task.status = FrameStatus::Done;
        self.pending.retain(|&f| f != frame);
        true
    }

    /// No frame is outstanding.
    pub fn is_empty(&self) -> bool {
        self.outstanding_len() == 0
    }

    /// Some frame is waiting for a provider.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn outstanding_len(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status != FrameStatus::Done)
            .count()
    }

    /// Frames not yet done, ascending.
    pub fn outstanding(&self) -> Vec<u32> {
        self.tasks
            .values()
            .filter(|t| t.status != FrameStatus::Done)
            .map(|t| t.frame)
            .collect()
    }

    /// Frames done, ascending.
    pub fn finished(&self) -> Vec<u32> {
        self.tasks
            .values()
            .filter(|t| t.status == FrameStatus::Done)
            .map(|t| t.frame)
            .collect()
    }

    pub fn task(&self, frame: u32) -> Option<&FrameTask> {
        self.tasks.get(&frame)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_every_frame_once() {
        let mut queue = FrameQueue::new(&[3, 1, 2]);
        let mut taken = Vec::new();
        while let Some(frame) = queue.take() {
            taken.push(frame);
        }
        assert_eq!(taken, vec![3, 1, 2]);
        assert!(!queue.has_pending());
        assert!(!queue.is_empty());
        assert_eq!(queue.outstanding(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicates_collapse() {
        let queue = FrameQueue::new(&[5, 5, 6]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn requeue_makes_frame_pending_again() {
        let mut queue = FrameQueue::new(&[7]);
        assert_eq!(queue.take(), Some(7));
        queue.requeue(7);
        assert_eq!(queue.task(7).unwrap().status, FrameStatus::Rejected);
        assert_eq!(queue.take(), Some(7));
        assert_eq!(queue.task(7).unwrap().attempts, 2);
    }

    #[test]
    fn requeue_ignores_done_and_already_pending() {
        let mut queue = FrameQueue::new(&[1, 2]);
        queue.take();
        assert!(queue.mark_done(1));
        queue.requeue(1);
        queue.requeue(2);
        assert_eq!(queue.take(), Some(2));
        assert_eq!(queue.take(), None);
    }

    #[test]
    fn mark_done_is_idempotent() {
        let mut queue = FrameQueue::new(&[4]);
        queue.take();
        assert!(queue.mark_done(4));
        assert!(!queue.mark_done(4));
        assert!(!queue.mark_done(99));
        assert!(queue.is_empty());
        assert_eq!(queue.finished(), vec![4]);
    }

    #[test]
    fn abandoned_frame_stays_outstanding() {
        let mut queue = FrameQueue::new(&[8, 9]);
        queue.take();
        queue.abandon(8);
        assert_eq!(queue.outstanding(), vec![8, 9]);
        assert_eq!(queue.take(), Some(9));
        assert_eq!(queue.take(), None);
    }

    #[test]
    fn empty_frame_list_is_complete() {
        let queue = FrameQueue::new(&[]);
        assert!(queue.is_empty());
        assert!(!queue.has_pending());
    }
}
