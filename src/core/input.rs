//! Input queue and blocked-on-stdin detection
//!
//! The child never says it is waiting for input. A stdout probe that times
//! out is taken as a tentative input request, and [`InputDetector`] is the
//! single place that decides what to do about it. A slow computation that is
//! silent for longer than the probe timeout looks exactly like a blocked
//! read; queued input may then be delivered early.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// FIFO of input lines, shared between the transport and a run
#[derive(Debug, Clone, Default)]
pub struct InputQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value; it is consumed the next time the child looks blocked
    pub fn push(&self, value: impl Into<String>) {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_back(value.into());
    }

    pub fn pop(&self) -> Option<String> {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or_else(|e| e.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What to do after a probe timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeDecision {
    /// Write this queued value to the child's stdin
    Deliver(String),
    /// Tell the client the child is waiting
    Signal,
    /// Already signalled for this waiting streak
    Suppress,
}

/// Waiting-streak state for one run
#[derive(Debug, Default)]
pub struct InputDetector {
    signaled: bool,
}

impl InputDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The child produced output, so any waiting streak is over
    pub fn on_output(&mut self) {
        self.signaled = false;
    }

    /// The stdout probe timed out
    pub fn on_timeout(&mut self, queue: &InputQueue) -> ProbeDecision {
        if let Some(value) = queue.pop() {
            // delivering input ends the streak; a later block is a new request
            self.signaled = false;
            return ProbeDecision::Deliver(value);
        }
        if self.signaled {
            ProbeDecision::Suppress
        } else {
            self.signaled = true;
            ProbeDecision::Signal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo_across_clones() {
        let queue = InputQueue::new();
        let handle = queue.clone();
        handle.push("first");
        handle.push("second");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().as_deref(), Some("first"));
        assert_eq!(queue.pop().as_deref(), Some("second"));
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_queued_input_suppresses_signal() {
        let queue = InputQueue::new();
        queue.push("Ada");
        let mut detector = InputDetector::new();
        assert_eq!(detector.on_timeout(&queue), ProbeDecision::Deliver("Ada".into()));
        assert!(!detector.signaled);
    }

    #[test]
    fn test_signal_once_per_streak() {
        let queue = InputQueue::new();
        let mut detector = InputDetector::new();
        assert_eq!(detector.on_timeout(&queue), ProbeDecision::Signal);
        assert_eq!(detector.on_timeout(&queue), ProbeDecision::Suppress);
        assert_eq!(detector.on_timeout(&queue), ProbeDecision::Suppress);

        detector.on_output();
        assert_eq!(detector.on_timeout(&queue), ProbeDecision::Signal);
    }

    #[test]
    fn test_input_after_signal_is_delivered() {
        let queue = InputQueue::new();
        let mut detector = InputDetector::new();
        assert_eq!(detector.on_timeout(&queue), ProbeDecision::Signal);

        queue.push("late");
        assert_eq!(detector.on_timeout(&queue), ProbeDecision::Deliver("late".into()));
        // next block without input is signalled again
        assert_eq!(detector.on_timeout(&queue), ProbeDecision::Signal);
    }
}
