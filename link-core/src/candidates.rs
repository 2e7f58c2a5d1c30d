//! Pending remote ICE candidates.
//!
//! Candidates can arrive before the remote description they belong to. They
//! wait here, in arrival order, until a remote description exists.

use link_types::IceCandidate;
use std::collections::VecDeque;

/// FIFO of remote candidates not yet applied.
#[derive(Debug, Clone, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a candidate behind any already waiting.
    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Put back a candidate the transport rejected. It waits for the next
    /// remote description.
    pub fn requeue(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Take every queued candidate, oldest first.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of queued candidates.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
