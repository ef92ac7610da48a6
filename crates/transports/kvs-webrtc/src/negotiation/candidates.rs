//! Remote candidates that arrived before the remote description

use crate::signaling::IceCandidate;

/// Append-only buffer drained once when the remote description is set
///
/// After [`flush`](PendingCandidates::flush) the buffer is sealed: later
/// candidates must be applied directly, and `push` hands them back.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Vec<(IceCandidate, Option<String>)>,
    flushed: bool,
}

impl PendingCandidates {
    /// Empty, unsealed buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `candidate` from `sender`
    ///
    /// Returns the candidate back if the buffer has already been flushed.
    pub fn push(
        &mut self,
        candidate: IceCandidate,
        sender: Option<String>,
    ) -> Option<(IceCandidate, Option<String>)> {
        if self.flushed {
            return Some((candidate, sender));
        }
        self.queue.push((candidate, sender));
        None
    }

    /// Take every buffered candidate in arrival order and seal the buffer
    ///
    /// A second call returns nothing.
    pub fn flush(&mut self) -> Vec<(IceCandidate, Option<String>)> {
        if self.flushed {
            return Vec::new();
        }
        self.flushed = true;
        std::mem::take(&mut self.queue)
    }

    /// Whether `flush` has run
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Number of buffered candidates
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop everything buffered (teardown)
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
