//! Transport handle pool.
//!
//! Handles are created lazily, one per concurrently in-flight call, and
//! reused once idle. Ids are indices into the pool and stay stable for the
//! pool's lifetime. Single-threaded: owned by one channel behind a `RefCell`.

use crate::multiplexer::{HandleId, TransportFailure};

/// Per-call bookkeeping for one pooled transfer.
#[derive(Debug, Default)]
pub(crate) struct TransportHandle {
    /// The multiplexer reported this transfer finished while another handle
    /// was being waited on.
    pub response_ready: bool,
    /// A call is bound to this handle and has not been collected yet.
    pub in_progress: bool,
    /// The multiplexer refused the transfer at send time.
    pub enqueue_failure: Option<TransportFailure>,
}

#[derive(Debug, Default)]
pub(crate) struct HandlePool {
    handles: Vec<TransportHandle>,
}

impl HandlePool {
    /// Claim the first idle handle, or a newly appended one, marking it in
    /// progress with no cached readiness.
    pub fn acquire(&mut self) -> HandleId {
        let id = match self.handles.iter().position(|h| !h.in_progress) {
            Some(id) => id,
            None => {
                self.handles.push(TransportHandle::default());
                self.handles.len() - 1
            }
        };
        let handle = &mut self.handles[id];
        handle.in_progress = true;
        handle.response_ready = false;
        handle.enqueue_failure = None;
        id
    }

    /// Return `id` to the idle set.
    pub fn release(&mut self, id: HandleId) {
        if let Some(handle) = self.handles.get_mut(id) {
            handle.in_progress = false;
            handle.response_ready = false;
            handle.enqueue_failure = None;
        }
    }

    pub fn get(&self, id: HandleId) -> Option<&TransportHandle> {
        self.handles.get(id)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut TransportHandle> {
        self.handles.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn in_flight(&self) -> usize {
        self.handles.iter().filter(|h| h.in_progress).count()
    }
}
