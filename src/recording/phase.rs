//! Recording phase coordination
//!
//! Writing is coordinated across stream threads in three phases
//! (headers, streaming content, footers) so the chunks of the initial
//! streams land in the file in a properly sorted order. The barrier is
//! best-effort: both waits carry a timeout, after which the laggards are
//! tolerated and the file is flagged possibly unsorted by the caller.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
struct PhaseCounters {
    /// Streams that still need to write their header.
    headers_pending: u32,
    /// Streams that still need to finish the streaming phase.
    streaming_pending: u32,
}

pub(crate) struct PhaseCoordinator {
    counters: Mutex<PhaseCounters>,
    /// Signaled whenever a stream finishes its header.
    ready_for_streaming: Condvar,
    /// Signaled whenever a stream finishes streaming.
    ready_for_footers: Condvar,
}

impl PhaseCoordinator {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(PhaseCounters::default()),
            ready_for_streaming: Condvar::new(),
            ready_for_footers: Condvar::new(),
        }
    }

    /// Register a phase-locked stream as writing its header. Streams
    /// discovered after the recording started pass `locked = false` and
    /// bypass the barrier entirely.
    pub fn enter_headers(&self, locked: bool) {
        if !locked {
            return;
        }
        let mut counters = self.counters.lock().unwrap();
        counters.headers_pending += 1;
    }

    pub fn leave_headers(&self, locked: bool) {
        if !locked {
            return;
        }
        {
            let mut counters = self.counters.lock().unwrap();
            counters.headers_pending = counters.headers_pending.saturating_sub(1);
        }
        self.ready_for_streaming.notify_all();
    }

    /// Wait until every phase-locked stream has written its header, then
    /// register this stream as streaming. Returns `false` if the wait
    /// timed out before the headers completed.
    pub fn enter_streaming(&self, locked: bool, timeout: Duration) -> bool {
        if !locked {
            return true;
        }
        let counters = self.counters.lock().unwrap();
        let (mut counters, wait) = self
            .ready_for_streaming
            .wait_timeout_while(counters, timeout, |c| c.headers_pending > 0)
            .unwrap();
        counters.streaming_pending += 1;
        !wait.timed_out()
    }

    pub fn leave_streaming(&self, locked: bool) {
        if !locked {
            return;
        }
        {
            let mut counters = self.counters.lock().unwrap();
            counters.streaming_pending = counters.streaming_pending.saturating_sub(1);
        }
        self.ready_for_footers.notify_all();
    }

    /// Wait until every phase-locked stream has finished streaming.
    /// Returns `false` if the wait timed out first.
    pub fn enter_footers(&self, locked: bool, timeout: Duration) -> bool {
        if !locked {
            return true;
        }
        let counters = self.counters.lock().unwrap();
        let (_counters, wait) = self
            .ready_for_footers
            .wait_timeout_while(counters, timeout, |c| {
                c.headers_pending > 0 || c.streaming_pending > 0
            })
            .unwrap();
        !wait.timed_out()
    }

    /// Nothing to release after a footer.
    pub fn leave_footers(&self, _locked: bool) {}
}
