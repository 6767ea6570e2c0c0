//! Recording engine
//!
//! [`RecordingEngine`] owns a recording from construction to teardown:
//! it opens the output writer, spawns one thread per initial stream, one
//! resolver thread per watch query and one boundary thread, and on drop
//! signals shutdown and joins everything with a bounded wait. Threads
//! that miss the deadline are detached with a warning rather than
//! blocking teardown.

mod boundary;
mod offsets;
mod phase;
mod recorder;
mod resolver;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::{OutputFormat, RecordingConfig};
use crate::error::Result;
use crate::source::{StreamInfo, StreamSource};
use crate::writer::StreamWriter;

use phase::PhaseCoordinator;

/// One clock-offset measurement, kept in memory for the stream footer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockOffset {
    /// Estimated collection time on the sender's clock.
    pub collection_time: f64,
    /// Offset between the sender clock and the local clock.
    pub offset: f64,
}

/// Lifecycle state of one recorded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Headers,
    Streaming,
    Footers,
    Done,
    Failed,
}

/// State shared by every thread of a recording.
pub(crate) struct RecordingShared {
    pub writer: StreamWriter,
    pub source: Arc<dyn StreamSource>,
    pub config: RecordingConfig,
    pub phase: PhaseCoordinator,
    shutdown: AtomicBool,
    /// Set when a late stream was admitted or a phase wait timed out;
    /// readers may then encounter out-of-order stream headers.
    unsorted: AtomicBool,
    /// Highest stream id handed out so far.
    next_stream_id: AtomicU32,
    /// Collected clock offsets per stream, read once per footer.
    pub offsets: Mutex<HashMap<u32, Vec<ClockOffset>>>,
    states: Mutex<HashMap<u32, StreamState>>,
}

impl RecordingShared {
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Allocate a fresh stream id. Ids start at 1 and are never reused.
    pub fn fresh_stream_id(&self) -> u32 {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn mark_unsorted(&self) {
        self.unsorted.store(true, Ordering::Relaxed);
    }

    pub fn set_state(&self, stream_id: u32, state: StreamState) {
        self.states.lock().unwrap().insert(stream_id, state);
    }
}

/// A recording in progress.
///
/// Recording starts when the engine is constructed and stops when it is
/// dropped (or [`RecordingEngine::stop`] is called).
pub struct RecordingEngine {
    shared: Arc<RecordingShared>,
    stream_threads: Vec<JoinHandle<()>>,
    boundary_thread: Option<JoinHandle<()>>,
}

impl RecordingEngine {
    /// Open the output and spawn the recording threads: one per initial
    /// stream (phase-locked), one per watch query, and the boundary
    /// writer. Failure to open the output is fatal; no recording begins.
    pub fn start(
        source: Arc<dyn StreamSource>,
        output: &Path,
        format: OutputFormat,
        streams: Vec<StreamInfo>,
        watch_queries: Vec<String>,
        config: RecordingConfig,
    ) -> Result<Self> {
        let writer = StreamWriter::create(output, format)?;
        info!("recording to {}", output.display());

        let shared = Arc::new(RecordingShared {
            writer,
            source,
            config,
            phase: PhaseCoordinator::new(),
            shutdown: AtomicBool::new(false),
            unsorted: AtomicBool::new(false),
            next_stream_id: AtomicU32::new(0),
            offsets: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        });

        let mut stream_threads = Vec::new();
        for info in streams {
            let shared = Arc::clone(&shared);
            stream_threads.push(std::thread::spawn(move || {
                recorder::run(&shared, info, true);
            }));
        }
        for query in watch_queries {
            let shared = Arc::clone(&shared);
            stream_threads.push(std::thread::spawn(move || {
                resolver::run(&shared, &query);
            }));
        }
        let boundary_thread = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || boundary::run(&shared))
        };

        Ok(Self {
            shared,
            stream_threads,
            boundary_thread: Some(boundary_thread),
        })
    }

    /// Whether the output may contain out-of-order stream headers (a
    /// late-joining stream was admitted, or a phase wait timed out).
    pub fn unsorted(&self) -> bool {
        self.shared.unsorted.load(Ordering::Relaxed)
    }

    /// Current lifecycle state of every stream seen so far.
    pub fn stream_states(&self) -> HashMap<u32, StreamState> {
        self.shared.states.lock().unwrap().clone()
    }

    /// Stop the recording and close the output.
    pub fn stop(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.stream_threads.is_empty() && self.boundary_thread.is_none() {
            return;
        }
        // From now on no more new streams.
        self.shared.shutdown.store(true, Ordering::Release);

        let handles = std::mem::take(&mut self.stream_threads);
        join_all_timed(handles, self.shared.config.max_join_wait, "stream");

        if let Some(handle) = self.boundary_thread.take() {
            let deadline = self.shared.config.max_join_wait + self.shared.config.boundary_interval;
            if !join_one_timed(handle, deadline) {
                error!("boundary thread did not finish in time; detaching it");
            }
        }

        info!("closing the output file(s)");
        if let Err(e) = self.shared.writer.close() {
            error!("error while closing the recording: {e}");
        }
    }
}

impl Drop for RecordingEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

const JOIN_POLL: Duration = Duration::from_millis(50);

/// Join all handles, giving the whole batch up to `deadline`; handles
/// still running afterwards are dropped (detached) with a warning.
pub(crate) fn join_all_timed(mut handles: Vec<JoinHandle<()>>, deadline: Duration, what: &str) {
    let start = Instant::now();
    loop {
        let mut remaining = Vec::with_capacity(handles.len());
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                remaining.push(handle);
            }
        }
        handles = remaining;
        if handles.is_empty() || start.elapsed() >= deadline {
            break;
        }
        std::thread::sleep(JOIN_POLL);
    }
    if !handles.is_empty() {
        warn!("{} {what} threads still running; detaching them", handles.len());
    }
}

/// Join one handle within `deadline`. Returns `false` (and drops the
/// handle, detaching the thread) when the deadline passes first.
pub(crate) fn join_one_timed(handle: JoinHandle<()>, deadline: Duration) -> bool {
    let start = Instant::now();
    while !handle.is_finished() {
        if start.elapsed() >= deadline {
            return false;
        }
        std::thread::sleep(JOIN_POLL);
    }
    let _ = handle.join();
    true
}
