//! Boundary marker thread
//!
//! Writes a boundary chunk at a fixed cadence so a reader can resynchronize
//! after file corruption. The thread polls the shutdown flag between short
//! sleeps rather than sleeping the whole interval at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::error;

use crate::error::Result;

use super::RecordingShared;

const POLL: Duration = Duration::from_millis(500);

pub(crate) fn run(shared: &Arc<RecordingShared>) {
    if let Err(e) = emit(shared) {
        error!("error in the boundary thread: {e}");
    }
}

fn emit(shared: &Arc<RecordingShared>) -> Result<()> {
    let interval = shared.config.boundary_interval;
    let poll = POLL.min(interval);
    let mut next_boundary = Instant::now() + interval;
    while !shared.is_shutdown() {
        std::thread::sleep(poll);
        if Instant::now() > next_boundary {
            shared.writer.write_boundary_chunk()?;
            next_boundary = Instant::now() + interval;
        }
    }
    Ok(())
}
