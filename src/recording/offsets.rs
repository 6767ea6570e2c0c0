//! Clock-offset probe thread
//!
//! One probe per stream, running only while offset collection is enabled.
//! Each measurement is written as a chunk and appended to the stream's
//! in-memory list for the footer. A timeout from the backend skips the
//! measurement; any other error ends the probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::source::StreamInlet;

use super::{ClockOffset, RecordingShared};

/// Upper bound on one time-correction query.
const TIME_CORRECTION_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(2500);

pub(crate) fn run(
    shared: &Arc<RecordingShared>,
    stream_id: u32,
    inlet: Arc<dyn StreamInlet>,
    stop: &AtomicBool,
) {
    if let Err(e) = collect(shared, stream_id, &inlet, stop) {
        error!("error in the offsets thread for stream {stream_id}: {e}");
    }
    debug!("offsets thread for stream {stream_id} finished");
}

fn collect(
    shared: &Arc<RecordingShared>,
    stream_id: u32,
    inlet: &Arc<dyn StreamInlet>,
    stop: &AtomicBool,
) -> Result<()> {
    while !shared.is_shutdown() && !stop.load(Ordering::Relaxed) {
        std::thread::sleep(shared.config.offset_interval);

        let now = shared.source.local_clock();
        let offset = match inlet.time_correction(TIME_CORRECTION_TIMEOUT) {
            Ok(offset) => offset,
            Err(Error::Timeout(_)) => {
                warn!("timeout in time-correction query for stream {stream_id}");
                continue;
            }
            Err(e) => return Err(e),
        };

        shared.writer.write_stream_offset(stream_id, now, offset)?;
        let mut lists = shared.offsets.lock().unwrap();
        lists.entry(stream_id).or_default().push(ClockOffset {
            collection_time: now - offset,
            offset,
        });
    }
    Ok(())
}
