//! Per-stream recording thread
//!
//! Drives one stream through headers, streaming and footers. The phase
//! counters are released on the error path as well, so a failing stream
//! never wedges the barrier for the others.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::clock;
use crate::error::{Error, Result};
use crate::source::{ChannelFormat, SampleValues, StreamInfo, StreamInlet};

use super::{join_one_timed, offsets, ClockOffset, RecordingShared, StreamState};

const TIMESTAMP_CHANNEL_SINGLE: &str = "<channel><label>Recording Timestamp (Unix Epoch)</label>\
     <unit>milliseconds</unit><type>Recorder</type></channel>";

const TIMESTAMP_CHANNEL_PAIR: &str = "<channel><label>Recording Timestamp Base (Unix Epoch)</label>\
     <unit>milliseconds</unit><type>Recorder</type></channel>\
     <channel><label>Recording Timestamp Remainder</label>\
     <unit>milliseconds</unit><type>Recorder</type></channel>";

/// Record one stream until shutdown. Spawned once per stream; initial
/// streams are phase-locked, streams discovered later are not.
pub(crate) fn run(shared: &Arc<RecordingShared>, info: StreamInfo, phase_locked: bool) {
    let stream_id = shared.fresh_stream_id();
    shared.set_state(stream_id, StreamState::Headers);
    match record_stream(shared, stream_id, &info, phase_locked) {
        Ok(()) => shared.set_state(stream_id, StreamState::Done),
        Err(e) => {
            shared.set_state(stream_id, StreamState::Failed);
            error!("error while recording stream {}: {e}", info.name);
        }
    }
}

fn record_stream(
    shared: &Arc<RecordingShared>,
    stream_id: u32,
    info: &StreamInfo,
    phase_locked: bool,
) -> Result<()> {
    let config = &shared.config;

    // --- headers phase
    shared.phase.enter_headers(phase_locked);
    let opened = open_and_write_header(shared, stream_id, info);
    shared.phase.leave_headers(phase_locked);
    let inlet = opened?;

    // --- streaming phase
    // Wait until the initial set of streams is done writing headers so
    // the file stays sorted; late-discovered streams skip this wait.
    if !shared.phase.enter_streaming(phase_locked, config.max_headers_wait) {
        warn!(
            "stream {} starts streaming before all headers were written",
            info.name
        );
        shared.mark_unsorted();
    }
    shared.set_state(stream_id, StreamState::Streaming);
    info!("started data collection for stream {}", info.name);

    let streamed = transfer_loop(shared, stream_id, &inlet);
    shared.phase.leave_streaming(phase_locked);
    let totals = streamed?;

    // --- footers phase
    if !shared.phase.enter_footers(phase_locked, config.max_footers_wait) {
        shared.mark_unsorted();
    }
    shared.set_state(stream_id, StreamState::Footers);
    let collected = {
        let offsets = shared.offsets.lock().unwrap();
        offsets.get(&stream_id).cloned().unwrap_or_default()
    };
    let footer = footer_xml(&totals, &collected);
    shared.writer.write_stream_footer(stream_id, &footer)?;
    shared.phase.leave_footers(phase_locked);
    info!("wrote footer for stream {}", info.name);
    Ok(())
}

/// Open the inlet, apply post-processing flags, and write the stream
/// header. Returns the inlet to pull from.
fn open_and_write_header(
    shared: &Arc<RecordingShared>,
    stream_id: u32,
    info: &StreamInfo,
) -> Result<Arc<dyn StreamInlet>> {
    let config = &shared.config;
    let inlet = shared.source.open_inlet(info)?;

    if let Some(flags) = config.postprocessing_for(&info.name, &info.hostname) {
        if let Err(e) = inlet.set_postprocessing(flags) {
            error!(
                "set post-processing failed for stream {stream_id}: {e}; \
                 check the provided flags value"
            );
        }
    }

    match inlet.open(config.max_open_wait) {
        Ok(()) => info!("opened the stream {}", info.name),
        Err(Error::Timeout(_)) => warn!(
            "subscribing to the stream {} is taking relatively long; \
             collection from this stream will be delayed",
            info.name
        ),
        Err(e) => return Err(e),
    }

    let fresh = inlet.info()?;
    let mut metadata = fresh.xml.clone();
    let mut effective_channels = inlet.channel_count();
    if config.recording_timestamps {
        effective_channels +=
            inject_channel_metadata(&mut metadata, fresh.channel_format, fresh.channel_count);
    }

    shared.writer.init_stream_file(stream_id, &fresh.name)?;
    shared
        .writer
        .write_stream_header(stream_id, &metadata, effective_channels)?;
    info!("received header for stream {}", fresh.name);
    Ok(inlet)
}

struct StreamTotals {
    first_ts: Option<f64>,
    last_ts: f64,
    sample_count: u64,
}

/// Pump samples until shutdown, with the optional clock-offset probe
/// running alongside. The probe is stopped and joined before this
/// returns, on the error path too.
fn transfer_loop(
    shared: &Arc<RecordingShared>,
    stream_id: u32,
    inlet: &Arc<dyn StreamInlet>,
) -> Result<StreamTotals> {
    let offset_stop = Arc::new(AtomicBool::new(false));
    let offset_thread = if shared.config.collect_offsets {
        let shared = Arc::clone(shared);
        let inlet = Arc::clone(inlet);
        let stop = Arc::clone(&offset_stop);
        Some(std::thread::spawn(move || {
            offsets::run(&shared, stream_id, inlet, &stop);
        }))
    } else {
        None
    };

    let result = pump_samples(shared, stream_id, inlet);

    offset_stop.store(true, Ordering::Relaxed);
    if let Some(handle) = offset_thread {
        if !join_one_timed(handle, shared.config.max_join_wait) {
            warn!("offsets thread for stream {stream_id} did not finish in time; detaching it");
        }
    }
    result
}

fn pump_samples(
    shared: &Arc<RecordingShared>,
    stream_id: u32,
    inlet: &Arc<dyn StreamInlet>,
) -> Result<StreamTotals> {
    let config = &shared.config;
    let srate = inlet.nominal_srate();
    let sample_interval = if srate > 0.0 { 1.0 / srate } else { 0.0 };
    let source_channels = inlet.channel_count();

    let mut first_ts: Option<f64> = None;
    let mut last_ts = 0.0f64;
    let mut sample_count: u64 = 0;

    // Pull the first sample individually to establish the starting
    // timestamp; a timeout just means the chunk loop will pick it up.
    if let Some((ts, mut values)) = inlet.pull_sample(config.chunk_interval)? {
        first_ts = Some(ts);
        last_ts = ts;
        let mut n_channels = source_channels;
        if config.recording_timestamps {
            inject_recording_timestamps(&mut values, &mut n_channels, 1);
        }
        shared
            .writer
            .write_data_chunk(stream_id, &[ts], &values, n_channels)?;
        sample_count += 1;
    }

    while !shared.is_shutdown() {
        let chunk = inlet.pull_chunk(config.chunk_interval)?;
        let timestamps = chunk.timestamps;
        let mut values = chunk.values;

        for ts in &timestamps {
            // Regularly spaced timestamps are extrapolated one step so a
            // stalled sender is detected by the next irregular stamp.
            if last_ts + sample_interval == *ts {
                last_ts = ts + sample_interval;
            } else {
                last_ts = *ts;
            }
        }
        if first_ts.is_none() {
            first_ts = timestamps.first().copied();
        }

        let mut n_channels = source_channels;
        if config.recording_timestamps {
            inject_recording_timestamps(&mut values, &mut n_channels, timestamps.len());
        }
        shared
            .writer
            .write_data_chunk(stream_id, &timestamps, &values, n_channels)?;
        sample_count += timestamps.len() as u64;

        std::thread::sleep(config.chunk_interval);
    }

    Ok(StreamTotals {
        first_ts,
        last_ts,
        sample_count,
    })
}

/// Splice the recording-timestamp channel descriptions into the stream
/// metadata and bump its channel count. Returns the number of channels
/// added (zero for formats without injection support).
fn inject_channel_metadata(xml: &mut String, format: ChannelFormat, channel_count: usize) -> usize {
    let (snippet, added) = match format {
        ChannelFormat::Double64 | ChannelFormat::String => (TIMESTAMP_CHANNEL_SINGLE, 1),
        ChannelFormat::Float32 | ChannelFormat::Int32 => (TIMESTAMP_CHANNEL_PAIR, 2),
        ChannelFormat::Int8 | ChannelFormat::Int16 => return 0,
    };

    if let Some(pos) = xml.rfind("</channels>") {
        xml.insert_str(pos, snippet);
    }
    let old = format!("<channel_count>{channel_count}</channel_count>");
    let new = format!("<channel_count>{}</channel_count>", channel_count + added);
    if let Some(pos) = xml.find(&old) {
        xml.replace_range(pos..pos + old.len(), &new);
    }
    added
}

/// Append the wall-clock recording time (milliseconds since epoch) to
/// every sample of the chunk. Wide formats take the time as one value;
/// f32 and i32 split it into a base and a remainder channel. The narrow
/// integer formats cannot hold an epoch time and are left untouched.
fn inject_recording_timestamps(
    values: &mut SampleValues,
    n_channels: &mut usize,
    n_samples: usize,
) {
    if values.len() != n_samples * *n_channels {
        return;
    }
    let now = clock::epoch_millis_now();
    match values {
        SampleValues::Int8(_) | SampleValues::Int16(_) => return,
        SampleValues::Int32(v) => {
            let base = now as i32;
            let remainder = (now - base as f64) as i32;
            let spliced = splice_channels(v, *n_channels, n_samples, &[base, remainder]);
            *v = spliced;
            *n_channels += 2;
        }
        SampleValues::Float32(v) => {
            let base = now as f32;
            let remainder = (now - base as f64) as f32;
            let spliced = splice_channels(v, *n_channels, n_samples, &[base, remainder]);
            *v = spliced;
            *n_channels += 2;
        }
        SampleValues::Double64(v) => {
            let spliced = splice_channels(v, *n_channels, n_samples, &[now]);
            *v = spliced;
            *n_channels += 1;
        }
        SampleValues::String(v) => {
            let spliced = splice_channels(v, *n_channels, n_samples, &[now.to_string()]);
            *v = spliced;
            *n_channels += 1;
        }
    }
}

fn splice_channels<T: Clone>(
    values: &[T],
    n_channels: usize,
    n_samples: usize,
    extra: &[T],
) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len() + extra.len() * n_samples);
    for i in 0..n_samples {
        out.extend_from_slice(&values[i * n_channels..(i + 1) * n_channels]);
        out.extend_from_slice(extra);
    }
    out
}

/// Build the footer document from the stream's totals and its collected
/// clock offsets.
fn footer_xml(totals: &StreamTotals, offsets: &[ClockOffset]) -> String {
    let mut footer = format!(
        "<?xml version=\"1.0\"?><info><first_timestamp>{}</first_timestamp>\
         <last_timestamp>{}</last_timestamp><sample_count>{}</sample_count><clock_offsets>",
        totals.first_ts.unwrap_or(0.0),
        totals.last_ts,
        totals.sample_count,
    );
    for entry in offsets {
        let _ = write!(
            footer,
            "<offset><time>{}</time><value>{}</value></offset>",
            entry.collection_time, entry.offset
        );
    }
    footer.push_str("</clock_offsets></info>");
    footer
}
