//! Shared test fixtures: a scriptable in-process stream source and a
//! strict reader for the container format.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use lslrec::clock::Timebase;
use lslrec::{
    ChannelFormat, Error, PulledChunk, Result, SampleValues, StreamInfo, StreamInlet, StreamSource,
};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Mock stream source
// ============================================================================

/// One scripted stream: a fixed number of deterministic samples handed
/// out in batches.
#[derive(Clone)]
pub struct MockStream {
    pub info: StreamInfo,
    pub total_samples: usize,
    pub batch: usize,
    pub start_ts: f64,
    /// `None` makes every time-correction query time out.
    pub time_correction: Option<f64>,
    pub open_times_out: bool,
    /// When this stream becomes visible to resolves.
    pub appear_after: Duration,
    /// Watch queries this stream matches.
    pub matches: Vec<String>,
}

impl MockStream {
    pub fn new(name: &str, format: ChannelFormat, channels: usize, srate: f64) -> Self {
        let labels: Vec<String> = (1..=channels).map(|i| format!("ch{i}")).collect();
        let uid = format!("{name}-uid");
        let xml = stream_xml(name, "mock-host", &uid, "", srate, format, &labels);
        Self {
            info: StreamInfo {
                name: name.to_string(),
                hostname: "mock-host".to_string(),
                source_id: String::new(),
                uid,
                nominal_srate: srate,
                channel_count: channels,
                channel_format: format,
                xml,
            },
            total_samples: 0,
            batch: 50,
            start_ts: 5.0,
            time_correction: Some(0.025),
            open_times_out: false,
            appear_after: Duration::ZERO,
            matches: Vec::new(),
        }
    }

    fn timestamp(&self, index: usize) -> f64 {
        if self.info.nominal_srate > 0.0 {
            self.start_ts + index as f64 / self.info.nominal_srate
        } else {
            self.start_ts + index as f64 * 0.01
        }
    }
}

/// Deterministic value for sample `s`, channel `c`: derived from the
/// flat index `s * n_channels + c`.
pub fn gen_values(
    format: ChannelFormat,
    first_sample: usize,
    n_samples: usize,
    n_channels: usize,
) -> SampleValues {
    let flat = first_sample * n_channels..(first_sample + n_samples) * n_channels;
    match format {
        ChannelFormat::Int8 => SampleValues::Int8(flat.map(|x| (x % 100) as i8).collect()),
        ChannelFormat::Int16 => SampleValues::Int16(flat.map(|x| (x % 30_000) as i16).collect()),
        ChannelFormat::Int32 => SampleValues::Int32(flat.map(|x| x as i32).collect()),
        ChannelFormat::Float32 => SampleValues::Float32(flat.map(|x| x as f32).collect()),
        ChannelFormat::Double64 => SampleValues::Double64(flat.map(|x| x as f64).collect()),
        ChannelFormat::String => SampleValues::String(flat.map(|x| format!("v{x}")).collect()),
    }
}

pub fn format_name(format: ChannelFormat) -> &'static str {
    match format {
        ChannelFormat::Int8 => "int8",
        ChannelFormat::Int16 => "int16",
        ChannelFormat::Int32 => "int32",
        ChannelFormat::Float32 => "float32",
        ChannelFormat::Double64 => "double64",
        ChannelFormat::String => "string",
    }
}

pub fn stream_xml(
    name: &str,
    hostname: &str,
    uid: &str,
    source_id: &str,
    srate: f64,
    format: ChannelFormat,
    labels: &[String],
) -> String {
    let channels: String = labels
        .iter()
        .map(|l| format!("<channel><label>{l}</label><unit>au</unit></channel>"))
        .collect();
    format!(
        "<?xml version=\"1.0\"?><info><name>{name}</name><type>Mock</type>\
         <channel_count>{}</channel_count><channel_format>{}</channel_format>\
         <nominal_srate>{srate}</nominal_srate><source_id>{source_id}</source_id>\
         <uid>{uid}</uid><hostname>{hostname}</hostname>\
         <desc><channels>{channels}</channels></desc></info>",
        labels.len(),
        format_name(format),
    )
}

pub struct MockSource {
    timebase: Timebase,
    started: Instant,
    streams: Vec<MockStream>,
}

impl MockSource {
    pub fn new(streams: Vec<MockStream>) -> Arc<Self> {
        Arc::new(Self {
            timebase: Timebase::new(),
            started: Instant::now(),
            streams,
        })
    }

    fn visible(&self) -> impl Iterator<Item = &MockStream> {
        let elapsed = self.started.elapsed();
        self.streams.iter().filter(move |s| s.appear_after <= elapsed)
    }
}

impl StreamSource for MockSource {
    fn resolve_streams(&self, timeout: Duration) -> Result<Vec<StreamInfo>> {
        std::thread::sleep(timeout);
        Ok(self.visible().map(|s| s.info.clone()).collect())
    }

    fn resolve_query(
        &self,
        query: &str,
        _min_count: usize,
        timeout: Duration,
    ) -> Result<Vec<StreamInfo>> {
        std::thread::sleep(timeout);
        Ok(self
            .visible()
            .filter(|s| s.matches.iter().any(|m| m.as_str() == query))
            .map(|s| s.info.clone())
            .collect())
    }

    fn open_inlet(&self, info: &StreamInfo) -> Result<Arc<dyn StreamInlet>> {
        let spec = self
            .streams
            .iter()
            .find(|s| s.info.uid == info.uid)
            .ok_or_else(|| Error::Source(format!("unknown stream uid {}", info.uid)))?;
        Ok(Arc::new(MockInlet {
            spec: spec.clone(),
            next: Mutex::new(0),
        }))
    }

    fn local_clock(&self) -> f64 {
        self.timebase.now()
    }
}

pub struct MockInlet {
    spec: MockStream,
    next: Mutex<usize>,
}

impl StreamInlet for MockInlet {
    fn info(&self) -> Result<StreamInfo> {
        Ok(self.spec.info.clone())
    }

    fn channel_count(&self) -> usize {
        self.spec.info.channel_count
    }

    fn channel_format(&self) -> ChannelFormat {
        self.spec.info.channel_format
    }

    fn nominal_srate(&self) -> f64 {
        self.spec.info.nominal_srate
    }

    fn set_postprocessing(&self, _flags: i32) -> Result<()> {
        Ok(())
    }

    fn open(&self, _timeout: Duration) -> Result<()> {
        if self.spec.open_times_out {
            Err(Error::Timeout(format!(
                "opening stream {}",
                self.spec.info.name
            )))
        } else {
            Ok(())
        }
    }

    fn pull_sample(&self, timeout: Duration) -> Result<Option<(f64, SampleValues)>> {
        let index = {
            let mut next = self.next.lock().unwrap();
            if *next >= self.spec.total_samples {
                drop(next);
                std::thread::sleep(timeout);
                return Ok(None);
            }
            let index = *next;
            *next += 1;
            index
        };
        let values = gen_values(
            self.spec.info.channel_format,
            index,
            1,
            self.spec.info.channel_count,
        );
        Ok(Some((self.spec.timestamp(index), values)))
    }

    fn pull_chunk(&self, timeout: Duration) -> Result<PulledChunk> {
        let (first, n) = {
            let mut next = self.next.lock().unwrap();
            let remaining = self.spec.total_samples - *next;
            let n = remaining.min(self.spec.batch);
            let first = *next;
            *next += n;
            (first, n)
        };
        if n == 0 {
            std::thread::sleep(timeout);
            return Ok(PulledChunk::empty(self.spec.info.channel_format));
        }
        let timestamps = (first..first + n).map(|i| self.spec.timestamp(i)).collect();
        let values = gen_values(
            self.spec.info.channel_format,
            first,
            n,
            self.spec.info.channel_count,
        );
        Ok(PulledChunk { timestamps, values })
    }

    fn time_correction(&self, _timeout: Duration) -> Result<f64> {
        self.spec
            .time_correction
            .ok_or_else(|| Error::Timeout("time correction".into()))
    }
}

// ============================================================================
// Container reader
// ============================================================================

pub const TAG_FILE_HEADER: u16 = 1;
pub const TAG_STREAM_HEADER: u16 = 2;
pub const TAG_SAMPLES: u16 = 3;
pub const TAG_CLOCK_OFFSET: u16 = 4;
pub const TAG_BOUNDARY: u16 = 5;
pub const TAG_STREAM_FOOTER: u16 = 6;

pub const BOUNDARY_MARKER: [u8; 16] = [
    0x43, 0xA5, 0x46, 0xDC, 0xCB, 0xF5, 0x41, 0x0F, 0xB3, 0x0E, 0xD5, 0x46, 0x73, 0x83, 0xCB,
    0xE4,
];

#[derive(Debug, Clone)]
pub struct RawChunk {
    pub tag: u16,
    pub stream_id: Option<u32>,
    pub payload: Vec<u8>,
}

fn tag_has_stream_id(tag: u16) -> bool {
    matches!(
        tag,
        TAG_STREAM_HEADER | TAG_SAMPLES | TAG_CLOCK_OFFSET | TAG_STREAM_FOOTER
    )
}

fn read_varlen(bytes: &[u8], pos: usize) -> (u64, usize) {
    let width = bytes[pos] as usize;
    let value = match width {
        1 => bytes[pos + 1] as u64,
        4 => u32::from_le_bytes(bytes[pos + 1..pos + 5].try_into().unwrap()) as u64,
        8 => u64::from_le_bytes(bytes[pos + 1..pos + 9].try_into().unwrap()),
        other => panic!("invalid varlen width byte {other} at offset {pos}"),
    };
    (value, 1 + width)
}

/// Parse a container file into its chunk sequence, asserting the framing
/// is exact: every declared length matches and the file ends on a chunk
/// boundary.
pub fn read_container(bytes: &[u8]) -> Vec<RawChunk> {
    assert!(bytes.len() >= 4, "file shorter than the magic");
    assert_eq!(&bytes[..4], b"XDF:", "missing container magic");
    let mut pos = 4;
    let mut chunks = Vec::new();
    while pos < bytes.len() {
        let (length, consumed) = read_varlen(bytes, pos);
        pos += consumed;
        let end = pos + length as usize;
        assert!(end <= bytes.len(), "chunk length overruns the file");
        let tag = u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap());
        pos += 2;
        let stream_id = if tag_has_stream_id(tag) {
            let id = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;
            Some(id)
        } else {
            None
        };
        chunks.push(RawChunk {
            tag,
            stream_id,
            payload: bytes[pos..end].to_vec(),
        });
        pos = end;
    }
    assert_eq!(pos, bytes.len(), "trailing bytes after the last chunk");
    chunks
}

/// Decode a Samples payload, asserting it is consumed exactly.
pub fn decode_samples(
    payload: &[u8],
    format: ChannelFormat,
    n_channels: usize,
) -> (Vec<Option<f64>>, SampleValues) {
    let (n_samples, consumed) = read_varlen(payload, 0);
    let mut pos = consumed;
    let mut timestamps = Vec::new();
    let mut values = SampleValues::empty(format);
    for _ in 0..n_samples {
        match payload[pos] {
            0 => {
                timestamps.push(None);
                pos += 1;
            }
            8 => {
                let ts = f64::from_le_bytes(payload[pos + 1..pos + 9].try_into().unwrap());
                timestamps.push(Some(ts));
                pos += 9;
            }
            other => panic!("invalid timestamp byte count {other}"),
        }
        for _ in 0..n_channels {
            pos += decode_value(&payload[pos..], &mut values);
        }
    }
    assert_eq!(pos, payload.len(), "samples payload not fully consumed");
    assert_eq!(timestamps.len(), n_samples as usize);
    (timestamps, values)
}

fn decode_value(bytes: &[u8], values: &mut SampleValues) -> usize {
    match values {
        SampleValues::Int8(v) => {
            v.push(bytes[0] as i8);
            1
        }
        SampleValues::Int16(v) => {
            v.push(i16::from_le_bytes(bytes[..2].try_into().unwrap()));
            2
        }
        SampleValues::Int32(v) => {
            v.push(i32::from_le_bytes(bytes[..4].try_into().unwrap()));
            4
        }
        SampleValues::Float32(v) => {
            v.push(f32::from_le_bytes(bytes[..4].try_into().unwrap()));
            4
        }
        SampleValues::Double64(v) => {
            v.push(f64::from_le_bytes(bytes[..8].try_into().unwrap()));
            8
        }
        SampleValues::String(v) => {
            let (len, consumed) = read_varlen(bytes, 0);
            let end = consumed + len as usize;
            v.push(String::from_utf8(bytes[consumed..end].to_vec()).unwrap());
            end
        }
    }
}

#[derive(Debug)]
pub struct Footer {
    pub first_timestamp: f64,
    pub last_timestamp: f64,
    pub sample_count: u64,
    pub offsets: Vec<(f64, f64)>,
}

pub fn parse_footer(payload: &[u8]) -> Footer {
    let root = xmltree::Element::parse(payload).expect("footer is well-formed XML");
    let text = |name: &str| -> String {
        root.get_child(name)
            .unwrap_or_else(|| panic!("footer misses <{name}>"))
            .get_text()
            .map(|t| t.into_owned())
            .unwrap_or_default()
    };
    let mut offsets = Vec::new();
    if let Some(list) = root.get_child("clock_offsets") {
        for node in &list.children {
            if let Some(offset) = node.as_element() {
                let time: f64 = offset
                    .get_child("time")
                    .and_then(|e| e.get_text())
                    .unwrap()
                    .parse()
                    .unwrap();
                let value: f64 = offset
                    .get_child("value")
                    .and_then(|e| e.get_text())
                    .unwrap()
                    .parse()
                    .unwrap();
                offsets.push((time, value));
            }
        }
    }
    Footer {
        first_timestamp: text("first_timestamp").parse().unwrap(),
        last_timestamp: text("last_timestamp").parse().unwrap(),
        sample_count: text("sample_count").parse().unwrap(),
        offsets,
    }
}

// ============================================================================
// Structural checks
// ============================================================================

/// Verify the file-level and per-stream structural rules over a parsed
/// chunk sequence. `streams` maps stream id to the effective channel
/// format and count used to decode its Samples chunks.
pub fn check_invariants(chunks: &[RawChunk], streams: &HashMap<u32, (ChannelFormat, usize)>) {
    // exactly one FileHeader, and it is the first chunk
    assert!(!chunks.is_empty(), "no chunks at all");
    assert_eq!(chunks[0].tag, TAG_FILE_HEADER, "first chunk is not the file header");
    assert_eq!(
        chunks.iter().filter(|c| c.tag == TAG_FILE_HEADER).count(),
        1,
        "more than one file header"
    );
    assert_eq!(
        chunks[0].payload,
        b"<?xml version=\"1.0\"?><info><version>1.0</version></info>"
    );

    let mut headers: HashMap<u32, usize> = HashMap::new();
    let mut footers: HashMap<u32, usize> = HashMap::new();
    let mut decoded_counts: HashMap<u32, u64> = HashMap::new();

    for chunk in chunks {
        match chunk.tag {
            TAG_BOUNDARY => {
                assert_eq!(chunk.stream_id, None, "boundary chunk carries a stream id");
                assert_eq!(chunk.payload, BOUNDARY_MARKER, "boundary marker mismatch");
            }
            TAG_STREAM_HEADER => {
                let id = chunk.stream_id.expect("stream header without id");
                *headers.entry(id).or_default() += 1;
                assert!(
                    !footers.contains_key(&id),
                    "stream {id} has chunks after its footer"
                );
            }
            TAG_SAMPLES | TAG_CLOCK_OFFSET => {
                let id = chunk.stream_id.expect("stream chunk without id");
                assert!(
                    headers.contains_key(&id),
                    "stream {id} has data before its header"
                );
                assert!(
                    !footers.contains_key(&id),
                    "stream {id} has chunks after its footer"
                );
                if chunk.tag == TAG_SAMPLES {
                    if let Some(&(format, n_channels)) = streams.get(&id) {
                        let (timestamps, values) =
                            decode_samples(&chunk.payload, format, n_channels);
                        assert_eq!(values.len(), timestamps.len() * n_channels);
                        *decoded_counts.entry(id).or_default() += timestamps.len() as u64;
                    }
                } else {
                    assert_eq!(chunk.payload.len(), 16, "clock offset payload size");
                }
            }
            TAG_STREAM_FOOTER => {
                let id = chunk.stream_id.expect("stream footer without id");
                assert!(
                    headers.contains_key(&id),
                    "stream {id} has a footer but no header"
                );
                *footers.entry(id).or_default() += 1;
            }
            TAG_FILE_HEADER => {}
            other => panic!("unknown chunk tag {other}"),
        }
    }

    for (id, count) in &headers {
        assert_eq!(*count, 1, "stream {id} has {count} headers");
    }
    for (id, count) in &footers {
        assert_eq!(*count, 1, "stream {id} has {count} footers");
    }

    // footer statistics agree with the decoded sample counts
    for chunk in chunks.iter().filter(|c| c.tag == TAG_STREAM_FOOTER) {
        let id = chunk.stream_id.unwrap();
        if !streams.contains_key(&id) {
            continue;
        }
        let footer = parse_footer(&chunk.payload);
        let decoded = decoded_counts.get(&id).copied().unwrap_or(0);
        assert_eq!(
            footer.sample_count, decoded,
            "stream {id} footer count disagrees with its samples chunks"
        );
        if footer.sample_count > 0 {
            assert!(
                footer.first_timestamp <= footer.last_timestamp,
                "stream {id} has first_timestamp > last_timestamp"
            );
        }
    }
}

/// Convenience: chunks belonging to one stream, in file order.
pub fn chunks_of(chunks: &[RawChunk], stream_id: u32) -> Vec<&RawChunk> {
    chunks
        .iter()
        .filter(|c| c.stream_id == Some(stream_id))
        .collect()
}

/// Map stream ids to stream names via the `<name>` element of each
/// stream header.
pub fn stream_ids_by_name(chunks: &[RawChunk]) -> HashMap<String, u32> {
    let mut map = HashMap::new();
    for chunk in chunks.iter().filter(|c| c.tag == TAG_STREAM_HEADER) {
        let root = xmltree::Element::parse(chunk.payload.as_slice()).unwrap();
        if let Some(name) = root.get_child("name").and_then(|e| e.get_text()) {
            map.insert(name.into_owned(), chunk.stream_id.unwrap());
        }
    }
    map
}
