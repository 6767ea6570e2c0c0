//! Stream source capability interface
//!
//! The recording engine never talks to a streaming backend directly; it
//! consumes the [`StreamSource`] and [`StreamInlet`] traits. A backend
//! (liblsl bindings, a replay source, the test mock) implements these
//! and hands the engine resolved [`StreamInfo`] descriptions and sample
//! chunks.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Channel value format of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelFormat {
    Int8,
    Int16,
    Int32,
    Float32,
    Double64,
    String,
}

impl ChannelFormat {
    /// Encoded size of one value in bytes, or `None` for variable-length
    /// string values.
    pub fn value_bytes(self) -> Option<usize> {
        match self {
            ChannelFormat::Int8 => Some(1),
            ChannelFormat::Int16 => Some(2),
            ChannelFormat::Int32 => Some(4),
            ChannelFormat::Float32 => Some(4),
            ChannelFormat::Double64 => Some(8),
            ChannelFormat::String => None,
        }
    }
}

/// Description of one discovered stream.
///
/// `xml` is the complete metadata document as advertised by the stream;
/// the other fields are the pieces of it the recorder branches on.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub name: String,
    pub hostname: String,
    pub source_id: String,
    pub uid: String,
    pub nominal_srate: f64,
    pub channel_count: usize,
    pub channel_format: ChannelFormat,
    pub xml: String,
}

/// Multiplexed sample values, sample-major.
///
/// One variant per channel format; a chunk of `n` samples from a stream
/// with `c` channels carries `n * c` values.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValues {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Double64(Vec<f64>),
    String(Vec<String>),
}

impl SampleValues {
    pub fn empty(format: ChannelFormat) -> Self {
        match format {
            ChannelFormat::Int8 => SampleValues::Int8(Vec::new()),
            ChannelFormat::Int16 => SampleValues::Int16(Vec::new()),
            ChannelFormat::Int32 => SampleValues::Int32(Vec::new()),
            ChannelFormat::Float32 => SampleValues::Float32(Vec::new()),
            ChannelFormat::Double64 => SampleValues::Double64(Vec::new()),
            ChannelFormat::String => SampleValues::String(Vec::new()),
        }
    }

    pub fn format(&self) -> ChannelFormat {
        match self {
            SampleValues::Int8(_) => ChannelFormat::Int8,
            SampleValues::Int16(_) => ChannelFormat::Int16,
            SampleValues::Int32(_) => ChannelFormat::Int32,
            SampleValues::Float32(_) => ChannelFormat::Float32,
            SampleValues::Double64(_) => ChannelFormat::Double64,
            SampleValues::String(_) => ChannelFormat::String,
        }
    }

    /// Total number of values across all samples.
    pub fn len(&self) -> usize {
        match self {
            SampleValues::Int8(v) => v.len(),
            SampleValues::Int16(v) => v.len(),
            SampleValues::Int32(v) => v.len(),
            SampleValues::Float32(v) => v.len(),
            SampleValues::Double64(v) => v.len(),
            SampleValues::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One pulled batch of samples with their sender timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct PulledChunk {
    pub timestamps: Vec<f64>,
    pub values: SampleValues,
}

impl PulledChunk {
    pub fn empty(format: ChannelFormat) -> Self {
        Self {
            timestamps: Vec::new(),
            values: SampleValues::empty(format),
        }
    }
}

/// A streaming backend: resolves stream queries and opens inlets.
pub trait StreamSource: Send + Sync {
    /// Resolve all currently visible streams, waiting up to `timeout`.
    fn resolve_streams(&self, timeout: Duration) -> Result<Vec<StreamInfo>>;

    /// Resolve streams matching `query`, blocking up to `timeout` or
    /// until at least `min_count` results are available.
    fn resolve_query(
        &self,
        query: &str,
        min_count: usize,
        timeout: Duration,
    ) -> Result<Vec<StreamInfo>>;

    /// Open a subscription to the given stream.
    fn open_inlet(&self, info: &StreamInfo) -> Result<Arc<dyn StreamInlet>>;

    /// Monotonic clock in the same time domain as sample timestamps,
    /// in seconds.
    fn local_clock(&self) -> f64;
}

/// A subscription handle to one stream.
pub trait StreamInlet: Send + Sync {
    /// Full stream description as seen by this subscription.
    fn info(&self) -> Result<StreamInfo>;

    fn channel_count(&self) -> usize;
    fn channel_format(&self) -> ChannelFormat;
    fn nominal_srate(&self) -> f64;

    /// Apply backend post-processing flags (online clock sync options).
    fn set_postprocessing(&self, flags: i32) -> Result<()>;

    /// Subscribe to data, waiting up to `timeout` for the stream to
    /// respond. `Error::Timeout` means the subscription will complete
    /// late; pulls remain valid.
    fn open(&self, timeout: Duration) -> Result<()>;

    /// Pull a single sample, or `None` when no sample arrived within
    /// `timeout`.
    fn pull_sample(&self, timeout: Duration) -> Result<Option<(f64, SampleValues)>>;

    /// Pull all buffered samples as one multiplexed chunk. May return an
    /// empty chunk when nothing arrived within `timeout`.
    fn pull_chunk(&self, timeout: Duration) -> Result<PulledChunk>;

    /// Estimate the offset between the sender clock and the local clock.
    fn time_correction(&self, timeout: Duration) -> Result<f64>;
}
