//! Binary primitives for the container format
//!
//! Everything here is byte-exact: the variable-length length prefix, the
//! chunk framing, timestamp encoding, and the per-format sample value
//! encoding. All multi-byte integers and floats are little-endian.

use std::io::{self, Write};

use crate::error::{Error, Result};
use crate::source::SampleValues;

/// File magic, immediately followed by the FileHeader chunk.
pub const MAGIC: &[u8; 4] = b"XDF:";

/// FileHeader chunk payload, written exactly once per container.
pub const FILE_HEADER_XML: &str =
    "<?xml version=\"1.0\"?><info><version>1.0</version></info>";

/// Boundary chunk payload: a fixed marker a reader can scan for to
/// resume parsing after corruption.
pub const BOUNDARY_MARKER: [u8; 16] = [
    0x43, 0xA5, 0x46, 0xDC, 0xCB, 0xF5, 0x41, 0x0F, 0xB3, 0x0E, 0xD5, 0x46, 0x73, 0x83, 0xCB,
    0xE4,
];

/// Chunk tags of the container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ChunkTag {
    FileHeader = 1,
    StreamHeader = 2,
    Samples = 3,
    ClockOffset = 4,
    Boundary = 5,
    StreamFooter = 6,
}

impl ChunkTag {
    /// Whether chunks of this tag carry a stream id after the tag.
    pub fn has_stream_id(self) -> bool {
        matches!(
            self,
            ChunkTag::StreamHeader | ChunkTag::Samples | ChunkTag::ClockOffset | ChunkTag::StreamFooter
        )
    }
}

/// Append a variable-length unsigned integer: one lead byte giving the
/// width (1, 4 or 8), then the value little-endian in that width. The
/// narrowest width that fits is used.
pub fn write_varlen(out: &mut Vec<u8>, value: u64) {
    if value <= u8::MAX as u64 {
        out.push(1);
        out.push(value as u8);
    } else if value <= u32::MAX as u64 {
        out.push(4);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(8);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Append one sample timestamp: a zero byte for "no timestamp", else an
/// 8 byte-count followed by the f64.
pub fn write_timestamp(out: &mut Vec<u8>, ts: f64) {
    if ts == 0.0 {
        out.push(0);
    } else {
        out.push(8);
        out.extend_from_slice(&ts.to_le_bytes());
    }
}

/// Append the values of one sample, channels `first .. first + n_channels`.
/// String values are varlen-length-prefixed bytes.
fn write_sample_values(out: &mut Vec<u8>, values: &SampleValues, first: usize, n_channels: usize) {
    match values {
        SampleValues::Int8(v) => {
            for x in &v[first..first + n_channels] {
                out.push(*x as u8);
            }
        }
        SampleValues::Int16(v) => {
            for x in &v[first..first + n_channels] {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        SampleValues::Int32(v) => {
            for x in &v[first..first + n_channels] {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        SampleValues::Float32(v) => {
            for x in &v[first..first + n_channels] {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        SampleValues::Double64(v) => {
            for x in &v[first..first + n_channels] {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        SampleValues::String(v) => {
            for s in &v[first..first + n_channels] {
                write_varlen(out, s.len() as u64);
                out.extend_from_slice(s.as_bytes());
            }
        }
    }
}

/// Build a complete Samples chunk payload:
/// `[NumSamples] { [TimestampBytes] [Timestamp?] [values...] }*`
pub fn encode_samples_payload(
    timestamps: &[f64],
    values: &SampleValues,
    n_channels: usize,
) -> Result<Vec<u8>> {
    let n_samples = timestamps.len();
    let expected = n_samples * n_channels;
    if values.len() != expected {
        return Err(Error::SampleMismatch {
            expected,
            got: values.len(),
        });
    }

    let per_value = values.format().value_bytes().unwrap_or(8);
    let mut out = Vec::with_capacity(16 + n_samples * (9 + n_channels * per_value));
    write_varlen(&mut out, n_samples as u64);
    for (i, ts) in timestamps.iter().enumerate() {
        write_timestamp(&mut out, *ts);
        write_sample_values(&mut out, values, i * n_channels, n_channels);
    }
    Ok(out)
}

/// Write one framed chunk: `[Length] [Tag] [StreamId?] [payload]` where
/// Length counts the tag, the optional stream id and the payload.
pub fn frame_chunk<W: Write>(
    out: &mut W,
    tag: ChunkTag,
    stream_id: Option<u32>,
    payload: &[u8],
) -> io::Result<()> {
    let length = payload.len() + 2 + if stream_id.is_some() { 4 } else { 0 };
    let mut header = Vec::with_capacity(15);
    write_varlen(&mut header, length as u64);
    header.extend_from_slice(&(tag as u16).to_le_bytes());
    if let Some(id) = stream_id {
        header.extend_from_slice(&id.to_le_bytes());
    }
    out.write_all(&header)?;
    out.write_all(payload)
}
