//! Text-mode helpers
//!
//! File naming, stream-name sanitization, channel-label extraction and
//! CSV row formatting for the per-stream output variant.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::source::SampleValues;

/// Derive the per-stream data and metadata paths from the base path.
///
/// The stream name is inserted before the last extension: base
/// `out.csv` and stream `Foo` give `out - Foo.data.csv` and
/// `out - Foo.meta.xml`.
pub(crate) fn stream_file_paths(base: &Path, stream_name: &str) -> (PathBuf, PathBuf) {
    let clean = sanitize_stream_name(stream_name);
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recording");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("csv");
    let dir = base.parent().map(Path::to_path_buf).unwrap_or_default();
    let data = dir.join(format!("{stem} - {clean}.data.{ext}"));
    let meta = dir.join(format!("{stem} - {clean}.meta.xml"));
    (data, meta)
}

/// Strip characters that are not valid in a file path.
pub(crate) fn sanitize_stream_name(name: &str) -> String {
    name.chars()
        .filter(|c| {
            !c.is_control()
                && !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
        })
        .collect()
}

/// Channel labels for the CSV header row.
///
/// Labels come from the `<desc><channels>` section of the stream
/// metadata. When the labels are missing, incomplete, or their count
/// does not match `channel_count`, the whole row falls back to
/// `channel_1..channel_N`.
pub(crate) fn channel_labels(xml: &str, channel_count: usize) -> Vec<String> {
    if let Some(labels) = parse_labels(xml) {
        if labels.len() == channel_count {
            return labels;
        }
    }
    (1..=channel_count).map(|i| format!("channel_{i}")).collect()
}

fn parse_labels(xml: &str) -> Option<Vec<String>> {
    let root = xmltree::Element::parse(xml.as_bytes()).ok()?;
    let channels = root.get_child("desc")?.get_child("channels")?;
    let mut labels = Vec::new();
    for node in &channels.children {
        if let Some(channel) = node.as_element() {
            if channel.name == "channel" {
                labels.push(channel.get_child("label")?.get_text()?.trim().to_string());
            }
        }
    }
    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

/// `lsl_time_stamp,<label>,...` header row, with trailing newline.
pub(crate) fn header_row(labels: &[String]) -> String {
    let mut row = String::from("lsl_time_stamp");
    for label in labels {
        row.push(',');
        row.push_str(label);
    }
    row.push('\n');
    row
}

/// Write one CSV row per sample: timestamp first, then the channel
/// values in order.
pub(crate) fn write_rows<W: Write>(
    out: &mut W,
    timestamps: &[f64],
    values: &SampleValues,
    n_channels: usize,
) -> io::Result<()> {
    let mut row = String::new();
    for (i, ts) in timestamps.iter().enumerate() {
        row.clear();
        let _ = write!(row, "{ts}");
        for c in 0..n_channels {
            row.push(',');
            append_value(&mut row, values, i * n_channels + c);
        }
        row.push('\n');
        out.write_all(row.as_bytes())?;
    }
    Ok(())
}

fn append_value(row: &mut String, values: &SampleValues, index: usize) {
    let _ = match values {
        SampleValues::Int8(v) => write!(row, "{}", v[index]),
        SampleValues::Int16(v) => write!(row, "{}", v[index]),
        SampleValues::Int32(v) => write!(row, "{}", v[index]),
        SampleValues::Float32(v) => write!(row, "{}", v[index]),
        SampleValues::Double64(v) => write!(row, "{}", v[index]),
        SampleValues::String(v) => write!(row, "{}", v[index]),
    };
}
