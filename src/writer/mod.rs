//! Chunked output writer
//!
//! [`StreamWriter`] serializes tagged chunks to a single container file,
//! or to one data file and one metadata file per stream in CSV mode.
//! Writes from concurrent recording threads are serialized by one
//! container mutex, or by one mutex per stream in CSV mode; two writes
//! touching the same output file never interleave.

pub mod encode;
mod text;

pub use encode::{ChunkTag, BOUNDARY_MARKER, FILE_HEADER_XML, MAGIC};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::OutputFormat;
use crate::error::{Error, Result};
use crate::source::SampleValues;

/// Framed writer owning the recording's output file(s).
pub struct StreamWriter {
    base_path: PathBuf,
    format: OutputFormat,
    /// Single output file and its write lock, container mode only.
    container: Option<Mutex<BufWriter<File>>>,
    /// Per-stream files, CSV mode only. The outer mutex is the coarse
    /// guard for entry creation and lookup; each entry carries its own
    /// write lock. Acquire order is always coarse guard first, and the
    /// coarse guard is released before a per-stream lock is taken.
    streams: Mutex<HashMap<u32, Arc<TextStream>>>,
}

struct TextStream {
    files: Mutex<TextFiles>,
}

struct TextFiles {
    data: BufWriter<File>,
    meta: BufWriter<File>,
}

impl StreamWriter {
    /// Create the writer. In container mode this creates the output file
    /// and writes the magic plus the FileHeader chunk; failure here is
    /// fatal for the whole recording.
    pub fn create(path: &Path, format: OutputFormat) -> Result<Self> {
        let container = match format {
            OutputFormat::Xdf => {
                let mut file = BufWriter::new(File::create(path)?);
                file.write_all(MAGIC)?;
                encode::frame_chunk(
                    &mut file,
                    ChunkTag::FileHeader,
                    None,
                    FILE_HEADER_XML.as_bytes(),
                )?;
                Some(Mutex::new(file))
            }
            OutputFormat::Csv => None,
        };
        Ok(Self {
            base_path: path.to_path_buf(),
            format,
            container,
            streams: Mutex::new(HashMap::new()),
        })
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Make sure output files exist for the given stream. A no-op in
    /// container mode; in CSV mode this creates the stream's data and
    /// metadata files and writes the file header into the latter.
    pub fn init_stream_file(&self, stream_id: u32, stream_name: &str) -> Result<()> {
        if self.format == OutputFormat::Xdf {
            return Ok(());
        }

        let (data_path, meta_path) = text::stream_file_paths(&self.base_path, stream_name);
        let entry = {
            let mut streams = self.streams.lock().unwrap();
            if streams.contains_key(&stream_id) {
                return Ok(());
            }
            let files = TextFiles {
                data: BufWriter::new(File::create(&data_path)?),
                meta: BufWriter::new(File::create(&meta_path)?),
            };
            let entry = Arc::new(TextStream {
                files: Mutex::new(files),
            });
            streams.insert(stream_id, Arc::clone(&entry));
            entry
        };

        let mut files = entry.files.lock().unwrap();
        files.meta.write_all(FILE_HEADER_XML.as_bytes())?;
        files.meta.write_all(b"\n")?;
        Ok(())
    }

    fn text_stream(&self, stream_id: u32) -> Result<Arc<TextStream>> {
        self.streams
            .lock()
            .unwrap()
            .get(&stream_id)
            .cloned()
            .ok_or_else(|| {
                Error::InvalidState(format!("stream {stream_id} has no output files"))
            })
    }

    /// Write the stream's metadata. `channel_count` is the effective
    /// channel count of the recorded samples and drives the CSV header
    /// row.
    pub fn write_stream_header(
        &self,
        stream_id: u32,
        xml: &str,
        channel_count: usize,
    ) -> Result<()> {
        match &self.container {
            Some(container) => {
                let mut file = container.lock().unwrap();
                encode::frame_chunk(
                    &mut *file,
                    ChunkTag::StreamHeader,
                    Some(stream_id),
                    xml.as_bytes(),
                )?;
            }
            None => {
                let labels = text::channel_labels(xml, channel_count);
                let entry = self.text_stream(stream_id)?;
                let mut files = entry.files.lock().unwrap();
                files.meta.write_all(xml.as_bytes())?;
                files.meta.write_all(b"\n")?;
                files.data.write_all(text::header_row(&labels).as_bytes())?;
            }
        }
        Ok(())
    }

    /// Write one batch of samples. Empty batches are skipped.
    pub fn write_data_chunk(
        &self,
        stream_id: u32,
        timestamps: &[f64],
        values: &SampleValues,
        n_channels: usize,
    ) -> Result<()> {
        if timestamps.is_empty() {
            return Ok(());
        }
        let expected = timestamps.len() * n_channels;
        if values.len() != expected {
            return Err(Error::SampleMismatch {
                expected,
                got: values.len(),
            });
        }

        match &self.container {
            Some(container) => {
                let payload = encode::encode_samples_payload(timestamps, values, n_channels)?;
                let mut file = container.lock().unwrap();
                encode::frame_chunk(&mut *file, ChunkTag::Samples, Some(stream_id), &payload)?;
            }
            None => {
                let entry = self.text_stream(stream_id)?;
                let mut files = entry.files.lock().unwrap();
                text::write_rows(&mut files.data, timestamps, values, n_channels)?;
            }
        }
        Ok(())
    }

    /// Record one clock-offset measurement taken at local time `now`.
    /// The chunk stores the collection time `now - offset` and the
    /// offset itself. Ignored in CSV mode.
    pub fn write_stream_offset(&self, stream_id: u32, now: f64, offset: f64) -> Result<()> {
        let Some(container) = &self.container else {
            return Ok(());
        };
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&(now - offset).to_le_bytes());
        payload.extend_from_slice(&offset.to_le_bytes());
        let mut file = container.lock().unwrap();
        encode::frame_chunk(&mut *file, ChunkTag::ClockOffset, Some(stream_id), &payload)?;
        Ok(())
    }

    /// Write a boundary marker. Ignored in CSV mode.
    pub fn write_boundary_chunk(&self) -> Result<()> {
        let Some(container) = &self.container else {
            return Ok(());
        };
        let mut file = container.lock().unwrap();
        encode::frame_chunk(&mut *file, ChunkTag::Boundary, None, &BOUNDARY_MARKER)?;
        Ok(())
    }

    /// Write the stream's closing statistics. In CSV mode the footer is
    /// appended to the stream's metadata file.
    pub fn write_stream_footer(&self, stream_id: u32, xml: &str) -> Result<()> {
        match &self.container {
            Some(container) => {
                let mut file = container.lock().unwrap();
                encode::frame_chunk(
                    &mut *file,
                    ChunkTag::StreamFooter,
                    Some(stream_id),
                    xml.as_bytes(),
                )?;
            }
            None => {
                let entry = self.text_stream(stream_id)?;
                let mut files = entry.files.lock().unwrap();
                files.meta.write_all(xml.as_bytes())?;
                files.meta.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    /// Flush all buffered output.
    pub fn close(&self) -> Result<()> {
        if let Some(container) = &self.container {
            container.lock().unwrap().flush()?;
        }
        let streams: Vec<_> = self.streams.lock().unwrap().values().cloned().collect();
        for entry in streams {
            let mut files = entry.files.lock().unwrap();
            files.data.flush()?;
            files.meta.flush()?;
        }
        Ok(())
    }
}
