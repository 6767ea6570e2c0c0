//! # lslrec
//!
//! A multi-threaded recorder for live multi-channel data streams. Given
//! a set of resolved streams and optional watch queries, the engine
//! subscribes to each stream and persists samples, timestamps, metadata
//! and clock-offset measurements into a single chunked container file,
//! or into one CSV data file plus one metadata file per stream.
//!
//! The streaming backend is abstracted behind the [`StreamSource`] and
//! [`StreamInlet`] traits, so the engine can be driven by liblsl
//! bindings, a replay source, or the in-process mock used by the test
//! suite.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lslrec::{OutputFormat, RecordingConfig, RecordingEngine, StreamSource};
//!
//! fn record(source: Arc<dyn StreamSource>) -> lslrec::Result<()> {
//!     let streams = source.resolve_streams(std::time::Duration::from_secs(1))?;
//!     let engine = RecordingEngine::start(
//!         source,
//!         std::path::Path::new("session.xdf"),
//!         OutputFormat::Xdf,
//!         streams,
//!         vec!["type='EEG'".into()],
//!         RecordingConfig::default(),
//!     )?;
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     engine.stop();
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod recording;
pub mod source;
pub mod writer;

pub use config::{OutputFormat, RecordingConfig};
pub use error::{Error, Result};
pub use recording::{ClockOffset, RecordingEngine, StreamState};
pub use source::{
    ChannelFormat, PulledChunk, SampleValues, StreamInfo, StreamInlet, StreamSource,
};
pub use writer::StreamWriter;
