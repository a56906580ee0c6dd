// SPDX-License-Identifier: GPL-3.0-only

//! Output sinks for encoded data
//!
//! Every encoder writes into an [`OutputSink`]. [`create_output`] picks the
//! transport from the output string:
//!
//! - `udp://host:port` datagrams
//! - `tcp://host:port` client, or server when `listen` is set
//! - `-` standard output
//! - anything else is a file path, optionally split into segments
//!
//! The lores preview writes each frame over the previous one instead.

mod file;
mod metadata;
mod net;
mod preview;

pub use file::{FileWriter, segment_path};
pub use metadata::MetadataWriter;
pub use net::{TcpWriter, UdpWriter};
pub use preview::ReplaceFileWriter;

use crate::backends::camera::Metadata;
use crate::config::PathOptions;
use crate::errors::OutputError;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Receives encoder output for one path
pub trait OutputSink: Send {
    /// One encoded unit (JPEG frame, H.264 access unit, raw frame)
    fn on_encoded_data(
        &mut self,
        data: &[u8],
        timestamp_us: i64,
        keyframe: bool,
    ) -> Result<(), OutputError>;

    /// Frame metadata, delivered once the encoder has consumed the frame
    fn on_metadata(&mut self, metadata: &Metadata) -> Result<(), OutputError>;

    /// Pause/resume toggle
    fn signal(&mut self);

    /// Flush and release the underlying transport
    fn close(&mut self) -> Result<(), OutputError>;
}

pub type SharedSink = Arc<Mutex<Box<dyn OutputSink>>>;

pub fn shared(sink: impl OutputSink + 'static) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// Byte transport under an [`Output`]
pub trait FrameWriter: Send {
    fn write_frame(&mut self, data: &[u8], timestamp_us: i64, keyframe: bool)
    -> Result<(), OutputError>;

    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    /// Paused by the user
    Disabled,
    /// Enabled, dropping until the next keyframe
    WaitingKeyframe,
    Running,
}

/// Pause gate, keyframe sync and timestamp rebasing in front of a [`FrameWriter`]
pub struct Output {
    writer: Box<dyn FrameWriter>,
    metadata: Option<MetadataWriter>,
    enabled: bool,
    state: GateState,
    /// Subtracted from every timestamp so output starts at zero and skips pauses
    time_offset_us: i64,
    last_timestamp_us: i64,
    frames: u64,
}

impl Output {
    pub fn new(writer: Box<dyn FrameWriter>, metadata: Option<MetadataWriter>) -> Self {
        Self {
            writer,
            metadata,
            enabled: true,
            state: GateState::WaitingKeyframe,
            time_offset_us: 0,
            last_timestamp_us: 0,
            frames: 0,
        }
    }

    /// Start paused; the first [`OutputSink::signal`] enables output
    pub fn paused(mut self) -> Self {
        self.enabled = false;
        self.state = GateState::Disabled;
        self
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl OutputSink for Output {
    fn on_encoded_data(
        &mut self,
        data: &[u8],
        timestamp_us: i64,
        keyframe: bool,
    ) -> Result<(), OutputError> {
        if !self.enabled {
            self.state = GateState::Disabled;
        } else if self.state == GateState::Disabled {
            self.state = GateState::WaitingKeyframe;
        }

        match self.state {
            GateState::Disabled => return Ok(()),
            GateState::WaitingKeyframe if !keyframe => return Ok(()),
            GateState::WaitingKeyframe => {
                // Rebase so the resumed stream continues where it paused
                self.time_offset_us = timestamp_us - self.last_timestamp_us;
                self.state = GateState::Running;
            }
            GateState::Running => {}
        }

        let ts = timestamp_us - self.time_offset_us;
        self.writer.write_frame(data, ts, keyframe)?;
        self.last_timestamp_us = ts;
        self.frames += 1;
        Ok(())
    }

    fn on_metadata(&mut self, metadata: &Metadata) -> Result<(), OutputError> {
        if self.state != GateState::Running {
            return Ok(());
        }
        match self.metadata.as_mut() {
            Some(writer) => writer.write(metadata),
            None => Ok(()),
        }
    }

    fn signal(&mut self) {
        self.enabled = !self.enabled;
        info!(enabled = self.enabled, "Output toggled");
    }

    fn close(&mut self) -> Result<(), OutputError> {
        debug!(frames = self.frames, "Closing output");
        self.writer.flush()?;
        if let Some(metadata) = self.metadata.as_mut() {
            metadata.flush()?;
        }
        Ok(())
    }
}

/// Build the sink for a path; `resolved` is the output with templates expanded
pub fn create_output(options: &PathOptions, resolved: &Path) -> Result<Output, OutputError> {
    let metadata = options
        .metadata
        .as_deref()
        .map(MetadataWriter::create)
        .transpose()?;

    let target = options.output.as_str();
    let writer: Box<dyn FrameWriter> = if let Some(addr) = target.strip_prefix("udp://") {
        Box::new(UdpWriter::connect(addr)?)
    } else if let Some(addr) = target.strip_prefix("tcp://") {
        if options.listen {
            Box::new(TcpWriter::listen(addr)?)
        } else {
            Box::new(TcpWriter::connect(addr)?)
        }
    } else if target == "-" {
        Box::new(FileWriter::stdout())
    } else if options.replace_each_frame {
        Box::new(ReplaceFileWriter::new(resolved)?)
    } else {
        Box::new(FileWriter::create(resolved, options.segment_ms)?)
    };

    info!(output = %target, "Output created");
    Ok(Output::new(writer, metadata))
}
