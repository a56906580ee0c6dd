// SPDX-License-Identifier: GPL-3.0-only

//! Per-stream encoder adapter
//!
//! The adapter keeps every submitted request alive in a FIFO until the
//! encoder reports the matching `input_done`. Completions always pop the
//! oldest entry, so requests are released in submission order.
//!
//! Lock order: the queue lock is released before the sink lock is taken, and
//! nothing is locked while calling into the encoder.

use crate::backends::camera::{CompletedRequestPtr, StreamId, StreamInfo, StreamRole};
use crate::errors::{AppError, BufferError, EncoderError, ProtocolError};
use crate::media::encoders::{EncodeCallbacks, EncodeInput, Encoder, FrameSpan};
use crate::media::outputs::SharedSink;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// Requests submitted to an encoder and not yet completed
#[derive(Default)]
pub struct PendingEncodeQueue {
    inner: Mutex<VecDeque<CompletedRequestPtr>>,
}

impl PendingEncodeQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<CompletedRequestPtr>> {
        // A panic while holding this lock leaves the queue itself consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, request: CompletedRequestPtr) {
        self.lock().push_back(request);
    }

    pub fn pop(&self) -> Option<CompletedRequestPtr> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// First error raised off the dispatcher thread
#[derive(Clone, Default)]
pub struct FaultSlot {
    inner: Arc<Mutex<Option<AppError>>>,
}

impl FaultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `error` unless an earlier one is still pending
    pub fn record(&self, error: AppError) {
        let mut slot = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            error!(error = %error, "Encoder fault");
            *slot = Some(error);
        } else {
            debug!(error = %error, "Additional encoder fault");
        }
    }

    pub fn take(&self) -> Option<AppError> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().map(|s| s.is_some()).unwrap_or(true)
    }
}

/// Completion handler shared with the encoder
pub struct InputDone {
    label: &'static str,
    queue: Arc<PendingEncodeQueue>,
    sink: SharedSink,
    forward_metadata: bool,
    faults: FaultSlot,
}

impl InputDone {
    /// Pop the oldest request, forward its metadata, then release it
    pub fn complete(&self) -> Result<(), ProtocolError> {
        let Some(request) = self.queue.pop() else {
            return Err(ProtocolError::QueueUnderflow(self.label));
        };
        if self.forward_metadata {
            match self.sink.lock() {
                Ok(mut sink) => {
                    if let Err(e) = sink.on_metadata(&request.metadata) {
                        warn!(path = self.label, error = %e, "Metadata write failed");
                    }
                }
                Err(_) => warn!(path = self.label, "Output sink poisoned"),
            }
        }
        drop(request);
        Ok(())
    }
}

impl EncodeCallbacks for InputDone {
    fn input_done(&self) {
        if let Err(e) = self.complete() {
            self.faults.record(e.into());
        }
    }

    fn fault(&self, error: EncoderError) {
        self.faults.record(error.into());
    }
}

/// Binds one stream of the live layout to an encoder and its sink
pub struct EncoderAdapter {
    role: StreamRole,
    stream: StreamId,
    info: StreamInfo,
    queue: Arc<PendingEncodeQueue>,
    // Declared before `sink`; the encoder must flush into an open sink
    encoder: Option<Box<dyn Encoder>>,
    sink: SharedSink,
}

impl EncoderAdapter {
    /// Completion handler to wire into the encoder before construction
    pub fn callbacks(
        role: StreamRole,
        queue: &Arc<PendingEncodeQueue>,
        sink: &SharedSink,
        forward_metadata: bool,
        faults: &FaultSlot,
    ) -> Arc<InputDone> {
        Arc::new(InputDone {
            label: role_label(role),
            queue: Arc::clone(queue),
            sink: Arc::clone(sink),
            forward_metadata,
            faults: faults.clone(),
        })
    }

    pub fn new(
        role: StreamRole,
        stream: StreamId,
        info: StreamInfo,
        queue: Arc<PendingEncodeQueue>,
        encoder: Box<dyn Encoder>,
        sink: SharedSink,
    ) -> Self {
        Self {
            role,
            stream,
            info,
            queue,
            encoder: Some(encoder),
            sink,
        }
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Submit this path's buffer from `request`
    pub fn encode_buffer(&mut self, request: &CompletedRequestPtr) -> Result<(), AppError> {
        let buffer = request
            .buffer(self.stream)
            .ok_or(BufferError::Missing(self.role))?;
        if buffer.span().is_empty() {
            return Err(BufferError::Unmapped(self.role).into());
        }
        let input = EncodeInput {
            fd: buffer.fd,
            span: FrameSpan::new(Arc::clone(&buffer.data), buffer.bytes_used),
            info: self.info,
            timestamp_us: request.timestamp_us(buffer),
        };

        self.queue.push(Arc::clone(request));
        let encoder = self.encoder.as_mut().ok_or(EncoderError::WorkerGone)?;
        encoder.encode(input)?;
        Ok(())
    }

    /// Forward a pause toggle to the sink
    pub fn signal(&self) {
        match self.sink.lock() {
            Ok(mut sink) => sink.signal(),
            Err(_) => warn!(role = %self.role, "Output sink poisoned"),
        }
    }
}

impl Drop for EncoderAdapter {
    fn drop(&mut self) {
        // Flush and join the encoder first, then close the sink it wrote to
        self.encoder = None;
        match self.sink.lock() {
            Ok(mut sink) => {
                if let Err(e) = sink.close() {
                    warn!(role = %self.role, error = %e, "Output close failed");
                }
            }
            Err(_) => warn!(role = %self.role, "Output sink poisoned"),
        }
        let leftover = self.queue.len();
        if leftover > 0 {
            warn!(role = %self.role, leftover, "Encoder stopped with frames still queued");
        }
        debug!(role = %self.role, "Encoder path closed");
    }
}

fn role_label(role: StreamRole) -> &'static str {
    match role {
        StreamRole::VideoRecording => "video",
        StreamRole::Viewfinder => "lores",
        StreamRole::Raw => "raw",
        StreamRole::StillCapture => "still",
    }
}
