// SPDX-License-Identifier: MPL-2.0

//! Raw YUV420 passthrough
//!
//! Writes the frame bytes unchanged and completes synchronously.

use super::{EncodeInput, Encoder, EncoderContext};
use crate::errors::EncoderError;

pub struct YuvEncoder {
    ctx: EncoderContext,
}

impl YuvEncoder {
    pub fn new(ctx: EncoderContext) -> Self {
        Self { ctx }
    }
}

impl Encoder for YuvEncoder {
    fn encode(&mut self, input: EncodeInput) -> Result<(), EncoderError> {
        self.ctx
            .emit(input.span.as_slice(), input.timestamp_us, true);
        drop(input);
        self.ctx.callbacks.input_done();
        Ok(())
    }
}
