//! Accelerator session: execution stream plus the nvJPEG2000 engine objects.
//!
//! Creation stops at the first failing step and keeps whatever was created so
//! far; [`Session::teardown`] then releases those pieces, so a half-built
//! session is always safe to tear down, and tearing down twice is a no-op.

use std::fmt;

use crate::backend::{Jp2kBackend, SessionHandles};
use crate::error::Result;
use crate::negotiate::DecodeParams;

pub struct Session<H> {
    stream: Option<H>,
    engine: Option<H>,
    state: Option<H>,
    codestream: Option<H>,
    params: Option<H>,
}

impl<H> Default for Session<H> {
    fn default() -> Self {
        Self {
            stream: None,
            engine: None,
            state: None,
            codestream: None,
            params: None,
        }
    }
}

impl<H: fmt::Debug> fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("stream", &self.stream)
            .field("engine", &self.engine)
            .field("state", &self.state)
            .field("codestream", &self.codestream)
            .field("params", &self.params)
            .finish()
    }
}

impl<H: Copy + fmt::Debug> Session<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking stream first, then engine, decode state, codestream
    /// holder and decode parameters.
    pub fn create<B>(&mut self, backend: &mut B, params: DecodeParams) -> Result<()>
    where
        B: Jp2kBackend<Handle = H>,
    {
        self.stream = Some(backend.create_stream()?);
        let engine = backend.create_engine()?;
        self.engine = Some(engine);
        self.state = Some(backend.create_decode_state(engine)?);
        self.codestream = Some(backend.create_codestream()?);
        self.params = Some(backend.create_decode_params(params)?);
        Ok(())
    }

    /// All handles, or `None` unless every creation step succeeded.
    pub fn handles(&self) -> Option<SessionHandles<H>> {
        Some(SessionHandles {
            engine: self.engine?,
            state: self.state?,
            codestream: self.codestream?,
            params: self.params?,
            stream: self.stream?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_none()
            && self.engine.is_none()
            && self.state.is_none()
            && self.codestream.is_none()
            && self.params.is_none()
    }

    /// Release engine objects, then the stream. Every release is attempted;
    /// failures are logged and counted.
    pub fn teardown<B>(&mut self, backend: &mut B) -> usize
    where
        B: Jp2kBackend<Handle = H>,
    {
        let mut failures = 0;
        failures += release(&mut self.params, "decode params", |h| backend.destroy_decode_params(h));
        failures += release(&mut self.codestream, "codestream", |h| backend.destroy_codestream(h));
        failures += release(&mut self.state, "decode state", |h| backend.destroy_decode_state(h));
        failures += release(&mut self.engine, "engine", |h| backend.destroy_engine(h));
        failures += release(&mut self.stream, "CUDA stream", |h| backend.destroy_stream(h));
        failures
    }
}

fn release<H>(slot: &mut Option<H>, what: &str, destroy: impl FnOnce(H) -> Result<()>) -> usize {
    match slot.take().map(destroy) {
        Some(Err(e)) => {
            tracing::warn!("Failed to destroy {}: {}", what, e);
            1
        }
        _ => 0,
    }
}
