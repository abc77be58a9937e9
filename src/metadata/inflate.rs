//! zlib inflate backends and the fallback chain that selects between them.
//!
//! Both backends decode the same zlib stream format and must produce identical bytes; callers
//! only ever see the chain.

use std::fmt;

/// Failure of a single inflate backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InflateError {
    /// The compressed stream is malformed.
    #[error("corrupt zlib stream: {0}")]
    Corrupt(String),

    /// The input ended before the end-of-stream marker.
    #[error("truncated zlib stream")]
    Truncated,

    /// Output grew past the configured limit.
    #[error("inflated output exceeds {limit} bytes")]
    TooLarge {
        /// Configured output cap.
        limit: usize,
    },
}

/// A zlib decompressor.
pub trait Inflater: Send + Sync {
    /// Short backend name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Inflate a complete zlib stream, refusing to produce more than `limit` bytes.
    fn inflate(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, InflateError>;
}

const GROW_STEP: usize = 32 * 1024;

/// One-shot backend: the whole input goes through a single `flate2::Decompress` state, with the
/// output vector grown as needed.
#[cfg(feature = "inflate-buffer")]
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferInflater;

#[cfg(feature = "inflate-buffer")]
impl Inflater for BufferInflater {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn inflate(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, InflateError> {
        use flate2::{Decompress, FlushDecompress, Status};

        let mut state = Decompress::new(true);
        let mut out = Vec::with_capacity(input.len().saturating_mul(4).clamp(64, GROW_STEP));
        loop {
            if out.len() == out.capacity() {
                out.reserve(GROW_STEP);
            }
            let in_before = state.total_in();
            let out_before = state.total_out();
            let consumed = usize::try_from(in_before).unwrap_or(input.len()).min(input.len());

            let status = state
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Finish)
                .map_err(|e| InflateError::Corrupt(e.to_string()))?;
            if out.len() > limit {
                return Err(InflateError::TooLarge { limit });
            }

            match status {
                Status::StreamEnd => return Ok(out),
                Status::Ok | Status::BufError => {
                    let progressed =
                        state.total_in() != in_before || state.total_out() != out_before;
                    if !progressed && out.len() < out.capacity() {
                        return Err(InflateError::Truncated);
                    }
                }
            }
        }
    }
}

/// Streaming backend: pulls fixed-size chunks out of a `flate2::read::ZlibDecoder`.
#[cfg(feature = "inflate-stream")]
#[derive(Debug, Clone, Copy)]
pub struct StreamInflater {
    chunk_size: usize,
}

#[cfg(feature = "inflate-stream")]
impl StreamInflater {
    /// Build a streaming backend reading `chunk_size` bytes at a time (minimum 1).
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

#[cfg(feature = "inflate-stream")]
impl Default for StreamInflater {
    fn default() -> Self {
        Self::new(8 * 1024)
    }
}

#[cfg(feature = "inflate-stream")]
impl Inflater for StreamInflater {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn inflate(&self, input: &[u8], limit: usize) -> Result<Vec<u8>, InflateError> {
        use std::io::Read as _;

        let mut decoder = flate2::read::ZlibDecoder::new(input);
        let mut chunk = vec![0u8; self.chunk_size];
        let mut out = Vec::new();
        loop {
            let n = match decoder.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(InflateError::Truncated);
                }
                Err(e) => return Err(InflateError::Corrupt(e.to_string())),
            };
            if n == 0 {
                return Ok(out);
            }
            if out.len() + n > limit {
                return Err(InflateError::TooLarge { limit });
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Ordered list of inflate backends; the first one that succeeds wins.
pub struct InflateChain {
    backends: Vec<Box<dyn Inflater>>,
}

impl InflateChain {
    /// Build the chain from whatever backends were compiled into this build.
    ///
    /// Meant to run once at startup; the resulting chain is reused for every extraction.
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut backends: Vec<Box<dyn Inflater>> = Vec::new();
        #[cfg(feature = "inflate-buffer")]
        backends.push(Box::new(BufferInflater));
        #[cfg(feature = "inflate-stream")]
        backends.push(Box::new(StreamInflater::default()));

        let chain = Self { backends };
        tracing::debug!(backends = ?chain.backend_names(), "inflate chain detected");
        chain
    }

    /// Build a chain from an explicit backend list.
    pub fn with_backends(backends: Vec<Box<dyn Inflater>>) -> Self {
        Self { backends }
    }

    /// A chain without any backend; every inflate soft-misses.
    pub fn empty() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// True if no backend is available.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Names of the backends in try order.
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Inflate `input` with the first backend that succeeds.
    ///
    /// Returns `None` when every backend fails or none is available.
    pub fn inflate(&self, input: &[u8], limit: usize) -> Option<Vec<u8>> {
        if self.backends.is_empty() {
            tracing::warn!("no zlib decompression backend available; skipping embedded metadata");
            return None;
        }
        for backend in &self.backends {
            match backend.inflate(input, limit) {
                Ok(out) => {
                    tracing::trace!(backend = backend.name(), bytes = out.len(), "inflated");
                    return Some(out);
                }
                Err(err) => {
                    tracing::warn!(backend = backend.name(), %err, "zlib inflate failed");
                }
            }
        }
        None
    }
}

impl Default for InflateChain {
    fn default() -> Self {
        Self::detect()
    }
}

impl fmt::Debug for InflateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InflateChain")
            .field("backends", &self.backend_names())
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/metadata/inflate.rs"]
mod tests;
