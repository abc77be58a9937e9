//! Best-effort extraction of the embedded effect document from container bytes.
//!
//! Every failure along the way (no marker, bad base64, inflate failure, invalid JSON, wrong
//! `isEffect`) ends in `None`: a file without usable metadata looks exactly like a file that
//! never had any.

use std::path::Path;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

use crate::foundation::error::{DualframeError, DualframeResult};
use crate::metadata::inflate::InflateChain;
use crate::metadata::marker::{DEFAULT_SCAN_WINDOW, EFFECT_MARKER, extract_payload, find_marker};
use crate::metadata::model::MetadataDocument;

/// Standard alphabet; trailing `=` padding may be present or omitted.
const PAYLOAD_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Options for [`Extractor`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExtractOpts {
    /// ASCII marker preceding the payload.
    pub marker: String,
    /// Bytes after the marker searched for the `[[...]]` payload.
    pub scan_window: usize,
    /// Upper bound on the inflated document size.
    pub max_inflated_bytes: usize,
}

impl Default for ExtractOpts {
    fn default() -> Self {
        Self {
            marker: EFFECT_MARKER.to_string(),
            scan_window: DEFAULT_SCAN_WINDOW,
            max_inflated_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ExtractOpts {
    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(s: &str) -> DualframeResult<Self> {
        let opts: Self = serde_json::from_str(s).map_err(|e| DualframeError::serde(e.to_string()))?;
        if opts.marker.is_empty() {
            return Err(DualframeError::validation("extract marker must be non-empty"));
        }
        Ok(opts)
    }
}

/// Locates, decodes and validates embedded effect documents.
///
/// Build once (this probes the available inflate backends) and reuse for every file.
#[derive(Debug)]
pub struct Extractor {
    opts: ExtractOpts,
    chain: InflateChain,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(ExtractOpts::default())
    }
}

impl Extractor {
    /// Build an extractor with the inflate backends compiled into this build.
    pub fn new(opts: ExtractOpts) -> Self {
        Self::with_chain(opts, InflateChain::detect())
    }

    /// Build an extractor with an explicit inflate chain.
    pub fn with_chain(opts: ExtractOpts, chain: InflateChain) -> Self {
        Self { opts, chain }
    }

    /// Options in use.
    pub fn opts(&self) -> &ExtractOpts {
        &self.opts
    }

    /// Extract the effect document from raw container bytes.
    #[tracing::instrument(skip(self, buf), fields(len = buf.len()))]
    pub fn extract(&self, buf: &[u8]) -> Option<MetadataDocument> {
        let marker = self.opts.marker.as_bytes();
        let Some(offset) = find_marker(buf, marker) else {
            tracing::debug!("no effect marker found");
            return None;
        };

        let Some(encoded) = extract_payload(buf, offset, marker.len(), self.opts.scan_window)
        else {
            tracing::warn!(offset, "effect marker found but no bracketed payload follows");
            return None;
        };

        let doc = match self.decode_payload(encoded) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(%err, "embedded effect document rejected");
                return None;
            }
        };

        let dups = doc.duplicate_tags();
        if !dups.is_empty() {
            tracing::warn!(
                tags = ?dups,
                "effect table has duplicate tags; lookups use the first match"
            );
        }
        tracing::debug!(
            effects = doc.effects.len(),
            frames = doc.frames.len(),
            "effect document extracted"
        );
        Some(doc)
    }

    /// Decode a bracketed payload body (base64 of zlib-compressed JSON) into a validated
    /// document.
    pub fn decode_payload(&self, encoded: &str) -> DualframeResult<MetadataDocument> {
        let compressed = PAYLOAD_BASE64
            .decode(encoded)
            .map_err(|e| DualframeError::decode(format!("payload is not valid base64: {e}")))?;
        let json = self
            .chain
            .inflate(&compressed, self.opts.max_inflated_bytes)
            .ok_or_else(|| DualframeError::decode("no inflate backend accepted the payload"))?;
        MetadataDocument::from_json_slice(&json)
    }

    /// Read a file and extract its effect document. Read failures are soft misses too.
    pub fn extract_from_path(&self, path: impl AsRef<Path>) -> Option<MetadataDocument> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => self.extract(&bytes),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "failed to read container");
                None
            }
        }
    }
}

/// Extract with default options. Builds a fresh [`Extractor`]; reuse one for batches.
pub fn extract_metadata(buf: &[u8]) -> Option<MetadataDocument> {
    Extractor::default().extract(buf)
}

#[cfg(test)]
#[path = "../../tests/unit/metadata/extract.rs"]
mod tests;
