//! Embedded effect metadata: marker scan, payload decode and the typed document model.

/// Best-effort extraction pipeline.
pub mod extract;
/// zlib backends and the fallback chain.
pub mod inflate;
/// Marker and payload location in raw bytes.
pub mod marker;
/// Typed document and lookups.
pub mod model;
