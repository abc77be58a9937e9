//! Byte-level location of the embedded metadata block.
//!
//! The container is binary, so the scan compares raw bytes rather than decoding text. The marker
//! and the bracketed payload after it are plain ASCII.

/// Marker written in front of the embedded effect payload.
pub const EFFECT_MARKER: &str = "yyeffectmp4json";

/// Bytes inspected after the marker when looking for the bracketed payload.
pub const DEFAULT_SCAN_WINDOW: usize = 50_000;

const OPEN: &[u8] = b"[[";
const CLOSE: &[u8] = b"]]";

/// Return the offset of the first occurrence of `marker` in `buf`.
///
/// An empty marker never matches. A marker longer than the buffer simply yields `None`.
pub fn find_marker(buf: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.is_empty() || marker.len() > buf.len() {
        return None;
    }
    let first = marker[0];
    let last_start = buf.len() - marker.len();
    let mut i = 0;
    while i <= last_start {
        // Cheap first-byte filter before the full comparison.
        if buf[i] == first && &buf[i..i + marker.len()] == marker {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Extract the base64 text between `[[` and `]]` that follows a marker.
///
/// Only the `window` bytes right after the marker are considered. The payload must be a
/// non-empty run of base64 alphabet bytes closed by `]]`; anything else yields `None`.
pub fn extract_payload(
    buf: &[u8],
    marker_offset: usize,
    marker_len: usize,
    window: usize,
) -> Option<&str> {
    let start = marker_offset.checked_add(marker_len)?;
    if start > buf.len() {
        return None;
    }
    let end = start.saturating_add(window).min(buf.len());
    let region = &buf[start..end];

    let mut search = 0;
    while let Some(rel) = find_marker(&region[search..], OPEN) {
        let body_start = search + rel + OPEN.len();
        let body_len = region[body_start..]
            .iter()
            .take_while(|b| is_base64_byte(**b))
            .count();
        let body_end = body_start + body_len;
        if body_len > 0 && region[body_end..].starts_with(CLOSE) {
            // The alphabet is pure ASCII, so this cannot fail.
            return std::str::from_utf8(&region[body_start..body_end]).ok();
        }
        search = search + rel + 1;
    }
    None
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

#[cfg(test)]
#[path = "../../tests/unit/metadata/marker.rs"]
mod tests;
