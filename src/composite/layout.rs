//! Where the color and alpha sub-frames live in the buffers handed to the compositor.

use crate::foundation::core::{PixelRect, Size};
use crate::foundation::error::{DualframeError, DualframeResult};

/// Placement of the alpha sub-frame relative to the color sub-frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AlphaLayout {
    /// Alpha arrives in its own buffer with the same dimensions as the color buffer.
    Separate,
    /// One packed side-by-side buffer; alpha is the left half.
    Left,
    /// One packed side-by-side buffer; alpha is the right half.
    Right,
    /// One packed buffer with explicit sub-frame rectangles. The alpha region may be smaller
    /// than the color region and is sampled in normalized coordinates.
    Regions {
        /// Color sub-frame.
        color: PixelRect,
        /// Alpha sub-frame.
        alpha: PixelRect,
    },
}

/// Which buffer a sub-frame is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plane {
    /// The primary (color or packed) buffer.
    Primary,
    /// The separate alpha buffer.
    Alpha,
}

/// Concrete sub-frame rectangles for one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedLayout {
    /// Color region inside the primary buffer.
    pub color: PixelRect,
    /// Buffer holding the alpha region.
    pub alpha_plane: Plane,
    /// Alpha region inside `alpha_plane`.
    pub alpha: PixelRect,
}

impl AlphaLayout {
    /// True if the layout needs a second buffer for alpha.
    pub fn needs_alpha_buffer(self) -> bool {
        matches!(self, Self::Separate)
    }

    /// Resolve sub-frame rectangles for buffers of `source` dimensions.
    pub fn resolve(self, source: Size) -> DualframeResult<ResolvedLayout> {
        let full = PixelRect::new(0, 0, source.width, source.height);
        let resolved = match self {
            Self::Separate => ResolvedLayout {
                color: full,
                alpha_plane: Plane::Alpha,
                alpha: full,
            },
            Self::Left | Self::Right => {
                let half = source.width / 2;
                if half == 0 {
                    return Err(DualframeError::validation(format!(
                        "side-by-side layout needs a source at least 2px wide, got {}",
                        source.width
                    )));
                }
                let left = PixelRect::new(0, 0, half, source.height);
                let right = PixelRect::new(half, 0, half, source.height);
                let (alpha, color) = if self == Self::Left {
                    (left, right)
                } else {
                    (right, left)
                };
                ResolvedLayout {
                    color,
                    alpha_plane: Plane::Primary,
                    alpha,
                }
            }
            Self::Regions { color, alpha } => {
                for (name, r) in [("color", color), ("alpha", alpha)] {
                    if r.is_empty() || !r.fits_in(source) {
                        return Err(DualframeError::validation(format!(
                            "{name} region {r:?} does not fit a {}x{} source",
                            source.width, source.height
                        )));
                    }
                }
                ResolvedLayout {
                    color,
                    alpha_plane: Plane::Primary,
                    alpha,
                }
            }
        };
        Ok(resolved)
    }
}

/// Side of a packed frame that carries the grayscale alpha.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlphaSide {
    /// Left half.
    Left,
    /// Right half.
    Right,
}

impl AlphaSide {
    /// Matching packed layout.
    pub fn layout(self) -> AlphaLayout {
        match self {
            Self::Left => AlphaLayout::Left,
            Self::Right => AlphaLayout::Right,
        }
    }
}

const PURE_BLACK_SATURATION: f64 = 0.015;
const SATURATION_DIFF: f64 = 0.02;
const BRIGHTNESS_DIFF: f64 = 0.03;
const DARK_SCENE_DIFF: f64 = 0.003;

#[derive(Clone, Copy, Debug, Default)]
struct HalfMetrics {
    saturation: f64,
    brightness: f64,
}

fn half_metrics(rgba: &[u8], width: u32, rect: PixelRect) -> HalfMetrics {
    let mut sat = 0.0;
    let mut bright = 0.0;
    let mut count = 0u64;
    for y in rect.y..rect.y + rect.height {
        let row = (y as usize * width as usize + rect.x as usize) * 4;
        let Some(px_row) = rgba.get(row..row + rect.width as usize * 4) else {
            break;
        };
        for px in px_row.chunks_exact(4) {
            let r = f64::from(px[0]) / 255.0;
            let g = f64::from(px[1]) / 255.0;
            let b = f64::from(px[2]) / 255.0;
            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            sat += if max == 0.0 { 0.0 } else { (max - min) / max };
            bright += 0.299 * r + 0.587 * g + 0.114 * b;
            count += 1;
        }
    }
    if count == 0 {
        return HalfMetrics::default();
    }
    HalfMetrics {
        saturation: sat / count as f64,
        brightness: bright / count as f64,
    }
}

/// Guess which half of a side-by-side RGBA frame is the alpha sub-frame.
///
/// The alpha half is grayscale, so its mean saturation is near zero while the color half is not.
/// Returns `None` when the frame does not look dual-channel.
pub fn detect_alpha_side(rgba: &[u8], size: Size) -> Option<AlphaSide> {
    let half = size.width / 2;
    if half == 0 || rgba.len() < size.pixel_count().saturating_mul(4) {
        return None;
    }
    let left = half_metrics(rgba, size.width, PixelRect::new(0, 0, half, size.height));
    let right = half_metrics(rgba, size.width, PixelRect::new(half, 0, half, size.height));

    let sat_diff = (left.saturation - right.saturation).abs();
    let bright_diff = (left.brightness - right.brightness).abs();

    let left_black = left.saturation < PURE_BLACK_SATURATION;
    let right_black = right.saturation < PURE_BLACK_SATURATION;
    let (sat_threshold, bright_threshold) = if left_black && right_black {
        (DARK_SCENE_DIFF, DARK_SCENE_DIFF)
    } else {
        (SATURATION_DIFF, BRIGHTNESS_DIFF)
    };

    let dual = (left_black || right_black)
        && (sat_diff > sat_threshold || bright_diff > bright_threshold);
    if !dual {
        return None;
    }
    Some(if left.saturation < right.saturation {
        AlphaSide::Left
    } else {
        AlphaSide::Right
    })
}

#[cfg(test)]
#[path = "../../tests/unit/composite/layout.rs"]
mod tests;
