//! Source-to-target resampling taps.
//!
//! Each output column and row is mapped to two source taps and a fixed-point weight (0..=256)
//! for the second tap. Nearest sampling uses the same representation with a zero weight, so the
//! pixel loop is identical for both policies.

/// Resampling policy, applied to color and alpha alike.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sampling {
    /// Pick the source pixel whose center is closest.
    #[default]
    Nearest,
    /// Blend the four surrounding source pixels.
    Bilinear,
}

const ONE: u32 = 256;

/// Precomputed taps along one axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AxisTaps {
    pub(crate) i0: Vec<u32>,
    pub(crate) i1: Vec<u32>,
    pub(crate) w1: Vec<u32>,
}

impl AxisTaps {
    /// Taps mapping `dst_len` outputs onto `src_len` inputs (both non-zero).
    pub(crate) fn new(src_len: u32, dst_len: u32, sampling: Sampling) -> Self {
        let n = dst_len as usize;
        let mut taps = Self {
            i0: Vec::with_capacity(n),
            i1: Vec::with_capacity(n),
            w1: Vec::with_capacity(n),
        };
        let last = src_len.saturating_sub(1);
        for d in 0..dst_len {
            match sampling {
                Sampling::Nearest => {
                    // floor((d + 0.5) * src / dst), exact in integers.
                    let s = ((2 * u64::from(d) + 1) * u64::from(src_len)) / (2 * u64::from(dst_len));
                    let s = (s as u32).min(last);
                    taps.i0.push(s);
                    taps.i1.push(s);
                    taps.w1.push(0);
                }
                Sampling::Bilinear => {
                    let f = ((f64::from(d) + 0.5) * f64::from(src_len) / f64::from(dst_len) - 0.5)
                        .clamp(0.0, f64::from(last));
                    let s0 = f.floor() as u32;
                    let s1 = (s0 + 1).min(last);
                    let w = ((f - f64::from(s0)) * f64::from(ONE)).round() as u32;
                    taps.i0.push(s0);
                    taps.i1.push(s1);
                    taps.w1.push(w.min(ONE));
                }
            }
        }
        taps
    }
}

#[inline]
pub(crate) fn lerp_u8(a: u8, b: u8, w1: u32) -> u32 {
    u32::from(a) * (ONE - w1) + u32::from(b) * w1
}

/// Blend four taps for one channel. `wx` / `wy` are weights of the second column / row.
#[inline]
pub(crate) fn blend4(p00: u8, p10: u8, p01: u8, p11: u8, wx: u32, wy: u32) -> u8 {
    let top = lerp_u8(p00, p10, wx);
    let bottom = lerp_u8(p01, p11, wx);
    let v = top * (ONE - wy) + bottom * wy;
    ((v + ONE * ONE / 2) / (ONE * ONE)).min(255) as u8
}

#[cfg(test)]
#[path = "../../tests/unit/composite/sample.rs"]
mod tests;
