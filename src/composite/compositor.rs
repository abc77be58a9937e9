use rayon::prelude::*;

use crate::composite::layout::{AlphaLayout, Plane, ResolvedLayout};
use crate::composite::sample::{AxisTaps, Sampling, blend4};
use crate::composite::scratch_pool::{ScratchPool, ScratchPoolOpts, ScratchPoolStats};
use crate::foundation::core::{PixelBuffer, PixelRect, RgbaFrame, Size};
use crate::foundation::error::{CompositeError, DualframeError, DualframeResult};

/// Compositor configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CompositorOpts {
    /// Resampling policy for color and alpha.
    pub sampling: Sampling,
    /// Targets with at least this many pixels have their rows filled in parallel.
    pub parallel_rows_threshold: usize,
    /// Optional fixed worker count for row parallelism (`None` = rayon default).
    pub threads: Option<usize>,
    /// Scratch pool caps.
    pub scratch: ScratchPoolOpts,
}

impl Default for CompositorOpts {
    fn default() -> Self {
        Self {
            sampling: Sampling::default(),
            parallel_rows_threshold: 256 * 256,
            threads: None,
            scratch: ScratchPoolOpts::default(),
        }
    }
}

/// Source and target dimensions plus sub-frame placement for one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameGeometry {
    /// Dimensions of the buffers handed in (each buffer for `Separate`, the packed buffer
    /// otherwise).
    pub source: Size,
    /// Dimensions of the composited output.
    pub target: Size,
    /// Where alpha lives.
    pub layout: AlphaLayout,
}

/// Buffers for one frame. Ownership moves into the compositor.
#[derive(Debug)]
pub struct FrameInput {
    /// Color buffer, or the packed buffer for side-by-side and region layouts.
    pub color: PixelBuffer,
    /// Separate alpha buffer; required only for [`AlphaLayout::Separate`].
    pub alpha: Option<PixelBuffer>,
}

impl FrameInput {
    /// Input for a packed layout.
    pub fn packed(buf: impl Into<PixelBuffer>) -> Self {
        Self {
            color: buf.into(),
            alpha: None,
        }
    }

    /// Input for [`AlphaLayout::Separate`].
    pub fn separate(color: impl Into<PixelBuffer>, alpha: impl Into<PixelBuffer>) -> Self {
        Self {
            color: color.into(),
            alpha: Some(alpha.into()),
        }
    }
}

/// Merges color and alpha sub-frames into straight-alpha RGBA rasters.
pub struct Compositor {
    opts: CompositorOpts,
    pool: ScratchPool,
    threads: rayon::ThreadPool,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("opts", &self.opts)
            .field("pool", &self.pool)
            .field("threads", &self.threads.current_num_threads())
            .finish()
    }
}

fn build_thread_pool(threads: Option<usize>) -> DualframeResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(DualframeError::validation(
            "compositor 'threads' must be >= 1 when set",
        ));
    }
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| DualframeError::validation(format!("failed to build rayon thread pool: {e}")))
}

/// Taps and borrowed sources for one job; shared read-only across row workers.
struct RowSampler<'a> {
    color_src: &'a [u8],
    alpha_src: &'a [u8],
    stride: usize,
    color: PixelRect,
    alpha: PixelRect,
    cx: AxisTaps,
    cy: AxisTaps,
    ax: AxisTaps,
    ay: AxisTaps,
}

impl RowSampler<'_> {
    fn fill_row(&self, y: usize, row: &mut [u8]) {
        let cy0 = (self.color.y + self.cy.i0[y]) as usize * self.stride;
        let cy1 = (self.color.y + self.cy.i1[y]) as usize * self.stride;
        let cwy = self.cy.w1[y];
        let ay0 = (self.alpha.y + self.ay.i0[y]) as usize * self.stride;
        let ay1 = (self.alpha.y + self.ay.i1[y]) as usize * self.stride;
        let awy = self.ay.w1[y];

        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let cx0 = (self.color.x + self.cx.i0[x]) as usize;
            let cx1 = (self.color.x + self.cx.i1[x]) as usize;
            let cwx = self.cx.w1[x];
            let (i00, i10) = ((cy0 + cx0) * 4, (cy0 + cx1) * 4);
            let (i01, i11) = ((cy1 + cx0) * 4, (cy1 + cx1) * 4);
            let c = self.color_src;
            for ch in 0..3 {
                px[ch] = blend4(c[i00 + ch], c[i10 + ch], c[i01 + ch], c[i11 + ch], cwx, cwy);
            }

            // Alpha sub-frame is grayscale; its red channel is the coverage.
            let ax0 = (self.alpha.x + self.ax.i0[x]) as usize;
            let ax1 = (self.alpha.x + self.ax.i1[x]) as usize;
            let a = self.alpha_src;
            px[3] = blend4(
                a[(ay0 + ax0) * 4],
                a[(ay0 + ax1) * 4],
                a[(ay1 + ax0) * 4],
                a[(ay1 + ax1) * 4],
                self.ax.w1[x],
                awy,
            );
        }
    }
}

impl Compositor {
    /// Create a compositor with an empty scratch pool.
    pub fn new(opts: CompositorOpts) -> DualframeResult<Self> {
        Ok(Self {
            opts,
            pool: ScratchPool::new(opts.scratch),
            threads: build_thread_pool(opts.threads)?,
        })
    }

    /// Active options.
    pub fn opts(&self) -> &CompositorOpts {
        &self.opts
    }

    /// Scratch pool counters.
    pub fn pool_stats(&self) -> ScratchPoolStats {
        self.pool.stats()
    }

    /// Drop every pooled buffer.
    pub fn clear_memory(&mut self) {
        let before = self.pool.stats();
        self.pool.clear();
        tracing::debug!(
            released_buffers = before.retained_buffers,
            released_bytes = before.retained_bytes,
            "scratch pool cleared"
        );
    }

    /// Composite one frame.
    pub fn composite(
        &mut self,
        geom: &FrameGeometry,
        input: FrameInput,
    ) -> DualframeResult<RgbaFrame> {
        let resolved = geom.layout.resolve(geom.source)?;
        self.composite_resolved(geom, &resolved, input)
    }

    /// Composite a batch in order, reporting progress after each frame.
    ///
    /// `is_cancelled` is polled before every frame; a cancelled batch fails with
    /// [`CompositeError::Cancelled`] and its remaining inputs are dropped. An empty batch still
    /// reports `1.0` once.
    pub fn composite_batch(
        &mut self,
        geom: &FrameGeometry,
        frames: Vec<FrameInput>,
        mut on_progress: impl FnMut(f32),
        is_cancelled: impl Fn() -> bool,
    ) -> DualframeResult<Vec<RgbaFrame>> {
        let resolved = geom.layout.resolve(geom.source)?;
        let total = frames.len();
        if total == 0 {
            on_progress(1.0);
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(total);
        for (i, input) in frames.into_iter().enumerate() {
            if is_cancelled() {
                return Err(CompositeError::Cancelled.into());
            }
            out.push(self.composite_resolved(geom, &resolved, input)?);
            on_progress((i + 1) as f32 / total as f32);
        }
        Ok(out)
    }

    fn composite_resolved(
        &mut self,
        geom: &FrameGeometry,
        resolved: &ResolvedLayout,
        input: FrameInput,
    ) -> DualframeResult<RgbaFrame> {
        let expected = geom.source.rgba_len()?;
        if expected == 0 || geom.target.pixel_count() == 0 {
            return Err(DualframeError::validation(format!(
                "source and target must be non-empty, got {}x{} -> {}x{}",
                geom.source.width, geom.source.height, geom.target.width, geom.target.height
            )));
        }
        if input.color.len() != expected {
            return Err(DualframeError::validation(format!(
                "color buffer is {} bytes, expected {expected} for a {}x{} source",
                input.color.len(),
                geom.source.width,
                geom.source.height
            )));
        }
        let alpha_buf = match (resolved.alpha_plane, input.alpha) {
            (Plane::Alpha, Some(a)) if a.len() == expected => Some(a),
            (Plane::Alpha, Some(a)) => {
                return Err(DualframeError::validation(format!(
                    "alpha buffer is {} bytes, expected {expected}",
                    a.len()
                )));
            }
            (Plane::Alpha, None) => {
                return Err(DualframeError::validation(
                    "separate layout requires an alpha buffer",
                ));
            }
            (Plane::Primary, extra) => {
                if let Some(a) = extra {
                    tracing::debug!(bytes = a.len(), "ignoring alpha buffer for packed layout");
                    self.pool.release(a.into_vec());
                }
                None
            }
        };

        let out_len = geom.target.rgba_len()?;
        let mut out = self.pool.take(out_len);
        let row_bytes = geom.target.width as usize * 4;
        let sampling = self.opts.sampling;
        {
            let color_src = input.color.as_slice();
            let alpha_src = alpha_buf.as_ref().map_or(color_src, PixelBuffer::as_slice);
            let sampler = RowSampler {
                color_src,
                alpha_src,
                stride: geom.source.width as usize,
                color: resolved.color,
                alpha: resolved.alpha,
                cx: AxisTaps::new(resolved.color.width, geom.target.width, sampling),
                cy: AxisTaps::new(resolved.color.height, geom.target.height, sampling),
                ax: AxisTaps::new(resolved.alpha.width, geom.target.width, sampling),
                ay: AxisTaps::new(resolved.alpha.height, geom.target.height, sampling),
            };

            if geom.target.pixel_count() >= self.opts.parallel_rows_threshold {
                self.threads.install(|| {
                    out.par_chunks_mut(row_bytes)
                        .enumerate()
                        .for_each(|(y, row)| sampler.fill_row(y, row));
                });
            } else {
                for (y, row) in out.chunks_mut(row_bytes).enumerate() {
                    sampler.fill_row(y, row);
                }
            }
        }

        self.pool.release(input.color.into_vec());
        if let Some(a) = alpha_buf {
            self.pool.release(a.into_vec());
        }

        Ok(RgbaFrame {
            width: geom.target.width,
            height: geom.target.height,
            data: out,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composite/compositor.rs"]
mod tests;
