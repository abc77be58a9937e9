/// Color + alpha merge into RGBA rasters.
pub mod compositor;
/// Sub-frame placement and alpha-side detection.
pub mod layout;
/// Resampling taps.
pub mod sample;
/// Worker-side buffer pool.
pub mod scratch_pool;
