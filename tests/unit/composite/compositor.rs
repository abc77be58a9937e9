use super::*;

fn sz(w: u32, h: u32) -> Size {
    Size::new(w, h).unwrap()
}

fn solid(size: Size, px: [u8; 4]) -> Vec<u8> {
    px.repeat(size.pixel_count())
}

fn compositor() -> Compositor {
    Compositor::new(CompositorOpts::default()).unwrap()
}

#[test]
fn opaque_alpha_keeps_color_and_sets_full_coverage() {
    let src = sz(2, 2);
    let color = vec![
        10, 20, 30, 0, 40, 50, 60, 0, //
        70, 80, 90, 0, 100, 110, 120, 0,
    ];
    let geom = FrameGeometry {
        source: src,
        target: src,
        layout: AlphaLayout::Separate,
    };
    let out = compositor()
        .composite(&geom, FrameInput::separate(color, solid(src, [255, 255, 255, 255])))
        .unwrap();

    assert_eq!(out.size(), src);
    assert_eq!(out.pixel(0, 0), Some([10, 20, 30, 255]));
    assert_eq!(out.pixel(1, 1), Some([100, 110, 120, 255]));
    assert!(out.data.chunks_exact(4).all(|px| px[3] == 255));
}

#[test]
fn alpha_is_read_from_red_channel() {
    let src = sz(1, 1);
    let geom = FrameGeometry {
        source: src,
        target: src,
        layout: AlphaLayout::Separate,
    };
    let out = compositor()
        .composite(
            &geom,
            FrameInput::separate(vec![1, 2, 3, 4], vec![77, 255, 255, 255]),
        )
        .unwrap();
    assert_eq!(out.data, vec![1, 2, 3, 77]);
}

#[test]
fn packed_left_and_right_layouts_split_halves() {
    // 4x1 packed: two alpha pixels then two color pixels.
    let packed = vec![
        200, 200, 200, 255, 50, 50, 50, 255, //
        9, 8, 7, 255, 6, 5, 4, 255,
    ];
    let geom = FrameGeometry {
        source: sz(4, 1),
        target: sz(2, 1),
        layout: AlphaLayout::Left,
    };
    let out = compositor()
        .composite(&geom, FrameInput::packed(packed.clone()))
        .unwrap();
    assert_eq!(out.data, vec![9, 8, 7, 200, 6, 5, 4, 50]);

    let mut swapped = packed[8..].to_vec();
    swapped.extend_from_slice(&packed[..8]);
    let geom = FrameGeometry {
        layout: AlphaLayout::Right,
        ..geom
    };
    let out = compositor()
        .composite(&geom, FrameInput::packed(swapped))
        .unwrap();
    assert_eq!(out.data, vec![9, 8, 7, 200, 6, 5, 4, 50]);
}

#[test]
fn regions_sample_smaller_alpha_in_normalized_coordinates() {
    // 3x2 packed: color 2x2 at (0,0), alpha 1x1 at (2,0).
    let mut packed = vec![0u8; 3 * 2 * 4];
    for (i, px) in packed.chunks_exact_mut(4).enumerate() {
        px.copy_from_slice(&[i as u8 * 10, 0, 0, 255]);
    }
    packed[8] = 128; // alpha pixel red channel
    let geom = FrameGeometry {
        source: sz(3, 2),
        target: sz(2, 2),
        layout: AlphaLayout::Regions {
            color: PixelRect::new(0, 0, 2, 2),
            alpha: PixelRect::new(2, 0, 1, 1),
        },
    };
    let out = compositor()
        .composite(&geom, FrameInput::packed(packed))
        .unwrap();
    assert_eq!(out.pixel(0, 0), Some([0, 0, 0, 128]));
    assert_eq!(out.pixel(1, 0), Some([10, 0, 0, 128]));
    assert_eq!(out.pixel(0, 1), Some([30, 0, 0, 128]));
    assert_eq!(out.pixel(1, 1), Some([40, 0, 0, 128]));
}

#[test]
fn nearest_downscale_picks_center_samples() {
    let src = sz(4, 1);
    let color = vec![
        0, 0, 0, 0, 10, 10, 10, 0, 20, 20, 20, 0, 30, 30, 30, 0,
    ];
    let geom = FrameGeometry {
        source: src,
        target: sz(2, 1),
        layout: AlphaLayout::Separate,
    };
    let out = compositor()
        .composite(&geom, FrameInput::separate(color, solid(src, [255; 4])))
        .unwrap();
    assert_eq!(out.data, vec![10, 10, 10, 255, 30, 30, 30, 255]);
}

#[test]
fn bilinear_upscale_blends_neighbors() {
    let src = sz(2, 1);
    let mut c = Compositor::new(CompositorOpts {
        sampling: Sampling::Bilinear,
        ..CompositorOpts::default()
    })
    .unwrap();
    let geom = FrameGeometry {
        source: src,
        target: sz(4, 1),
        layout: AlphaLayout::Separate,
    };
    let color = vec![0, 0, 0, 0, 255, 255, 255, 0];
    let alpha = vec![255, 0, 0, 0, 0, 0, 0, 0];
    let out = c.composite(&geom, FrameInput::separate(color, alpha)).unwrap();
    let reds: Vec<u8> = out.data.chunks_exact(4).map(|px| px[0]).collect();
    let alphas: Vec<u8> = out.data.chunks_exact(4).map(|px| px[3]).collect();
    assert_eq!(reds, vec![0, 64, 191, 255]);
    assert_eq!(alphas, vec![255, 191, 64, 0]);
}

#[test]
fn parallel_rows_match_sequential_rows() {
    let src = sz(7, 5);
    let color: Vec<u8> = (0..src.pixel_count() * 4).map(|i| (i * 7 % 251) as u8).collect();
    let alpha: Vec<u8> = (0..src.pixel_count() * 4).map(|i| (i * 3 % 253) as u8).collect();
    let geom = FrameGeometry {
        source: src,
        target: sz(11, 9),
        layout: AlphaLayout::Separate,
    };

    let run = |threshold: usize| {
        let mut c = Compositor::new(CompositorOpts {
            sampling: Sampling::Bilinear,
            parallel_rows_threshold: threshold,
            threads: Some(2),
            ..CompositorOpts::default()
        })
        .unwrap();
        c.composite(&geom, FrameInput::separate(color.clone(), alpha.clone()))
            .unwrap()
    };
    assert_eq!(run(0), run(usize::MAX));
}

#[test]
fn buffer_length_mismatches_are_rejected() {
    let src = sz(2, 2);
    let geom = FrameGeometry {
        source: src,
        target: src,
        layout: AlphaLayout::Separate,
    };
    let mut c = compositor();

    let err = c
        .composite(&geom, FrameInput::separate(vec![0; 15], solid(src, [0; 4])))
        .unwrap_err();
    assert!(matches!(err, DualframeError::Validation(_)));

    let err = c
        .composite(&geom, FrameInput::separate(solid(src, [0; 4]), vec![0; 4]))
        .unwrap_err();
    assert!(matches!(err, DualframeError::Validation(_)));

    let err = c
        .composite(&geom, FrameInput::packed(solid(src, [0; 4])))
        .unwrap_err();
    assert!(err.to_string().contains("requires an alpha buffer"));
}

#[test]
fn zero_threads_is_rejected() {
    let err = Compositor::new(CompositorOpts {
        threads: Some(0),
        ..CompositorOpts::default()
    })
    .unwrap_err();
    assert!(matches!(err, DualframeError::Validation(_)));
}

#[test]
fn batch_preserves_order_and_reports_increasing_progress() {
    let src = sz(1, 1);
    let geom = FrameGeometry {
        source: src,
        target: src,
        layout: AlphaLayout::Separate,
    };
    let frames = (0..4u8)
        .map(|i| FrameInput::separate(vec![i, i, i, 0], vec![255, 0, 0, 0]))
        .collect();

    let mut progress = Vec::new();
    let out = compositor()
        .composite_batch(&geom, frames, |p| progress.push(p), || false)
        .unwrap();

    let firsts: Vec<u8> = out.iter().map(|f| f.data[0]).collect();
    assert_eq!(firsts, vec![0, 1, 2, 3]);
    assert_eq!(progress, vec![0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn empty_batch_reports_completion_once() {
    let src = sz(1, 1);
    let geom = FrameGeometry {
        source: src,
        target: src,
        layout: AlphaLayout::Separate,
    };
    let mut progress = Vec::new();
    let out = compositor()
        .composite_batch(&geom, Vec::new(), |p| progress.push(p), || false)
        .unwrap();
    assert!(out.is_empty());
    assert_eq!(progress, vec![1.0]);
}

#[test]
fn cancelled_batch_stops_between_frames() {
    let src = sz(1, 1);
    let geom = FrameGeometry {
        source: src,
        target: src,
        layout: AlphaLayout::Separate,
    };
    let frames = (0..3u8)
        .map(|_| FrameInput::separate(vec![0; 4], vec![0; 4]))
        .collect();

    let done = std::cell::Cell::new(0u32);
    let err = compositor()
        .composite_batch(&geom, frames, |_| done.set(done.get() + 1), || done.get() >= 1)
        .unwrap_err();
    assert!(matches!(err, DualframeError::Composite(CompositeError::Cancelled)));
    assert_eq!(done.get(), 1);
}

#[test]
fn consumed_inputs_feed_later_outputs_and_clear_memory_drops_them() {
    let src = sz(32, 32);
    let geom = FrameGeometry {
        source: src,
        target: src,
        layout: AlphaLayout::Separate,
    };
    let mut c = compositor();
    for _ in 0..2 {
        c.composite(
            &geom,
            FrameInput::separate(solid(src, [1, 2, 3, 4]), solid(src, [255; 4])),
        )
        .unwrap();
    }
    let st = c.pool_stats();
    assert!(st.reuses >= 1);
    assert!(st.retained_buffers >= 1);

    c.clear_memory();
    assert_eq!(c.pool_stats(), ScratchPoolStats::default());
}
