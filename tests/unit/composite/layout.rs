use super::*;

fn packed(size: Size, left: impl Fn(u32, u32) -> [u8; 4], right: impl Fn(u32, u32) -> [u8; 4]) -> Vec<u8> {
    let half = size.width / 2;
    let mut out = Vec::with_capacity(size.pixel_count() * 4);
    for y in 0..size.height {
        for x in 0..size.width {
            let px = if x < half { left(x, y) } else { right(x - half, y) };
            out.extend_from_slice(&px);
        }
    }
    out
}

#[test]
fn side_by_side_halves_resolve() {
    let src = Size::new(8, 3).unwrap();
    let l = AlphaLayout::Left.resolve(src).unwrap();
    assert_eq!(l.alpha, PixelRect::new(0, 0, 4, 3));
    assert_eq!(l.color, PixelRect::new(4, 0, 4, 3));
    assert_eq!(l.alpha_plane, Plane::Primary);

    let r = AlphaLayout::Right.resolve(src).unwrap();
    assert_eq!(r.color, PixelRect::new(0, 0, 4, 3));
    assert_eq!(r.alpha, PixelRect::new(4, 0, 4, 3));
}

#[test]
fn side_by_side_needs_two_columns() {
    assert!(AlphaLayout::Left.resolve(Size::new(1, 4).unwrap()).is_err());
}

#[test]
fn separate_uses_alpha_plane() {
    let src = Size::new(2, 2).unwrap();
    let s = AlphaLayout::Separate.resolve(src).unwrap();
    assert_eq!(s.alpha_plane, Plane::Alpha);
    assert_eq!(s.color, s.alpha);
    assert!(AlphaLayout::Separate.needs_alpha_buffer());
    assert!(!AlphaLayout::Right.needs_alpha_buffer());
}

#[test]
fn regions_must_fit_source() {
    let src = Size::new(12, 4).unwrap();
    let ok = AlphaLayout::Regions {
        color: PixelRect::new(0, 0, 8, 4),
        alpha: PixelRect::new(8, 0, 4, 2),
    };
    assert_eq!(ok.resolve(src).unwrap().alpha, PixelRect::new(8, 0, 4, 2));

    let bad = AlphaLayout::Regions {
        color: PixelRect::new(0, 0, 8, 4),
        alpha: PixelRect::new(10, 0, 4, 2),
    };
    assert!(bad.resolve(src).is_err());

    let empty = AlphaLayout::Regions {
        color: PixelRect::new(0, 0, 0, 4),
        alpha: PixelRect::new(8, 0, 4, 2),
    };
    assert!(empty.resolve(src).is_err());
}

#[test]
fn layout_json_shape_is_tagged() {
    let v = serde_json::to_value(AlphaLayout::Left).unwrap();
    assert_eq!(v, serde_json::json!({ "kind": "left" }));
    let back: AlphaLayout = serde_json::from_value(v).unwrap();
    assert_eq!(back, AlphaLayout::Left);
}

#[test]
fn detects_grayscale_half_as_alpha() {
    let size = Size::new(16, 8).unwrap();
    let gray = |x: u32, _y: u32| {
        let v = (x * 30) as u8;
        [v, v, v, 255]
    };
    let red = |_x: u32, _y: u32| [220, 40, 30, 255];

    let buf = packed(size, gray, red);
    assert_eq!(detect_alpha_side(&buf, size), Some(AlphaSide::Left));

    let buf = packed(size, red, gray);
    assert_eq!(detect_alpha_side(&buf, size), Some(AlphaSide::Right));
    assert_eq!(AlphaSide::Right.layout(), AlphaLayout::Right);
}

#[test]
fn plain_color_video_is_not_dual_channel() {
    let size = Size::new(16, 8).unwrap();
    let red = |_x: u32, _y: u32| [220, 40, 30, 255];
    let blue = |_x: u32, _y: u32| [30, 40, 220, 255];
    assert_eq!(detect_alpha_side(&packed(size, red, blue), size), None);

    let gray = |_x: u32, _y: u32| [90, 90, 90, 255];
    assert_eq!(detect_alpha_side(&packed(size, gray, gray), size), None);
}

#[test]
fn short_buffers_are_rejected() {
    let size = Size::new(4, 4).unwrap();
    assert_eq!(detect_alpha_side(&[0u8; 8], size), None);
    assert_eq!(detect_alpha_side(&[0u8; 16], Size::new(1, 4).unwrap()), None);
}
