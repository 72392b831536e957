// THEORY:
// The engine does not encode video. What it hands downstream is a list of
// drawable primitives describing what should be painted over the frame, so a
// transport can rasterise them, ship them to a browser canvas, or ignore them.
//
// Two rasterisers are provided. `draw` paints the shapes and needs nothing but
// the frame. `draw_labels` paints box labels and text primitives and needs a
// font, which the caller loads once with `load_font` and reuses for every frame.
// Text positions are baselines, as a canvas `fillText` would take them.

use crate::core_modules::geometry::Point;
use ab_glyph::{Font, FontVec, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_polygon_mut, draw_text_mut};
use imageproc::point::Point as PixelPoint;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

pub type Color = [u8; 3];

pub const GREEN: Color = [0, 255, 0];
pub const RED: Color = [255, 0, 0];
pub const YELLOW: Color = [255, 255, 0];
pub const CYAN: Color = [0, 255, 255];
pub const PURPLE: Color = [128, 0, 128];

/// Glyph height of labels, in pixels.
pub const LABEL_SCALE: f32 = 16.0;
/// Gap between a box's top edge and the baseline of the text right above it.
const LABEL_GAP: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayBox {
    pub track_id: u64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub label: String,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayLine {
    pub start: Point,
    pub end: Point,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayPolygon {
    pub points: Vec<Point>,
    pub color: Color,
    /// Opacity of an interior fill under the outline; `None` draws the outline only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_alpha: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayText {
    pub position: Point,
    pub text: String,
    pub color: Color,
}

/// Everything that should be painted over one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Overlay {
    pub boxes: Vec<OverlayBox>,
    pub lines: Vec<OverlayLine>,
    pub polygons: Vec<OverlayPolygon>,
    pub texts: Vec<OverlayText>,
}

/// Rasterises polygon fills and outlines, lines and boxes onto `frame`.
pub fn draw(frame: &mut RgbImage, overlay: &Overlay) {
    for polygon in &overlay.polygons {
        if let Some(alpha) = polygon.fill_alpha {
            fill_translucent(frame, &polygon.points, polygon.color, alpha);
        }
        let n = polygon.points.len();
        for i in 0..n {
            let a = polygon.points[i];
            let b = polygon.points[(i + 1) % n];
            draw_segment(frame, a, b, polygon.color);
        }
    }
    for line in &overlay.lines {
        draw_segment(frame, line.start, line.end, line.color);
    }
    for b in &overlay.boxes {
        let width = (b.x2 - b.x1).round() as i64;
        let height = (b.y2 - b.y1).round() as i64;
        if width <= 0 || height <= 0 {
            continue;
        }
        let rect = Rect::at(b.x1.round() as i32, b.y1.round() as i32).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(frame, rect, Rgb(b.color));
    }
}

/// Parses a TrueType/OpenType font for `draw_labels`.
pub fn load_font(bytes: Vec<u8>) -> Result<FontVec, InvalidFont> {
    FontVec::try_from_vec(bytes)
}

/// Writes box labels and text primitives onto `frame` in `font`.
pub fn draw_labels(frame: &mut RgbImage, overlay: &Overlay, font: &impl Font) {
    let scale = PxScale::from(LABEL_SCALE);
    for anchor in label_anchors(overlay) {
        draw_text_mut(frame, Rgb(anchor.color), anchor.x, anchor.y, scale, font, anchor.text);
    }
}

#[derive(Debug, PartialEq)]
struct LabelAnchor<'a> {
    /// Top-left corner of the text, in pixels.
    x: i32,
    y: i32,
    text: &'a str,
    color: Color,
}

fn label_anchors(overlay: &Overlay) -> Vec<LabelAnchor<'_>> {
    let height = f64::from(LABEL_SCALE);
    // A box label sits one text row above the per-track text primitives, which
    // share the `y1 - LABEL_GAP` baseline.
    let boxes = overlay.boxes.iter().map(|b| LabelAnchor {
        x: b.x1.round() as i32,
        y: (b.y1 - LABEL_GAP - 2.0 * height).round() as i32,
        text: &b.label,
        color: b.color,
    });
    let texts = overlay.texts.iter().map(|t| LabelAnchor {
        x: t.position.x.round() as i32,
        y: (t.position.y - height).round() as i32,
        text: &t.text,
        color: t.color,
    });
    boxes.chain(texts).filter(|a| !a.text.is_empty()).collect()
}

/// Blends a filled polygon over `frame` at opacity `alpha`.
fn fill_translucent(frame: &mut RgbImage, points: &[Point], color: Color, alpha: f32) {
    let mut vertices: Vec<PixelPoint<i32>> = points
        .iter()
        .map(|p| PixelPoint::new(p.x.round() as i32, p.y.round() as i32))
        .collect();
    vertices.dedup();
    // draw_polygon_mut rejects an explicitly closed ring.
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    if vertices.len() < 3 {
        return;
    }

    let mut layer = frame.clone();
    draw_polygon_mut(&mut layer, &vertices, Rgb(color));

    let alpha = alpha.clamp(0.0, 1.0);
    for (dst, src) in frame.pixels_mut().zip(layer.pixels()) {
        for c in 0..3 {
            dst[c] = (alpha * f32::from(src[c]) + (1.0 - alpha) * f32::from(dst[c])).round() as u8;
        }
    }
}

fn draw_segment(frame: &mut RgbImage, a: Point, b: Point, color: Color) {
    draw_line_segment_mut(frame, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), Rgb(color));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_box_and_line_pixels() {
        let mut frame = RgbImage::new(64, 64);
        let overlay = Overlay {
            boxes: vec![OverlayBox {
                track_id: 1,
                x1: 10.0,
                y1: 10.0,
                x2: 20.0,
                y2: 20.0,
                label: "ID: 1".into(),
                color: GREEN,
            }],
            lines: vec![OverlayLine {
                start: Point::new(0.0, 40.0),
                end: Point::new(63.0, 40.0),
                color: RED,
            }],
            ..Overlay::default()
        };
        draw(&mut frame, &overlay);
        assert_eq!(frame.get_pixel(10, 10), &Rgb(GREEN));
        assert_eq!(frame.get_pixel(15, 15), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(30, 40), &Rgb(RED));
    }

    #[test]
    fn degenerate_box_is_skipped() {
        let mut frame = RgbImage::new(8, 8);
        let overlay = Overlay {
            boxes: vec![OverlayBox {
                track_id: 0,
                x1: 4.0,
                y1: 4.0,
                x2: 4.0,
                y2: 6.0,
                label: String::new(),
                color: GREEN,
            }],
            ..Overlay::default()
        };
        draw(&mut frame, &overlay);
        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn filled_polygon_is_blended_under_its_outline() {
        let mut frame = RgbImage::new(20, 20);
        let overlay = Overlay {
            polygons: vec![OverlayPolygon {
                points: vec![
                    Point::new(2.0, 2.0),
                    Point::new(17.0, 2.0),
                    Point::new(17.0, 17.0),
                    Point::new(2.0, 17.0),
                ],
                color: PURPLE,
                fill_alpha: Some(0.4),
            }],
            ..Overlay::default()
        };
        draw(&mut frame, &overlay);
        // 0.4 * 128 rounds to 51.
        assert_eq!(frame.get_pixel(10, 10), &Rgb([51, 0, 51]));
        assert_eq!(frame.get_pixel(2, 10), &Rgb(PURPLE));
        assert_eq!(frame.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn outline_only_polygon_leaves_interior_untouched() {
        let mut frame = RgbImage::new(20, 20);
        let overlay = Overlay {
            polygons: vec![OverlayPolygon {
                points: vec![Point::new(2.0, 2.0), Point::new(17.0, 2.0), Point::new(10.0, 17.0)],
                color: YELLOW,
                fill_alpha: None,
            }],
            ..Overlay::default()
        };
        draw(&mut frame, &overlay);
        assert_eq!(frame.get_pixel(10, 8), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(10, 2), &Rgb(YELLOW));
    }

    #[test]
    fn labels_sit_above_boxes_and_on_text_baselines() {
        let overlay = Overlay {
            boxes: vec![OverlayBox {
                track_id: 3,
                x1: 50.0,
                y1: 60.0,
                x2: 80.0,
                y2: 90.0,
                label: "ID: 3".into(),
                color: RED,
            }],
            texts: vec![
                OverlayText {
                    position: Point::new(50.0, 50.0),
                    text: "42.00 km/h".into(),
                    color: RED,
                },
                OverlayText {
                    position: Point::new(10.0, 30.0),
                    text: "Line 1: 0".into(),
                    color: GREEN,
                },
            ],
            ..Overlay::default()
        };
        let anchors = label_anchors(&overlay);
        assert_eq!(
            anchors,
            vec![
                LabelAnchor { x: 50, y: 18, text: "ID: 3", color: RED },
                LabelAnchor { x: 50, y: 34, text: "42.00 km/h", color: RED },
                LabelAnchor { x: 10, y: 14, text: "Line 1: 0", color: GREEN },
            ]
        );
    }

    #[test]
    fn garbage_bytes_are_not_a_font() {
        assert!(load_font(b"definitely not a font".to_vec()).is_err());
    }

    #[test]
    fn fill_is_omitted_from_json_when_absent() {
        let polygon = OverlayPolygon {
            points: vec![Point::new(0.0, 0.0)],
            color: YELLOW,
            fill_alpha: None,
        };
        let json = serde_json::to_value(&polygon).unwrap();
        assert!(json.get("fill_alpha").is_none());
    }
}
