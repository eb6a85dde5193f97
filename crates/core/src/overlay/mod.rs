//! Skeleton overlay rendering.
//!
//! `SkeletonRenderer::render` is pure: keypoints in, draw commands out.
//! A small rasterizer turns the commands into an RGBA buffer for snapshot
//! output; interactive consumers can interpret the commands themselves.

use crate::config::{FRAME_HEIGHT, FRAME_WIDTH};
use crate::protocol::Keypoint;
use image::{Rgba, RgbaImage};

/// COCO body-18 keypoint names, index-aligned with analysis payloads.
pub const KEYPOINT_NAMES: [&str; 18] = [
    "Nose", "Neck", "RShoulder", "RElbow", "RWrist", "LShoulder", "LElbow", "LWrist", "RHip",
    "RKnee", "RAnkle", "LHip", "LKnee", "LAnkle", "REye", "LEye", "REar", "LEar",
];

/// Skeleton edges as keypoint index pairs.
pub const POSE_PAIRS: [(usize, usize); 17] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (1, 5),
    (5, 6),
    (6, 7),
    (1, 8),
    (8, 9),
    (9, 10),
    (1, 11),
    (11, 12),
    (12, 13),
    (0, 14),
    (0, 15),
    (14, 16),
    (15, 17),
];

/// Keypoints at or below this confidence are not drawn at all.
pub const CONFIDENCE_FLOOR: f32 = 0.2;

const KEYPOINT_RADIUS: f32 = 4.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn for_confidence(confidence: f32) -> Self {
        if confidence > 0.7 {
            ConfidenceBand::High
        } else if confidence > 0.5 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }

    pub fn color(self) -> [u8; 4] {
        match self {
            ConfidenceBand::High => [0, 220, 80, 255],
            ConfidenceBand::Medium => [250, 200, 0, 255],
            ConfidenceBand::Low => [230, 60, 60, 255],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DrawOp {
    Line {
        x0: f32,
        y0: f32,
        x1: f32,
        y1: f32,
        color: [u8; 4],
    },
    Circle {
        x: f32,
        y: f32,
        radius: f32,
        color: [u8; 4],
    },
}

/// Maps keypoints from the fixed 640x480 source space onto a target canvas.
#[derive(Clone, Copy, Debug)]
pub struct SkeletonRenderer {
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl SkeletonRenderer {
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            canvas_width,
            canvas_height,
        }
    }

    fn scale(&self) -> (f32, f32) {
        (
            self.canvas_width as f32 / FRAME_WIDTH as f32,
            self.canvas_height as f32 / FRAME_HEIGHT as f32,
        )
    }

    /// Produces the overlay for one analysis result: edges first, then
    /// keypoint circles. Missing keypoints at any index are skipped.
    pub fn render(&self, keypoints: &[Option<Keypoint>]) -> Vec<DrawOp> {
        let (sx, sy) = self.scale();
        let mut ops = Vec::new();

        for &(a, b) in POSE_PAIRS.iter() {
            let (Some(ka), Some(kb)) = (visible(keypoints, a), visible(keypoints, b)) else {
                continue;
            };
            let band = ConfidenceBand::for_confidence(ka.confidence.min(kb.confidence));
            ops.push(DrawOp::Line {
                x0: ka.x * sx,
                y0: ka.y * sy,
                x1: kb.x * sx,
                y1: kb.y * sy,
                color: band.color(),
            });
        }

        for kp in keypoints.iter().flatten() {
            if kp.confidence <= CONFIDENCE_FLOOR {
                continue;
            }
            ops.push(DrawOp::Circle {
                x: kp.x * sx,
                y: kp.y * sy,
                radius: KEYPOINT_RADIUS,
                color: ConfidenceBand::for_confidence(kp.confidence).color(),
            });
        }

        ops
    }

    /// Rasterizes the overlay onto a transparent canvas.
    pub fn paint(&self, ops: &[DrawOp]) -> RgbaImage {
        let mut canvas = RgbaImage::new(self.canvas_width, self.canvas_height);
        for op in ops {
            match *op {
                DrawOp::Line {
                    x0,
                    y0,
                    x1,
                    y1,
                    color,
                } => draw_line(&mut canvas, x0, y0, x1, y1, color),
                DrawOp::Circle {
                    x,
                    y,
                    radius,
                    color,
                } => draw_disc(&mut canvas, x, y, radius, color),
            }
        }
        canvas
    }
}

fn visible(keypoints: &[Option<Keypoint>], idx: usize) -> Option<&Keypoint> {
    keypoints
        .get(idx)
        .and_then(|k| k.as_ref())
        .filter(|k| k.confidence > CONFIDENCE_FLOOR)
}

fn put_pixel(canvas: &mut RgbaImage, x: i64, y: i64, color: [u8; 4]) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, Rgba(color));
    }
}

fn draw_line(canvas: &mut RgbaImage, x0: f32, y0: f32, x1: f32, y1: f32, color: [u8; 4]) {
    let steps = (x1 - x0).abs().max((y1 - y0).abs()).ceil().max(1.0) as i64;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let x = x0 + (x1 - x0) * t;
        let y = y0 + (y1 - y0) * t;
        put_pixel(canvas, x.round() as i64, y.round() as i64, color);
    }
}

fn draw_disc(canvas: &mut RgbaImage, cx: f32, cy: f32, radius: f32, color: [u8; 4]) {
    let r = radius.ceil() as i64;
    let (icx, icy) = (cx.round() as i64, cy.round() as i64);
    for dy in -r..=r {
        for dx in -r..=r {
            if (dx * dx + dy * dy) as f32 <= radius * radius {
                put_pixel(canvas, icx + dx, icy + dy, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypoint(x: f32, y: f32, confidence: f32) -> Option<Keypoint> {
        Some(Keypoint { x, y, confidence })
    }

    fn full_pose(confidence: f32) -> Vec<Option<Keypoint>> {
        (0..KEYPOINT_NAMES.len())
            .map(|i| keypoint(10.0 + i as f32 * 20.0, 20.0 + i as f32 * 10.0, confidence))
            .collect()
    }

    #[test]
    fn below_floor_produces_no_draw_ops() {
        let renderer = SkeletonRenderer::new(640, 480);
        let ops = renderer.render(&full_pose(0.15));
        assert!(ops.is_empty());
    }

    #[test]
    fn full_confidence_draws_every_edge_once() {
        let renderer = SkeletonRenderer::new(640, 480);
        let ops = renderer.render(&full_pose(0.95));
        let lines = ops
            .iter()
            .filter(|op| matches!(op, DrawOp::Line { .. }))
            .count();
        let circles = ops
            .iter()
            .filter(|op| matches!(op, DrawOp::Circle { .. }))
            .count();
        assert_eq!(lines, POSE_PAIRS.len());
        assert_eq!(circles, KEYPOINT_NAMES.len());
    }

    #[test]
    fn edges_need_both_endpoints_visible() {
        let renderer = SkeletonRenderer::new(640, 480);
        let mut pose = full_pose(0.95);
        pose[1] = None; // Neck participates in 5 edges.
        let ops = renderer.render(&pose);
        let lines = ops
            .iter()
            .filter(|op| matches!(op, DrawOp::Line { .. }))
            .count();
        assert_eq!(lines, POSE_PAIRS.len() - 5);
    }

    #[test]
    fn coordinates_rescale_to_canvas_size() {
        let renderer = SkeletonRenderer::new(1280, 960);
        let mut pose = vec![None; KEYPOINT_NAMES.len()];
        pose[0] = keypoint(320.0, 240.0, 0.9);
        let ops = renderer.render(&pose);
        assert_eq!(ops.len(), 1);
        let DrawOp::Circle { x, y, .. } = ops[0] else {
            panic!("expected circle");
        };
        assert_eq!((x, y), (640.0, 480.0));
    }

    #[test]
    fn confidence_bands_split_at_documented_edges() {
        assert_eq!(
            ConfidenceBand::for_confidence(0.71),
            ConfidenceBand::High
        );
        assert_eq!(
            ConfidenceBand::for_confidence(0.7),
            ConfidenceBand::Medium
        );
        assert_eq!(
            ConfidenceBand::for_confidence(0.5),
            ConfidenceBand::Low
        );
    }

    #[test]
    fn paint_touches_canvas_only_for_visible_points() {
        let renderer = SkeletonRenderer::new(64, 48);
        let blank = renderer.paint(&renderer.render(&full_pose(0.1)));
        assert!(blank.pixels().all(|p| p.0 == [0, 0, 0, 0]));

        let mut pose = vec![None; KEYPOINT_NAMES.len()];
        pose[0] = keypoint(320.0, 240.0, 0.9);
        let painted = renderer.paint(&renderer.render(&pose));
        assert!(painted.pixels().any(|p| p.0 != [0, 0, 0, 0]));
    }
}
