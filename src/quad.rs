//! Four-corner text line geometry and box ordering.

use float_ord::FloatOrd;
use geo::{Coord, Polygon};

use crate::TextBox;

/// Boxes whose top-left corners are closer than this vertically are considered the same row.
const SAME_ROW_TOLERANCE: f32 = 10.0;
const MIN_EDGE_LENGTH: i32 = 3;

/// Corners of a text line in source image pixels, ordered top-left, top-right, bottom-right,
/// bottom-left once [`Quad::order_clockwise`] has been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub points: [Coord<f32>; 4],
}

impl Quad {
    pub fn new(points: [(f32, f32); 4]) -> Self {
        Self {
            points: points.map(|(x, y)| Coord { x, y }),
        }
    }

    /// Takes the first four exterior points of a (rectangular) polygon.
    pub fn from_polygon(polygon: &Polygon<f32>) -> Option<Self> {
        let coords = polygon.exterior().0.as_slice();
        if coords.len() < 4 {
            return None;
        }
        Some(Self {
            points: [coords[0], coords[1], coords[2], coords[3]],
        })
    }

    pub fn left(&self) -> f32 {
        self.points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min)
    }

    pub fn top(&self) -> f32 {
        self.points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min)
    }

    pub fn right(&self) -> f32 {
        self.points
            .iter()
            .map(|p| p.x)
            .fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn bottom(&self) -> f32 {
        self.points
            .iter()
            .map(|p| p.y)
            .fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn width(&self) -> f32 {
        self.right() - self.left()
    }

    pub fn height(&self) -> f32 {
        self.bottom() - self.top()
    }

    /// Even-odd crossing test against the four edges.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let mut crossings = 0;
        for i in 0..4 {
            let a = self.points[i];
            let b = self.points[(i + 1) % 4];
            let straddles = (a.y <= y && b.y > y) || (a.y > y && b.y <= y);
            if straddles && x < (y - a.y) * (b.x - a.x) / (b.y - a.y) + a.x {
                crossings += 1;
            }
        }
        crossings % 2 == 1
    }

    pub fn order_clockwise(self) -> Self {
        let mut sorted = self.points;
        sorted.sort_by_key(|p| FloatOrd(p.x));
        let (mut top_left, mut bottom_left) = (sorted[0], sorted[1]);
        if top_left.y > bottom_left.y {
            std::mem::swap(&mut top_left, &mut bottom_left);
        }
        let (mut top_right, mut bottom_right) = (sorted[2], sorted[3]);
        if top_right.y > bottom_right.y {
            std::mem::swap(&mut top_right, &mut bottom_right);
        }
        Self {
            points: [top_left, top_right, bottom_right, bottom_left],
        }
    }

    fn clamp(mut self, max_x: f32, max_y: f32) -> Self {
        for point in self.points.iter_mut() {
            point.x = point.x.clamp(0.0, max_x);
            point.y = point.y.clamp(0.0, max_y);
        }
        self
    }

    pub(crate) fn top_edge(&self) -> f32 {
        distance(self.points[0], self.points[1])
    }

    pub(crate) fn left_edge(&self) -> f32 {
        distance(self.points[0], self.points[3])
    }
}

pub(crate) fn distance(a: Coord<f32>, b: Coord<f32>) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Orders corners, clamps them into the image and drops slivers.
pub fn filter_boxes(boxes: Vec<TextBox>, image_width: u32, image_height: u32) -> Vec<TextBox> {
    let max_x = image_width.saturating_sub(1) as f32;
    let max_y = image_height.saturating_sub(1) as f32;
    boxes
        .into_iter()
        .map(|text_box| TextBox {
            quad: text_box.quad.order_clockwise().clamp(max_x, max_y),
            ..text_box
        })
        .filter(|text_box| {
            text_box.quad.top_edge() as i32 > MIN_EDGE_LENGTH
                && text_box.quad.left_edge() as i32 > MIN_EDGE_LENGTH
        })
        .collect()
}

/// Top to bottom, then left to right for boxes sharing a row.
pub fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by_key(|it| (FloatOrd(it.quad.points[0].y), FloatOrd(it.quad.points[0].x)));
    for i in 0..boxes.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let current = boxes[j].quad.points[0];
            let next = boxes[j + 1].quad.points[0];
            if (next.y - current.y).abs() < SAME_ROW_TOLERANCE && next.x < current.x {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
}
