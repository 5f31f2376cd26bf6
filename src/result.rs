use std::path::PathBuf;

use crate::Quad;

#[derive(Debug, Clone)]
pub struct TextBox {
    pub score: f32,
    pub quad: Quad,
    pub angle: Option<Angle>,
}

/// Detected text lines of a single image, in reading order.
#[derive(Debug, Clone)]
pub struct ImageDetections {
    pub path: PathBuf,
    pub boxes: Vec<TextBox>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angle {
    pub index: usize,
    pub score: f32,
}

impl Angle {
    pub fn degrees(&self) -> u32 {
        if self.index % 2 == 1 {
            180
        } else {
            0
        }
    }

    /// Whether the line should be treated as upside down at the given confidence threshold.
    pub fn is_rotated(&self, threshold: f32) -> bool {
        self.degrees() == 180 && self.score > threshold
    }
}
