//! Line protocol between the detector and its consumers: a marker line, then one line of
//! integer corner coordinates per detected text line.

use std::io::{self, Write};

use crate::{ImageDetections, Quad};

pub const BEGIN_MARKER: &str = "BEGIN PADDLE FROG";

const COORDINATES_PER_QUAD: usize = 8;

pub fn write_detections<W: Write>(writer: &mut W, detections: &[ImageDetections]) -> io::Result<()> {
    writeln!(writer, "{BEGIN_MARKER}")?;
    for text_box in detections.iter().flat_map(|it| it.boxes.iter()) {
        for point in text_box.quad.points.iter() {
            // Truncates toward zero.
            write!(writer, "{} {} ", point.x as i32, point.y as i32)?;
        }
        writeln!(writer)?;
    }
    writer.flush()
}

/// Reads quads back from detector output. Anything before the marker is ignored; lines that
/// don't carry four corners are skipped.
pub fn parse_detections(output: &str) -> Vec<Quad> {
    let Some(start) = output.find(BEGIN_MARKER) else {
        log::warn!("Detector output does not contain {BEGIN_MARKER:?}");
        return Vec::new();
    };

    output[start + BEGIN_MARKER.len()..]
        .lines()
        .filter_map(|line| {
            let coords = line.split_whitespace().collect::<Vec<_>>();
            if coords.is_empty() {
                return None;
            }
            if coords.len() < COORDINATES_PER_QUAD {
                log::warn!("Unexpected output from text detection: {line}");
                return None;
            }
            let value = |i: usize| coords[i].parse::<f32>().unwrap_or(0.0);
            Some(Quad::new([
                (value(0), value(1)),
                (value(2), value(3)),
                (value(4), value(5)),
                (value(6), value(7)),
            ]))
        })
        .collect()
}
