use std::path::Path;

use float_ord::FloatOrd;
use image::DynamicImage;
use ndarray::{s, Array3, Axis};
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    session::{build_session, ShapeProfile},
    util::{crop_quad, resize_to_height, subtract_mean_normalize},
    Angle, Error, ExecutionProvider, Result, TextBox,
};

const DEST_WIDTH: u32 = 192;
const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

pub struct AngleNet {
    session: Session,
}

impl AngleNet {
    #[instrument(level = "debug", skip(execution_providers))]
    pub fn init(
        path: &Path,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<&Path>,
    ) -> Result<Self> {
        let shape = format!("x:1x3x{DEST_HEIGHT}x{DEST_WIDTH}");
        let profile = ShapeProfile {
            min: shape.clone(),
            opt: shape.clone(),
            max: shape,
        };
        let session = build_session(
            path,
            num_threads,
            execution_providers,
            cache_path,
            &profile,
        )?;
        Ok(Self { session })
    }

    /// Classifies every box of `image` and stores the result on the box.
    #[instrument(level = "debug", skip(self, image, boxes))]
    pub fn classify_boxes(
        &self,
        image: &DynamicImage,
        boxes: &mut [TextBox],
        most_angle: bool,
    ) -> Result<()> {
        let source = image.to_rgb8();
        let crops = boxes
            .iter()
            .map(|it| DynamicImage::ImageRgb8(crop_quad(&source, &it.quad)))
            .collect::<Vec<_>>();
        #[cfg(feature = "debug")]
        for (i, crop) in crops.iter().enumerate() {
            if let Err(err) = crop.save(format!("part_images/{i}.png")) {
                log::warn!("Failed to save crop {i}: {err}");
            }
        }

        let angles = self.get_angles(&crops, most_angle)?;
        for (text_box, angle) in boxes.iter_mut().zip(angles) {
            text_box.angle = Some(angle);
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self, images))]
    pub fn get_angles(&self, images: &[DynamicImage], most_angle: bool) -> Result<Vec<Angle>> {
        let mut angles = images
            .iter()
            .map(|image| self.get_angle(image))
            .collect::<Result<Vec<_>>>()?;

        if most_angle {
            apply_most_angle(&mut angles);
        }

        Ok(angles)
    }

    #[instrument(level = "trace", skip(self, image))]
    fn get_angle(&self, image: &DynamicImage) -> Result<Angle> {
        let input = prepare_input(image).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| Error::UnexpectedOutput("classifier produced no outputs".into()))?;
        let output = output.try_extract_tensor::<f32>()?;

        output
            .iter()
            .enumerate()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .map(|(index, score)| Angle {
                index,
                score: *score,
            })
            .ok_or_else(|| Error::UnexpectedOutput("classifier output is empty".into()))
    }
}

/// Normalised 3x48x192 tensor, the resized crop left-aligned and zero padded.
fn prepare_input(image: &DynamicImage) -> Array3<f32> {
    let resized = resize_to_height(image, DEST_HEIGHT, DEST_WIDTH);
    let normalized = subtract_mean_normalize(&resized, &MEAN_VALUES, &NORM_VALUES);
    let mut padded = Array3::<f32>::zeros((3, DEST_HEIGHT as usize, DEST_WIDTH as usize));
    padded
        .slice_mut(s![.., .., ..resized.width() as usize])
        .assign(&normalized);
    padded
}

/// Replaces every label with the majority label.
fn apply_most_angle(angles: &mut [Angle]) {
    let sum = angles.iter().map(|angle| angle.index).sum::<usize>() as f32;
    let half_percent = angles.len() as f32 / 2.0;
    let most_angle_index = if sum < half_percent { 0 } else { 1 };

    for angle in angles.iter_mut() {
        angle.index = most_angle_index;
    }
}
