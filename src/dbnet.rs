use std::path::Path;

use geo::MinimumRotatedRect;
use image::{imageops::FilterType, DynamicImage, GrayImage};
use imageproc::{
    contours::find_contours,
    contrast::{threshold_mut, ThresholdType},
    morphology::{grayscale_dilate, Mask},
};
use ndarray::{Array2, ArrayView2, Axis};
use ort::{inputs, Session};
use tracing::instrument;

use crate::{
    quad::{filter_boxes, sort_reading_order},
    session::{build_session, ShapeProfile},
    util::{
        box_score_fast, limit_side, max_side, subtract_mean_normalize, to_geo_poly, to_luma_image,
        unclip, Scale,
    },
    DetectionOptions, Error, ExecutionProvider, Quad, Result, TextBox,
};

const MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

const MIN_SIZE: f32 = 3.0;

pub struct DbNet {
    session: Session,
}

impl DbNet {
    #[instrument(level = "debug", skip(execution_providers))]
    pub fn init(
        path: &Path,
        num_threads: usize,
        max_side_len: u32,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<&Path>,
    ) -> Result<Self> {
        let profile = ShapeProfile {
            min: "x:1x3x32x32".to_string(),
            opt: format!("x:1x3x{max_side_len}x{max_side_len}"),
            max: format!("x:1x3x{max_side_len}x{max_side_len}"),
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

    #[instrument(skip(self, image, options), level = "debug")]
    pub fn get_text_boxes(
        &self,
        image: &DynamicImage,
        options: &DetectionOptions,
    ) -> Result<Vec<TextBox>> {
        let scale = limit_side(image.width(), image.height(), options.limit_side_len);
        let pred_data = self.predict(image, scale)?;

        let bitmap = binarize(pred_data.view(), options.thresh, options.use_dilation);
        let boxes = find_boxes(
            pred_data.view(),
            &bitmap,
            (image.width(), image.height()),
            options,
        );
        log::debug!("{} candidate boxes before filtering", boxes.len());

        let mut boxes = filter_boxes(boxes, image.width(), image.height());
        sort_reading_order(&mut boxes);
        Ok(boxes)
    }

    /// Runs the model and returns its probability map at the resized resolution.
    #[instrument(skip(self, image), level = "trace")]
    fn predict(&self, image: &DynamicImage, scale: Scale) -> Result<Array2<f32>> {
        let image =
            image.resize_exact(scale.target_width, scale.target_height, FilterType::Triangle);
        let input_values =
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input_values]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| Error::UnexpectedOutput("detector produced no outputs".into()))?;
        let pred_mat = output.try_extract_tensor::<f32>()?;

        if pred_mat.ndim() != 4 {
            return Err(Error::UnexpectedOutput(format!(
                "detector output has shape {:?}, expected [1, 1, h, w]",
                pred_mat.shape()
            )));
        }
        let width = pred_mat.len_of(Axis(3));
        let height = pred_mat.len_of(Axis(2));

        let pred_data = pred_mat
            .to_owned()
            .remove_axis(Axis(0))
            .remove_axis(Axis(0))
            .into_shape((height, width))
            .map_err(|err| Error::UnexpectedOutput(err.to_string()))?;
        Ok(pred_data)
    }
}

/// Thresholds the probability map into a 0/255 bitmap.
pub(crate) fn binarize(pred_data: ArrayView2<f32>, thresh: f32, use_dilation: bool) -> GrayImage {
    let mut image = to_luma_image(pred_data);
    let threshold = (thresh * 255.0) as u8;
    threshold_mut(&mut image, threshold, ThresholdType::Binary);
    if use_dilation {
        image = grayscale_dilate(&image, &dilation_kernel());
    }
    image
}

/// 2x2 rectangle anchored at its bottom-right cell.
fn dilation_kernel() -> Mask {
    Mask::from_image(&GrayImage::from_pixel(2, 2, image::Luma([255])), 1, 1)
}

/// DB post-processing: contours of the bitmap become scored, unclipped rectangles in source
/// image coordinates.
#[instrument(skip(pred_data, bitmap, options), level = "trace")]
pub(crate) fn find_boxes(
    pred_data: ArrayView2<f32>,
    bitmap: &GrayImage,
    (dest_width, dest_height): (u32, u32),
    options: &DetectionOptions,
) -> Vec<TextBox> {
    let scale_x = dest_width as f32 / bitmap.width() as f32;
    let scale_y = dest_height as f32 / bitmap.height() as f32;

    find_contours::<i32>(bitmap)
        .into_iter()
        .take(options.max_candidates)
        .filter(|it| it.points.len() > 2)
        .filter_map(|it| to_geo_poly(&it.points).minimum_rotated_rect())
        .filter(|rect| max_side(rect) >= MIN_SIZE)
        .map(|rect| {
            let score = box_score_fast(&rect, pred_data);
            (rect, score)
        })
        .filter(|(_, score)| *score >= options.box_thresh)
        .filter_map(|(rect, score)| Some((unclip(&rect, options.unclip_ratio)?, score)))
        .filter(|(rect, _)| max_side(rect) >= MIN_SIZE + 2.0)
        .filter_map(|(rect, score)| {
            let mut quad = Quad::from_polygon(&rect)?;
            for point in quad.points.iter_mut() {
                point.x = (point.x * scale_x).round().clamp(0.0, dest_width as f32);
                point.y = (point.y * scale_y).round().clamp(0.0, dest_height as f32);
            }
            Some(TextBox {
                score,
                quad,
                angle: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::s;

    use super::*;

    fn probability_map() -> Array2<f32> {
        let mut pred = Array2::<f32>::zeros((64, 64));
        pred.slice_mut(s![20..30, 10..50]).fill(0.9);
        pred
    }

    #[test]
    fn bitmap_marks_pixels_above_threshold() {
        let pred = probability_map();
        let bitmap = binarize(pred.view(), 0.3, false);
        assert_eq!(bitmap.get_pixel(20, 25).0[0], 255);
        assert_eq!(bitmap.get_pixel(5, 5).0[0], 0);
    }

    #[test]
    fn finds_single_text_region() {
        let pred = probability_map();
        let bitmap = binarize(pred.view(), 0.3, false);
        let options = DetectionOptions::default();
        let boxes = find_boxes(pred.view(), &bitmap, (64, 64), &options);
        assert_eq!(boxes.len(), 1);

        let quad = boxes[0].quad;
        assert!(boxes[0].score > 0.6);
        assert!(quad.left() <= 10.0 && quad.right() >= 49.0);
        assert!(quad.top() <= 20.0 && quad.bottom() >= 29.0);
    }

    #[test]
    fn scales_boxes_back_to_source_size() {
        let pred = probability_map();
        let bitmap = binarize(pred.view(), 0.3, false);
        let options = DetectionOptions::default();
        let boxes = find_boxes(pred.view(), &bitmap, (128, 128), &options);
        assert_eq!(boxes.len(), 1);
        assert!(boxes[0].quad.right() >= 98.0);
        assert!(boxes[0].quad.bottom() <= 128.0);
    }

    #[test]
    fn thin_text_line_is_kept() {
        let mut pred = Array2::<f32>::zeros((64, 64));
        pred.slice_mut(s![20..22, 10..50]).fill(0.9);
        let bitmap = binarize(pred.view(), 0.3, false);
        let boxes = find_boxes(pred.view(), &bitmap, (64, 64), &DetectionOptions::default());
        assert_eq!(boxes.len(), 1);
        assert!((boxes[0].score - 0.9).abs() < 1e-5);
    }

    #[test]
    fn dilation_grows_pixel_into_two_by_two_block() {
        let mut pred = Array2::<f32>::zeros((8, 8));
        pred[[4, 4]] = 0.9;
        let bitmap = binarize(pred.view(), 0.3, true);
        let lit = bitmap.pixels().filter(|it| it.0[0] == 255).count();
        assert_eq!(lit, 4);
        assert_eq!(bitmap.get_pixel(4, 4).0[0], 255);
    }

    #[test]
    fn low_probability_regions_are_dropped() {
        let mut pred = Array2::<f32>::zeros((64, 64));
        pred.slice_mut(s![20..30, 10..50]).fill(0.4);
        let bitmap = binarize(pred.view(), 0.3, false);
        let boxes = find_boxes(pred.view(), &bitmap, (64, 64), &DetectionOptions::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn empty_map_has_no_boxes() {
        let pred = Array2::<f32>::zeros((32, 32));
        let bitmap = binarize(pred.view(), 0.3, true);
        let boxes = find_boxes(pred.view(), &bitmap, (32, 32), &DetectionOptions::default());
        assert!(boxes.is_empty());
    }
}
