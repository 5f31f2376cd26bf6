use geo::{
    point, Area, BoundingRect, Coord, EuclideanLength, HasDimensions, Intersects, LineString,
    MapCoords, MinimumRotatedRect, Polygon, Translate,
};
use geo_clipper::{Clipper, EndType, JoinType};
use image::{
    imageops::{self, FilterType},
    DynamicImage, GrayImage, ImageBuffer, Pixel, Rgb, RgbImage,
};
use imageproc::{
    geometric_transformations::{warp_into, Interpolation, Projection},
    point::Point,
};
use ndarray::{s, Array3, ArrayView2, Axis};
use tracing::instrument;

use crate::{quad::distance, Quad};

/// Crops at least this much taller than wide are treated as vertical text.
const VERTICAL_ASPECT: f32 = 1.5;

#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm_vals);
    let mean_vals = Rgb::<f32>(*mean_vals).map2(&norm, |c1, c2| c1 * c2);
    for pixel in image.pixels_mut() {
        *pixel = pixel
            .map2(&norm, |c1, c2| c1 * c2)
            .map2(&mean_vals, |c1, c2| c1 - c2);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

pub(crate) fn to_luma_image(data: ArrayView2<f32>) -> GrayImage {
    let height = data.len_of(Axis(0));
    let width = data.len_of(Axis(1));
    let pixel_data = data
        .axis_iter(Axis(0))
        .flat_map(|it| it.into_iter())
        .map(|p| (p * 255.0) as u8)
        .collect::<Vec<u8>>();
    ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
        .unwrap_or_else(|| GrayImage::new(width as u32, height as u32))
}

pub(crate) fn to_geo_poly(points: &[Point<i32>]) -> Polygon<f32> {
    let points = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect();
    Polygon::new(LineString::new(points), vec![])
}

pub(crate) fn max_side(rect: &Polygon<f32>) -> f32 {
    rect.exterior()
        .lines()
        .map(|it| it.euclidean_length())
        .fold(0.0, f32::max)
}

/// Mean probability of the pixels covered by `rect`, edges included.
pub(crate) fn box_score_fast(rect: &Polygon<f32>, pred_data: ArrayView2<f32>) -> f32 {
    let Some(bounds) = rect.bounding_rect() else {
        return 0.0;
    };
    let height = pred_data.len_of(Axis(0));
    let width = pred_data.len_of(Axis(1));
    if width == 0 || height == 0 {
        return 0.0;
    }
    let x_min = (bounds.min().x.floor().max(0.0) as usize).min(width - 1);
    let x_max = (bounds.max().x.ceil().max(0.0) as usize).min(width - 1);
    let y_min = (bounds.min().y.floor().max(0.0) as usize).min(height - 1);
    let y_max = (bounds.max().y.ceil().max(0.0) as usize).min(height - 1);

    let sliced = pred_data.slice(s![y_min..=y_max, x_min..=x_max]);
    // Corners snap to whole pixels so pixels on the edges are counted like a filled mask.
    let local_rect = rect
        .translate(-(x_min as f32), -(y_min as f32))
        .map_coords(|Coord { x, y }| Coord {
            x: x.round(),
            y: y.round(),
        });

    let (sum, count) = sliced
        .indexed_iter()
        .filter(|((y, x), _)| local_rect.intersects(&point![x: *x as f32, y: *y as f32]))
        .fold((0.0f32, 0usize), |(sum, count), (_, value)| {
            (sum + *value, count + 1)
        });

    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Grows a box by `area * ratio / perimeter` and fits a rotated rectangle around the result.
pub(crate) fn unclip(rect: &Polygon<f32>, unclip_ratio: f32) -> Option<Polygon<f32>> {
    let perimeter = rect.exterior().euclidean_length();
    if perimeter <= 0.0 {
        return None;
    }
    let distance = rect.unsigned_area() * unclip_ratio / perimeter;

    let offset = rect.offset(distance, JoinType::Round(0.25), EndType::ClosedPolygon, 1.0);

    if offset.is_empty() {
        None
    } else {
        offset.minimum_rotated_rect()
    }
}

/// Target size of the detector input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub target_width: u32,
    pub target_height: u32,
}

/// Shrinks so the longer side is at most `limit`, then rounds each side to a multiple of 32.
pub fn limit_side(width: u32, height: u32, limit: u32) -> Scale {
    let longest = width.max(height);
    let ratio = if longest > limit {
        limit as f32 / longest as f32
    } else {
        1.0
    };
    let round_32 = |side: u32| (((side as f32 * ratio) / 32.0).round() as u32 * 32).max(32);
    let target_width = round_32(width);
    let target_height = round_32(height);
    log::debug!("Resize will change image dimensions from (w: {width}, h: {height}) to (w: {target_width}, h: {target_height}).");
    Scale {
        target_width,
        target_height,
    }
}

/// Perspective-rectified crop of a text line, rotated upright when the line is vertical.
#[instrument(level = "trace", skip(image))]
pub(crate) fn crop_quad(image: &RgbImage, quad: &Quad) -> RgbImage {
    let [tl, tr, br, bl] = quad.points;
    let crop_width = distance(tl, tr).max(distance(bl, br)).max(1.0);
    let crop_height = distance(tl, bl).max(distance(tr, br)).max(1.0);

    let from = [
        (tl.x, tl.y),
        (tr.x, tr.y),
        (br.x, br.y),
        (bl.x, bl.y),
    ];
    let to = [
        (0.0, 0.0),
        (crop_width, 0.0),
        (crop_width, crop_height),
        (0.0, crop_height),
    ];

    let mut crop = RgbImage::new(crop_width as u32, crop_height as u32);
    match Projection::from_control_points(from, to) {
        Some(projection) => warp_into(
            image,
            &projection,
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
            &mut crop,
        ),
        None => {
            log::trace!("Degenerate quad {quad:?}, falling back to bounding box crop");
            let x = (quad.left().max(0.0) as u32).min(image.width());
            let y = (quad.top().max(0.0) as u32).min(image.height());
            let width = (quad.width() as u32).clamp(1, (image.width() - x).max(1));
            let height = (quad.height() as u32).clamp(1, (image.height() - y).max(1));
            crop = imageops::crop_imm(image, x, y, width, height).to_image();
        }
    }

    if crop.height() as f32 >= crop.width() as f32 * VERTICAL_ASPECT {
        imageops::rotate270(&crop)
    } else {
        crop
    }
}

/// Resizes to `height` keeping the aspect ratio, never wider than `max_width`.
pub(crate) fn resize_to_height(image: &DynamicImage, height: u32, max_width: u32) -> DynamicImage {
    let ratio = image.width() as f32 / image.height().max(1) as f32;
    let width = ((height as f32 * ratio).ceil() as u32).clamp(1, max_width);
    image.resize_exact(width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn square(x: f32, y: f32, size: f32) -> Polygon<f32> {
        Polygon::new(
            LineString::from(vec![
                (x, y),
                (x + size, y),
                (x + size, y + size),
                (x, y + size),
                (x, y),
            ]),
            vec![],
        )
    }

    #[test]
    fn large_images_are_limited_and_rounded() {
        let scale = limit_side(1920, 1080, 960);
        assert_eq!(scale.target_width, 960);
        assert_eq!(scale.target_height, 544);
    }

    #[test]
    fn small_images_are_only_rounded() {
        let scale = limit_side(100, 10, 960);
        assert_eq!(scale.target_width, 96);
        assert_eq!(scale.target_height, 32);
    }

    #[test]
    fn normalize_is_channel_first() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 2, Rgb([255, 0, 255])));
        let tensor = subtract_mean_normalize(&image, &[0.5, 0.5, 0.5], &[2.0, 2.0, 2.0]);
        assert_eq!(tensor.dim(), (3, 2, 4));
        assert!((tensor[[0, 1, 3]] - 1.0).abs() < 1e-5);
        assert!((tensor[[1, 0, 0]] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn score_is_mean_inside_box() {
        let mut pred = Array2::<f32>::zeros((20, 20));
        pred.slice_mut(s![5..15, 5..15]).fill(0.8);
        let score = box_score_fast(&square(6.0, 6.0, 7.0), pred.view());
        assert!((score - 0.8).abs() < 1e-5);
    }

    #[test]
    fn thin_box_scores_its_edge_pixels() {
        let mut pred = Array2::<f32>::zeros((40, 60));
        pred.slice_mut(s![20..22, 10..50]).fill(0.9);
        let rect = Polygon::new(
            LineString::from(vec![
                (10.0, 20.0),
                (49.0, 20.0),
                (49.0, 21.0),
                (10.0, 21.0),
                (10.0, 20.0),
            ]),
            vec![],
        );
        let score = box_score_fast(&rect, pred.view());
        assert!((score - 0.9).abs() < 1e-5);
    }

    #[test]
    fn edge_rows_pull_score_down() {
        let mut pred = Array2::<f32>::zeros((40, 60));
        pred.slice_mut(s![20..23, 10..50]).fill(0.3);
        pred.slice_mut(s![21..22, 10..50]).fill(0.9);
        let rect = Polygon::new(
            LineString::from(vec![
                (10.0, 20.0),
                (49.0, 20.0),
                (49.0, 22.0),
                (10.0, 22.0),
                (10.0, 20.0),
            ]),
            vec![],
        );
        let score = box_score_fast(&rect, pred.view());
        assert!((score - 0.5).abs() < 1e-5);
    }

    #[test]
    fn unclip_grows_box() {
        let rect = square(10.0, 10.0, 20.0);
        let grown = unclip(&rect, 1.5).expect("offset should not collapse");
        assert!(grown.unsigned_area() > rect.unsigned_area());
        assert!(max_side(&grown) > 20.0);
    }

    #[test]
    fn crop_follows_quad_size() {
        let image = RgbImage::from_pixel(100, 50, Rgb([200, 200, 200]));
        let quad = Quad::new([(10.0, 10.0), (70.0, 10.0), (70.0, 30.0), (10.0, 30.0)]);
        let crop = crop_quad(&image, &quad);
        assert_eq!((crop.width(), crop.height()), (60, 20));
    }

    #[test]
    fn vertical_crop_is_rotated() {
        let image = RgbImage::from_pixel(100, 100, Rgb([200, 200, 200]));
        let quad = Quad::new([(10.0, 10.0), (30.0, 10.0), (30.0, 80.0), (10.0, 80.0)]);
        let crop = crop_quad(&image, &quad);
        assert_eq!((crop.width(), crop.height()), (70, 20));
    }
}
