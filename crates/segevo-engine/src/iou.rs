//! Intersection over union (Jaccard index), the segmentation accuracy metric.
//!
//! IoU is defined as 1.0 when neither side contains the target, so that a
//! correct "nothing here" prediction scores as well as a perfect detection.

use image::{GrayImage, Rgb, RgbImage};

use crate::tensor::Tensor;

/// Mask pixels darker than this luma belong to the class.
pub const MASK_LUMA_THRESHOLD: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("images have different dimensions: {left:?} and {right:?}")]
pub struct DimensionMismatch {
    pub left: (u32, u32),
    pub right: (u32, u32),
}

/// IoU of the pixels of exactly `color` in two images.
pub fn intersection_over_union(
    left: &RgbImage,
    right: &RgbImage,
    color: Rgb<u8>,
) -> Result<f32, DimensionMismatch> {
    if left.dimensions() != right.dimensions() {
        return Err(DimensionMismatch {
            left: left.dimensions(),
            right: right.dimensions(),
        });
    }
    Ok(ratio(
        left.pixels()
            .zip(right.pixels())
            .map(|(a, b)| (*a == color, *b == color)),
    ))
}

/// Per-pixel membership of one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl BinaryMask {
    /// Ground-truth mask: dark pixels belong to the class.
    #[must_use]
    pub fn from_mask_image(mask: &GrayImage) -> Self {
        let (width, height) = mask.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            bits: mask.pixels().map(|p| p.0[0] < MASK_LUMA_THRESHOLD).collect(),
        }
    }

    /// Predicted mask: pixels whose confidence for `class` is below
    /// `threshold` are detections.
    #[must_use]
    pub fn from_confidence(confidence: &Tensor, class: usize, threshold: f32) -> Self {
        Self {
            width: confidence.width(),
            height: confidence.height(),
            bits: confidence.pixels().map(|p| p[class] < threshold).collect(),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// IoU of the two masks.
    ///
    /// # Panics
    ///
    /// Panics if the masks have different dimensions.
    #[must_use]
    pub fn iou(&self, other: &Self) -> f32 {
        assert_eq!(self.dimensions(), other.dimensions(), "mask dimensions");
        ratio(self.bits.iter().copied().zip(other.bits.iter().copied()))
    }
}

#[expect(clippy::cast_precision_loss)]
fn ratio<I>(pairs: I) -> f32
where
    I: IntoIterator<Item = (bool, bool)>,
{
    let (inter, union) = pairs
        .into_iter()
        .fold((0_usize, 0_usize), |(inter, union), (a, b)| {
            (inter + usize::from(a && b), union + usize::from(a || b))
        });
    if union == 0 {
        1.0
    } else {
        inter as f32 / union as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn image_from_rows(rows: &[&str]) -> RgbImage {
        #[expect(clippy::cast_possible_truncation)]
        let (w, h) = (rows[0].len() as u32, rows.len() as u32);
        RgbImage::from_fn(w, h, |x, y| {
            if rows[y as usize].as_bytes()[x as usize] == b'#' {
                BLACK
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn test_identical_images_score_one() {
        let image = image_from_rows(&["#..#", ".##.", "...."]);
        assert_eq!(intersection_over_union(&image, &image, BLACK), Ok(1.0));
    }

    #[test]
    fn test_absent_color_scores_one() {
        let image = image_from_rows(&["....", "...."]);
        let iou = intersection_over_union(&image, &image, BLACK).unwrap();
        assert_eq!(iou, 1.0);
        assert!(!iou.is_nan());
    }

    #[test]
    fn test_partial_overlap() {
        let a = image_from_rows(&["##..", "...."]);
        let b = image_from_rows(&[".##.", "...."]);
        // intersection 1, union 3
        let iou = intersection_over_union(&a, &b, BLACK).unwrap();
        assert!((iou - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_is_reported() {
        let a = RgbImage::new(2, 2);
        let b = RgbImage::new(3, 2);
        assert_eq!(
            intersection_over_union(&a, &b, BLACK),
            Err(DimensionMismatch {
                left: (2, 2),
                right: (3, 2)
            })
        );
    }

    #[test]
    fn test_masks_from_images_and_confidence() {
        let mut gray = GrayImage::new(3, 1);
        gray.put_pixel(0, 0, image::Luma([0]));
        gray.put_pixel(1, 0, image::Luma([127]));
        gray.put_pixel(2, 0, image::Luma([200]));
        let truth = BinaryMask::from_mask_image(&gray);
        assert_eq!(truth.count(), 2);

        let mut confidence = Tensor::zeros(3, 1, 2);
        confidence.pixel_mut(0, 0).copy_from_slice(&[-1.0, 1.0]);
        confidence.pixel_mut(1, 0).copy_from_slice(&[0.5, -1.0]);
        confidence.pixel_mut(2, 0).copy_from_slice(&[0.0, 0.0]);
        let predicted = BinaryMask::from_confidence(&confidence, 0, 0.0);
        assert_eq!(predicted.count(), 1);
        assert!((truth.iou(&predicted) - 0.5).abs() < 1e-6);
    }
}
