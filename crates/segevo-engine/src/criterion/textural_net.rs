//! Multi-scale textural classifier.
//!
//! For every pixel the network input is the pixel's own RGB value followed,
//! for each scale `s` in `1..scale`, by the average RGB value of 9 square
//! fragments of side `3^s`, in row-major order. Corner fragments have the
//! pixel as their inner corner, edge fragments are centred on the pixel's row
//! or column, and the centre fragment is centred on the pixel.
//!
//! Fragments therefore reach `3^(scale-1) - 1` pixels away from the pixel.
//! Pixels closer than [`TexturalNet::margin`] to any border are skipped and
//! emit no prediction (all their output channels stay 0).
//!
//! Building the inputs is the most expensive step of the whole engine. It is
//! split out as [`TexturalNet::prepare`] so that the result can be cached per
//! sample during training; fragment averages use a summed-area table.

use crate::{
    cancel::{CancelToken, Interrupted},
    network::{Network, Scratch},
    tensor::Tensor,
};

/// Largest supported number of scales.
pub const MAX_SCALE: usize = 6;

/// Largest supported number of hidden layers.
pub const MAX_RANK: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct TexturalNet {
    rank: usize,
    scale: usize,
    network: Network,
}

impl TexturalNet {
    /// Creates a textural criterion with `rank` hidden layers of
    /// `9 * class_count` units and `scale` scales.
    ///
    /// # Panics
    ///
    /// Panics if `scale` is not in `1..=MAX_SCALE` or `rank` exceeds
    /// [`MAX_RANK`].
    #[must_use]
    pub fn new(class_count: usize, rank: usize, scale: usize) -> Self {
        assert!((1..=MAX_SCALE).contains(&scale), "scale out of range");
        assert!(rank <= MAX_RANK, "rank out of range");
        let network = Network::new(
            Self::feature_len(scale),
            vec![9 * class_count; rank],
            class_count,
        );
        Self {
            rank,
            scale,
            network,
        }
    }

    pub(crate) fn from_parts(rank: usize, scale: usize, network: Network) -> Self {
        Self {
            rank,
            scale,
            network,
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[must_use]
    pub fn scale(&self) -> usize {
        self.scale
    }

    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }

    pub(crate) fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    /// Length of the per-pixel input vector for `scale` scales.
    #[must_use]
    pub const fn feature_len(scale: usize) -> usize {
        3 * (1 + 9 * (scale - 1))
    }

    /// Number of border pixels skipped on each side.
    #[must_use]
    pub fn margin(&self) -> usize {
        (1..self.scale).fold(1, |side, _| side * 3) - 1
    }

    /// Builds the per-pixel network inputs from an RGB tensor.
    ///
    /// Skipped border pixels are left as zeros.
    pub(crate) fn prepare(&self, input: &Tensor, cancel: &CancelToken) -> Result<Tensor, Interrupted> {
        let (width, height) = (input.width(), input.height());
        let mut features = Tensor::zeros(width, height, Self::feature_len(self.scale));
        let margin = self.margin();
        if width <= 2 * margin || height <= 2 * margin {
            return Ok(features);
        }

        let table = SummedArea::new(input);
        for y in margin..height - margin {
            for x in margin..width - margin {
                cancel.check()?;
                let out = features.pixel_mut(x, y);
                out[..3].copy_from_slice(&input.pixel(x, y)[..3]);
                let mut pos = 3;
                let mut side = 1;
                for _ in 1..self.scale {
                    side *= 3;
                    let half = (side - 1) / 2;
                    for row in 0..3 {
                        for col in 0..3 {
                            // top-left corners at -(side-1), -half and 0 from the pixel
                            let left = x + col * half - 2 * half;
                            let top = y + row * half - 2 * half;
                            let avg = table.average(left, top, side);
                            out[pos..pos + 3].copy_from_slice(&avg);
                            pos += 3;
                        }
                    }
                }
            }
        }
        Ok(features)
    }

    /// Evaluates the network on prepared inputs.
    pub(crate) fn evaluate(
        &self,
        features: &Tensor,
        cancel: &CancelToken,
    ) -> Result<Tensor, Interrupted> {
        debug_assert_eq!(features.channels(), Self::feature_len(self.scale));
        let (width, height) = (features.width(), features.height());
        let mut output = Tensor::zeros(width, height, self.network.nb_output());
        let margin = self.margin();
        if width <= 2 * margin || height <= 2 * margin {
            return Ok(output);
        }

        let mut scratch = Scratch::default();
        for y in margin..height - margin {
            for x in margin..width - margin {
                cancel.check()?;
                self.network
                    .eval_into(features.pixel(x, y), &mut scratch, output.pixel_mut(x, y));
            }
        }
        Ok(output)
    }
}

/// Summed-area table over the first 3 channels of a tensor.
struct SummedArea {
    stride: usize,
    sums: Vec<[f64; 3]>,
}

impl SummedArea {
    fn new(input: &Tensor) -> Self {
        let stride = input.width() + 1;
        let mut sums = vec![[0.0; 3]; stride * (input.height() + 1)];
        for y in 0..input.height() {
            let mut row = [0.0; 3];
            for x in 0..input.width() {
                let pixel = input.pixel(x, y);
                for c in 0..3 {
                    row[c] += f64::from(pixel[c]);
                    sums[(y + 1) * stride + x + 1][c] = sums[y * stride + x + 1][c] + row[c];
                }
            }
        }
        Self { stride, sums }
    }

    /// Average of the `side`×`side` square whose top-left corner is (`x`, `y`).
    #[expect(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn average(&self, x: usize, y: usize, side: usize) -> [f32; 3] {
        let at = |x: usize, y: usize| &self.sums[y * self.stride + x];
        let (a, b, c, d) = (at(x, y), at(x + side, y), at(x, y + side), at(x + side, y + side));
        let area = (side * side) as f64;
        std::array::from_fn(|i| ((d[i] - b[i] - c[i] + a[i]) / area) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: usize, height: usize) -> Tensor {
        let mut t = Tensor::zeros(width, height, 3);
        for y in 0..height {
            for x in 0..width {
                #[expect(clippy::cast_precision_loss)]
                let value = [x as f32 / 10.0, y as f32 / 10.0, 0.5];
                t.pixel_mut(x, y).copy_from_slice(&value);
            }
        }
        t
    }

    #[test]
    fn test_feature_len_and_margin() {
        let test_cases = [(1, 3, 0), (2, 30, 2), (3, 57, 8), (4, 84, 26)];
        for (scale, len, margin) in test_cases {
            assert_eq!(TexturalNet::feature_len(scale), len, "scale {scale}");
            assert_eq!(TexturalNet::new(1, 1, scale).margin(), margin, "scale {scale}");
        }
    }

    #[test]
    fn test_uniform_image_fragments_equal_pixel() {
        let mut input = Tensor::zeros(9, 9, 3);
        for i in 0..81 {
            input.pixel_at_mut(i).copy_from_slice(&[0.2, 0.4, 0.6]);
        }
        let net = TexturalNet::new(1, 1, 2);
        let features = net.prepare(&input, &CancelToken::new()).unwrap();

        let center = features.pixel(4, 4);
        for chunk in center.chunks_exact(3) {
            for (a, e) in chunk.iter().zip([0.2, 0.4, 0.6]) {
                assert!((a - e).abs() < 1e-6);
            }
        }
        assert!(features.pixel(1, 4).iter().all(|&v| v == 0.0));
        assert!(features.pixel(2, 2).iter().all(|&v| v != 0.0));
    }

    #[test]
    fn test_fragment_layout_is_row_major_around_pixel() {
        let input = gradient(9, 9);
        let net = TexturalNet::new(1, 0, 2);
        let features = net.prepare(&input, &CancelToken::new()).unwrap();
        let f = features.pixel(4, 4);

        // (fragment, expected mean of x, expected mean of y)
        let test_cases = [
            (0, 0.3, 0.3),
            (1, 0.4, 0.3),
            (2, 0.5, 0.3),
            (3, 0.3, 0.4),
            (4, 0.4, 0.4),
            (5, 0.5, 0.4),
            (8, 0.5, 0.5),
        ];
        for (fragment, mx, my) in test_cases {
            let at = 3 + fragment * 3;
            assert!((f[at] - mx).abs() < 1e-6, "fragment {fragment}: x {}", f[at]);
            assert!((f[at + 1] - my).abs() < 1e-6, "fragment {fragment}: y {}", f[at + 1]);
        }
    }

    #[test]
    fn test_border_pixels_emit_no_prediction() {
        let mut net = TexturalNet::new(1, 0, 2);
        let count = net.network().params().len();
        net.network_mut().set_params(&vec![0.5; count]);

        let input = gradient(10, 9);
        let cancel = CancelToken::new();
        let features = net.prepare(&input, &cancel).unwrap();
        let output = net.evaluate(&features, &cancel).unwrap();

        assert_eq!(output.pixel(0, 0), &[0.0]);
        assert_eq!(output.pixel(1, 4), &[0.0]);
        assert!(output.pixel(2, 4)[0] > 0.0);
        assert!(output.pixel(7, 4)[0] > 0.0);
        assert_eq!(output.pixel(8, 4), &[0.0]);
        assert_eq!(output.pixel(4, 1), &[0.0]);
        assert_eq!(output.pixel(4, 7), &[0.0]);
    }

    #[test]
    fn test_pixels_inside_margin_predict() {
        // (width, scale, pixel)
        let test_cases = [(9, 2, (3, 3)), (9, 2, (2, 6)), (17, 3, (8, 8))];
        for (side, scale, (x, y)) in test_cases {
            let mut net = TexturalNet::new(1, 1, scale);
            let count = net.network().params().len();
            net.network_mut().set_params(&vec![0.5; count]);

            let cancel = CancelToken::new();
            let features = net.prepare(&gradient(side, side), &cancel).unwrap();
            let output = net.evaluate(&features, &cancel).unwrap();
            assert!(output.pixel(x, y)[0] > 0.0, "scale {scale} at ({x}, {y})");
        }
    }

    #[test]
    #[should_panic(expected = "rank out of range")]
    fn test_rank_is_bounded() {
        let _ = TexturalNet::new(1, MAX_RANK + 1, 1);
    }

    #[test]
    fn test_image_smaller_than_footprint_yields_zeros() {
        let net = TexturalNet::new(2, 1, 3);
        let cancel = CancelToken::new();
        let features = net.prepare(&gradient(8, 8), &cancel).unwrap();
        let output = net.evaluate(&features, &cancel).unwrap();
        assert!(output.as_slice().iter().all(|&v| v == 0.0));
    }
}
