use crate::{
    cancel::{CancelToken, Interrupted},
    tensor::Tensor,
};

/// Stateless RGB to HSV conversion.
///
/// Every channel of the output is normalized to `[0, 1]` (hue included), so the
/// result can feed any criterion expecting an RGB-like input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorTransform;

impl ColorTransform {
    pub(crate) fn evaluate(
        &self,
        input: &Tensor,
        cancel: &CancelToken,
    ) -> Result<Tensor, Interrupted> {
        let mut output = Tensor::zeros(input.width(), input.height(), 3);
        for (i, rgb) in input.pixels().enumerate() {
            cancel.check()?;
            output
                .pixel_at_mut(i)
                .copy_from_slice(&rgb_to_hsv([rgb[0], rgb[1], rgb[2]]));
        }
        Ok(output)
    }
}

/// Converts an RGB triplet in `[0, 1]` to HSV in `[0, 1]`.
#[must_use]
pub fn rgb_to_hsv([r, g, b]: [f32; 3]) -> [f32; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f32::EPSILON {
        0.0
    } else if (max - r).abs() <= f32::EPSILON {
        ((g - b) / delta).rem_euclid(6.0)
    } else if (max - g).abs() <= f32::EPSILON {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };

    [hue / 6.0, saturation, max]
}
