//! Merging of leaf predictions into the final per-class confidence.
//!
//! Two purely numeric stages, applied per pixel:
//!
//! 1. **Cross-criterion** (per class): each leaf's vote is weighted by its own
//!    confidence magnitude,
//!    `combined = Σ(pᵢ·|pᵢ|) / Σ|pᵢ|`.
//! 2. **Cross-class**: each class is boosted by its own confidence and
//!    suppressed by the competing classes',
//!    `final[c] = (combined_c·|combined_c| − Σ_{j≠c} combined_j·|combined_j|) / Σ_j |combined_j|`.
//!
//! Both stages resolve to 0 when the weight sum is (nearly) zero, and both
//! keep values in `[-1, 1]` as long as their inputs are.

use crate::tensor::Tensor;

/// Weight sums at or below this value count as zero.
pub const WEIGHT_EPSILON: f32 = 1e-6;

/// Combines leaf predictions into one `class_count`-channel tensor.
///
/// # Panics
///
/// Panics if a leaf does not have `class_count` channels or the leaves do not
/// share the same dimensions.
#[must_use]
pub fn combine(leaves: &[Tensor], width: usize, height: usize, class_count: usize) -> Tensor {
    for leaf in leaves {
        assert_eq!(
            (leaf.width(), leaf.height(), leaf.channels()),
            (width, height, class_count),
            "leaf prediction shape"
        );
    }

    let mut output = Tensor::zeros(width, height, class_count);
    let mut combined = vec![0.0; class_count];
    for index in 0..width * height {
        for (class, value) in combined.iter_mut().enumerate() {
            *value = combine_criteria(leaves.iter().map(|leaf| leaf.pixel_at(index)[class]));
        }
        combine_classes(&combined, output.pixel_at_mut(index));
    }
    output
}

/// Cross-criterion stage for one class of one pixel.
pub fn combine_criteria<I>(predictions: I) -> f32
where
    I: IntoIterator<Item = f32>,
{
    let (weighted, weight) = predictions
        .into_iter()
        .fold((0.0, 0.0), |(sum, weight), p| (sum + p * p.abs(), weight + p.abs()));
    if weight <= WEIGHT_EPSILON {
        0.0
    } else {
        weighted / weight
    }
}

/// Cross-class stage for one pixel.
pub fn combine_classes(combined: &[f32], output: &mut [f32]) {
    debug_assert_eq!(combined.len(), output.len());
    let weight: f32 = combined.iter().map(|v| v.abs()).sum();
    if weight <= WEIGHT_EPSILON {
        output.fill(0.0);
        return;
    }
    let total: f32 = combined.iter().map(|v| v * v.abs()).sum();
    for (out, v) in output.iter_mut().zip(combined) {
        let own = v * v.abs();
        let others = total - own;
        *out = ((own - others) / weight).clamp(-1.0, 1.0);
    }
}
