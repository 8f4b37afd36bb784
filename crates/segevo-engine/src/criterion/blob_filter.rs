use std::ops::RangeInclusive;

use crate::{
    cancel::{CancelToken, Interrupted},
    tensor::Tensor,
};

/// Range searched for each per-class minimum blob size.
pub const MIN_SIZE_RANGE: RangeInclusive<i64> = 0..=10_000;

/// Suppresses small detections.
///
/// Works on per-class predictions. For each class, pixels with a negative
/// value (leaning towards "detected") are grouped into 4-connected regions;
/// regions with fewer pixels than the class's minimum size are reset to 0
/// ("unknown"). Other values pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobFilter {
    min_sizes: Vec<u32>,
}

impl BlobFilter {
    #[must_use]
    pub fn new(class_count: usize) -> Self {
        Self {
            min_sizes: vec![0; class_count],
        }
    }

    pub(crate) fn from_min_sizes(min_sizes: Vec<u32>) -> Self {
        Self { min_sizes }
    }

    #[must_use]
    pub fn min_sizes(&self) -> &[u32] {
        &self.min_sizes
    }

    pub(crate) fn set_min_sizes(&mut self, values: &[i64]) {
        assert_eq!(values.len(), self.min_sizes.len(), "blob filter class count");
        for (dst, &v) in self.min_sizes.iter_mut().zip(values) {
            *dst = u32::try_from(v.max(0)).unwrap_or(u32::MAX);
        }
    }

    pub(crate) fn evaluate(
        &self,
        input: &Tensor,
        cancel: &CancelToken,
    ) -> Result<Tensor, Interrupted> {
        let mut output = input.clone();
        let (width, height) = (input.width(), input.height());
        let mut visited = vec![false; input.area()];
        let mut region = vec![];
        let mut stack = vec![];

        for (class, &min_size) in self.min_sizes.iter().enumerate() {
            if min_size == 0 {
                continue;
            }
            visited.fill(false);
            for start in 0..input.area() {
                cancel.check()?;
                if visited[start] || input.pixel_at(start)[class] >= 0.0 {
                    continue;
                }

                region.clear();
                stack.push(start);
                visited[start] = true;
                while let Some(index) = stack.pop() {
                    region.push(index);
                    let (x, y) = (index % width, index / width);
                    let neighbours = [
                        (x > 0).then(|| index - 1),
                        (x + 1 < width).then(|| index + 1),
                        (y > 0).then(|| index - width),
                        (y + 1 < height).then(|| index + width),
                    ];
                    for next in neighbours.into_iter().flatten() {
                        if !visited[next] && input.pixel_at(next)[class] < 0.0 {
                            visited[next] = true;
                            stack.push(next);
                        }
                    }
                }

                if region.len() < min_size as usize {
                    for &index in &region {
                        output.pixel_at_mut(index)[class] = 0.0;
                    }
                }
            }
        }
        Ok(output)
    }
}
