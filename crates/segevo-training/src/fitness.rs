//! Training fitness with early exit.
//!
//! Fitness is the mean, over the training samples, of each sample's mean IoU
//! across classes (see [`Segmentor::evaluate_sample`]); every sample scores in
//! `[0, 1]`.
//!
//! [`evaluate_fast`] accumulates samples in a fixed order and stops as soon as
//! the best reachable fitness, assuming every remaining sample scores 1, falls
//! below the current [`EliteCutoff`]. The value returned in that case is the
//! partial sum divided by the full sample count, which never exceeds the true
//! fitness.

use segevo_engine::{CancelToken, InputCache, Reuse, Sample, Segmentor, SegmentorError};

/// Tracks the `n`-th best fitness seen during one epoch.
///
/// A candidate that cannot beat it cannot enter the elite, so there is no
/// point in finishing its evaluation.
#[derive(Debug, Clone)]
pub struct EliteCutoff {
    elite_count: usize,
    /// Best values seen so far, descending, at most `elite_count` of them.
    best: Vec<f32>,
}

impl EliteCutoff {
    #[must_use]
    pub fn new(elite_count: usize) -> Self {
        Self {
            elite_count,
            best: Vec::with_capacity(elite_count + 1),
        }
    }

    pub fn push(&mut self, fitness: f32) {
        let index = self.best.partition_point(|&v| v >= fitness);
        if index < self.elite_count {
            self.best.insert(index, fitness);
            self.best.truncate(self.elite_count);
        }
    }

    /// The `elite_count`-th best fitness, once that many values were seen.
    #[must_use]
    pub fn value(&self) -> Option<f32> {
        (self.elite_count > 0 && self.best.len() == self.elite_count)
            .then(|| self.best[self.elite_count - 1])
    }
}

/// Training fitness of `segmentor` over `samples`, reusing cached criterion
/// inputs and exiting early once `cutoff` is out of reach.
///
/// Sample `i` of `samples` is cached under index `i`, so the slice must be the
/// same, in the same order, for every call sharing `cache`.
///
/// Without a cutoff the result equals [`Segmentor::evaluate`] on the same
/// samples.
pub fn evaluate_fast(
    segmentor: &Segmentor,
    samples: &[&Sample],
    cutoff: Option<f32>,
    cache: &mut InputCache,
    cancel: &CancelToken,
) -> Result<f32, SegmentorError> {
    assert!(!samples.is_empty(), "no training samples");
    #[expect(clippy::cast_precision_loss)]
    let count = samples.len() as f32;
    let segmentor = segmentor.validated()?;
    let mut sum = 0.0;
    for (index, sample) in samples.iter().enumerate() {
        cancel.check()?;
        sum += segmentor.evaluate_sample(
            sample,
            Some(Reuse {
                sample: index,
                cache: &mut *cache,
            }),
            cancel,
        )?;
        #[expect(clippy::cast_precision_loss)]
        let remaining = (samples.len() - index - 1) as f32;
        if let Some(cutoff) = cutoff
            && sum + remaining < count * cutoff
        {
            log::trace!("early exit after {} of {} samples", index + 1, samples.len());
            return Ok(sum / count);
        }
    }
    Ok(sum / count)
}
