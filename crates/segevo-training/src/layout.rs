//! Mapping between a segmentor's criteria and a flat genome.
//!
//! The layout is computed once per training call from a depth-first,
//! pre-order walk of the tree. Each criterion owns one contiguous range of
//! float genes and one of int genes; scattering or gathering a genome is a
//! single pass over that table.

use std::ops::{Range, RangeInclusive};

use rand::Rng;
use segevo_engine::Segmentor;

use crate::genes::{self, Genome};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    floats: Range<usize>,
    ints: Range<usize>,
}

/// Gene offsets and bounds of every criterion, in tree order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLayout {
    slots: Vec<Slot>,
    float_bounds: Vec<RangeInclusive<f32>>,
    int_bounds: Vec<RangeInclusive<i64>>,
}

impl ParamLayout {
    #[must_use]
    pub fn new(segmentor: &Segmentor) -> Self {
        let mut slots = vec![];
        let mut float_bounds = vec![];
        let mut int_bounds = vec![];
        for criterion in segmentor.criteria() {
            let floats = float_bounds.len()..float_bounds.len() + criterion.float_param_count();
            let ints = int_bounds.len()..int_bounds.len() + criterion.int_param_count();
            float_bounds.extend(floats.clone().map(|_| criterion.float_param_range()));
            int_bounds.extend(ints.clone().map(|_| criterion.int_param_range()));
            slots.push(Slot { floats, ints });
        }
        Self {
            slots,
            float_bounds,
            int_bounds,
        }
    }

    /// Number of criteria covered by the layout.
    #[must_use]
    pub fn criterion_count(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn float_len(&self) -> usize {
        self.float_bounds.len()
    }

    #[must_use]
    pub fn int_len(&self) -> usize {
        self.int_bounds.len()
    }

    #[must_use]
    pub fn float_bounds(&self) -> &[RangeInclusive<f32>] {
        &self.float_bounds
    }

    #[must_use]
    pub fn int_bounds(&self) -> &[RangeInclusive<i64>] {
        &self.int_bounds
    }

    /// A genome drawn uniformly within the gene bounds.
    pub fn random_genome<R>(&self, rng: &mut R) -> Genome
    where
        R: Rng + ?Sized,
    {
        Genome {
            floats: genes::random_floats(rng, &self.float_bounds),
            ints: genes::random_ints(rng, &self.int_bounds),
        }
    }

    /// Reads the current parameters of `segmentor`.
    ///
    /// # Panics
    ///
    /// Panics if the tree no longer matches the layout.
    #[must_use]
    pub fn gather(&self, segmentor: &Segmentor) -> Genome {
        let criteria = segmentor.criteria();
        assert_eq!(criteria.len(), self.slots.len(), "criterion count changed");
        let mut genome = Genome {
            floats: Vec::with_capacity(self.float_len()),
            ints: Vec::with_capacity(self.int_len()),
        };
        for (criterion, slot) in criteria.into_iter().zip(&self.slots) {
            assert_eq!(criterion.float_param_count(), slot.floats.len());
            assert_eq!(criterion.int_param_count(), slot.ints.len());
            genome.floats.extend_from_slice(criterion.float_params());
            genome.ints.extend(criterion.int_params());
        }
        genome
    }

    /// Writes `genome` into the criteria of `segmentor`.
    ///
    /// # Panics
    ///
    /// Panics if the genome or the tree does not match the layout.
    pub fn scatter(&self, genome: &Genome, segmentor: &mut Segmentor) {
        assert_eq!(genome.floats.len(), self.float_len(), "float genome length");
        assert_eq!(genome.ints.len(), self.int_len(), "int genome length");
        let criteria = segmentor.criteria_mut();
        assert_eq!(criteria.len(), self.slots.len(), "criterion count changed");
        for (criterion, slot) in criteria.into_iter().zip(&self.slots) {
            criterion.set_float_params(&genome.floats[slot.floats.clone()]);
            criterion.set_int_params(&genome.ints[slot.ints.clone()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use rand_pcg::Pcg64Mcg;
    use segevo_engine::Criterion;

    use super::*;

    /// root
    /// ├── color
    /// │   └── pixel
    /// └── pixel
    ///     └── blob
    fn model() -> Segmentor {
        let mut segmentor = Segmentor::new(2).unwrap();
        let hsv = segmentor
            .add_criterion(None, Criterion::color_transform(2))
            .unwrap();
        segmentor
            .add_criterion(Some(&hsv), Criterion::pixel_net(2))
            .unwrap();
        let pixel = segmentor
            .add_criterion(None, Criterion::pixel_net(2))
            .unwrap();
        segmentor
            .add_criterion(Some(&pixel), Criterion::blob_filter(2))
            .unwrap();
        segmentor
    }

    #[test]
    fn test_layout_sums_declared_counts() {
        let segmentor = model();
        let layout = ParamLayout::new(&segmentor);
        assert_eq!(layout.criterion_count(), 4);
        assert_eq!(layout.float_len(), 110 * 2);
        assert_eq!(layout.int_len(), 2);
        assert_eq!(
            layout.slots.iter().map(|s| s.floats.clone()).collect::<Vec<_>>(),
            vec![0..0, 0..110, 110..220, 220..220]
        );
        assert_eq!(layout.slots[3].ints, 0..2);
    }

    #[test]
    fn test_scatter_then_gather() {
        let mut segmentor = model();
        let layout = ParamLayout::new(&segmentor);
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let genome = layout.random_genome(&mut rng);

        layout.scatter(&genome, &mut segmentor);
        assert_eq!(layout.gather(&segmentor), genome);

        // the sibling network got the second float range
        let criteria = segmentor.criteria();
        assert_eq!(criteria[2].float_params(), &genome.floats[110..220]);
        assert_eq!(criteria[3].int_params(), genome.ints);
    }

    #[test]
    #[should_panic(expected = "float genome length")]
    fn test_scatter_rejects_wrong_length() {
        let mut segmentor = model();
        let layout = ParamLayout::new(&segmentor);
        layout.scatter(&Genome::default(), &mut segmentor);
    }
}
