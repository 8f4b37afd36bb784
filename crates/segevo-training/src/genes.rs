//! Gene vector operations for the genetic algorithm.
//!
//! A [`Genome`] holds the trainable parameters of a whole segmentor as two
//! flat vectors: float genes (network weights) and int genes (blob sizes).
//! Every gene has its own inclusive bounds, taken from the criterion that owns
//! it (see [`crate::layout::ParamLayout`]).
//!
//! # Operations
//!
//! - **Initialization**: [`random_floats`] and [`random_ints`] sample
//!   uniformly within the bounds
//! - **Crossover**: [`blx_alpha`] and [`blx_alpha_ints`] implement BLX-α
//! - **Mutation**: [`mutate`] and [`mutate_ints`] apply Gaussian noise
//!
//! All operators clamp their results to the gene bounds.
//!
//! ## BLX-α Crossover
//!
//! For parents `x1` and `x2` with `d = |x2 - x1|`, the child gene is drawn
//! uniformly from `[min - α·d, max + α·d]`. `α = 0` keeps children strictly
//! between their parents; larger values explore beyond them.
//!
//! ## Gaussian Mutation
//!
//! Each gene is perturbed with probability `rate` by noise drawn from
//! `N(0, σ·span)`, where `span` is the width of the gene's bounds, so one
//! `σ` fits genes of very different ranges.

use std::ops::RangeInclusive;

use rand::Rng;
use rand_distr::Normal;

/// Trainable parameters of one candidate segmentor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Genome {
    pub floats: Vec<f32>,
    pub ints: Vec<i64>,
}

/// Creates a gene vector by applying a function to each index.
///
/// # Examples
///
/// ```
/// use segevo_training::genes;
///
/// let genes = genes::from_fn(|i| i as f32 * 0.5, 3);
/// assert_eq!(genes, vec![0.0, 0.5, 1.0]);
/// ```
pub fn from_fn<T, F>(mut f: F, len: usize) -> Vec<T>
where
    F: FnMut(usize) -> T,
{
    let mut values = Vec::with_capacity(len);
    for i in 0..len {
        values.push(f(i));
    }
    values
}

/// Samples every float gene uniformly within its bounds.
pub fn random_floats<R>(rng: &mut R, bounds: &[RangeInclusive<f32>]) -> Vec<f32>
where
    R: Rng + ?Sized,
{
    from_fn(|i| rng.random_range(bounds[i].clone()), bounds.len())
}

/// Samples every int gene uniformly within its bounds.
pub fn random_ints<R>(rng: &mut R, bounds: &[RangeInclusive<i64>]) -> Vec<i64>
where
    R: Rng + ?Sized,
{
    from_fn(|i| rng.random_range(bounds[i].clone()), bounds.len())
}

/// Performs BLX-α crossover between two float gene vectors.
///
/// # Panics
///
/// Panics if the parents and `bounds` have different lengths.
pub fn blx_alpha<R>(
    p1: &[f32],
    p2: &[f32],
    alpha: f32,
    bounds: &[RangeInclusive<f32>],
    rng: &mut R,
) -> Vec<f32>
where
    R: Rng + ?Sized,
{
    assert_eq!(p1.len(), p2.len());
    assert_eq!(p1.len(), bounds.len());
    from_fn(
        |i| {
            let min = f32::min(p1[i], p2[i]);
            let max = f32::max(p1[i], p2[i]);
            let d = max - min;
            let lower = min - alpha * d;
            let upper = max + alpha * d;
            rng.random_range(lower..=upper)
                .clamp(*bounds[i].start(), *bounds[i].end())
        },
        p1.len(),
    )
}

/// BLX-α for int genes: the blend is computed in `f64` and rounded.
///
/// # Panics
///
/// Panics if the parents and `bounds` have different lengths.
#[expect(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn blx_alpha_ints<R>(
    p1: &[i64],
    p2: &[i64],
    alpha: f32,
    bounds: &[RangeInclusive<i64>],
    rng: &mut R,
) -> Vec<i64>
where
    R: Rng + ?Sized,
{
    assert_eq!(p1.len(), p2.len());
    assert_eq!(p1.len(), bounds.len());
    from_fn(
        |i| {
            let min = p1[i].min(p2[i]) as f64;
            let max = p1[i].max(p2[i]) as f64;
            let d = max - min;
            let lower = min - f64::from(alpha) * d;
            let upper = max + f64::from(alpha) * d;
            (rng.random_range(lower..=upper).round() as i64)
                .clamp(*bounds[i].start(), *bounds[i].end())
        },
        p1.len(),
    )
}

/// Applies Gaussian mutation to float genes in place.
///
/// Typical configurations used by the trainer:
///
/// - **Exploration phase**: `sigma = 0.1`, `rate = 0.3`
/// - **Transition phase**: `sigma = 0.05`, `rate = 0.3`
/// - **Convergence phase**: `sigma = 0.02`, `rate = 0.3`
///
/// # Panics
///
/// Panics if `genes` and `bounds` have different lengths.
pub fn mutate<R>(genes: &mut [f32], sigma: f32, bounds: &[RangeInclusive<f32>], rate: f32, rng: &mut R)
where
    R: Rng + ?Sized,
{
    assert_eq!(genes.len(), bounds.len());
    for (g, range) in genes.iter_mut().zip(bounds) {
        if !rng.random_bool(rate.into()) {
            continue;
        }
        let span = range.end() - range.start();
        if let Ok(normal) = Normal::new(0.0, sigma * span) {
            *g = (*g + rng.sample(normal)).clamp(*range.start(), *range.end());
        }
    }
}

/// Applies Gaussian mutation to int genes in place, rounding the noise.
///
/// # Panics
///
/// Panics if `genes` and `bounds` have different lengths.
#[expect(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn mutate_ints<R>(genes: &mut [i64], sigma: f32, bounds: &[RangeInclusive<i64>], rate: f32, rng: &mut R)
where
    R: Rng + ?Sized,
{
    assert_eq!(genes.len(), bounds.len());
    for (g, range) in genes.iter_mut().zip(bounds) {
        if !rng.random_bool(rate.into()) {
            continue;
        }
        let span = (range.end() - range.start()) as f64;
        if let Ok(normal) = Normal::new(0.0, f64::from(sigma) * span) {
            let noise: f64 = rng.sample(normal);
            *g = g
                .saturating_add(noise.round() as i64)
                .clamp(*range.start(), *range.end());
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use rand_pcg::Pcg64Mcg;

    use super::*;

    #[test]
    fn test_random_genes_respect_bounds() {
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let float_bounds = vec![-1.0..=1.0, 0.0..=0.5, 2.0..=2.0];
        let int_bounds = vec![0..=10, -5..=5];
        for _ in 0..100 {
            let floats = random_floats(&mut rng, &float_bounds);
            for (v, b) in floats.iter().zip(&float_bounds) {
                assert!(b.contains(v), "{v} not in {b:?}");
            }
            let ints = random_ints(&mut rng, &int_bounds);
            for (v, b) in ints.iter().zip(&int_bounds) {
                assert!(b.contains(v), "{v} not in {b:?}");
            }
        }
    }

    #[test]
    fn test_blx_alpha_without_alpha_stays_between_parents() {
        let mut rng = Pcg64Mcg::seed_from_u64(5);
        let bounds = vec![-1.0..=1.0; 3];
        let p1 = [-0.5, 0.2, 0.9];
        let p2 = [0.5, 0.2, -0.9];
        for _ in 0..100 {
            let child = blx_alpha(&p1, &p2, 0.0, &bounds, &mut rng);
            assert!((-0.5..=0.5).contains(&child[0]));
            assert!((child[1] - 0.2).abs() < 1e-6);
            assert!((-0.9..=0.9).contains(&child[2]));
        }
    }

    #[test]
    fn test_blx_alpha_clamps_to_bounds() {
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let child = blx_alpha(&[-1.0], &[1.0], 2.0, &[-1.0..=1.0], &mut rng);
        assert!((-1.0..=1.0).contains(&child[0]));

        for _ in 0..100 {
            let child = blx_alpha_ints(&[0, 8], &[10, 10], 1.0, &[0..=10, 0..=10], &mut rng);
            assert!(child.iter().all(|v| (0..=10).contains(v)));
        }
    }

    #[test]
    fn test_mutation_rate_bounds() {
        let mut rng = Pcg64Mcg::seed_from_u64(11);
        let bounds = vec![-1.0..=1.0; 50];
        let mut genes = vec![0.25; 50];
        mutate(&mut genes, 0.5, &bounds, 0.0, &mut rng);
        assert!(genes.iter().all(|&g| g == 0.25));

        mutate(&mut genes, 0.5, &bounds, 1.0, &mut rng);
        assert!(genes.iter().any(|&g| g != 0.25));
        assert!(genes.iter().all(|g| (-1.0..=1.0).contains(g)));

        let int_bounds = vec![0..=100; 50];
        let mut ints = vec![50; 50];
        mutate_ints(&mut ints, 0.5, &int_bounds, 1.0, &mut rng);
        assert!(ints.iter().all(|v| (0..=100).contains(v)));
        assert!(ints.iter().any(|&v| v != 50));
    }
}
