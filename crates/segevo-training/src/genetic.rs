//! Genetic algorithm over segmentor genomes.
//!
//! The GA uses tournament selection, BLX-α crossover and Gaussian mutation to
//! create new generations, carrying the best individuals over unchanged.
//!
//! # Algorithm Overview
//!
//! 1. **Evaluate Fitness** - The trainer scores every individual that has no
//!    fitness yet
//! 2. **Elite Selection** - Top performers are kept unchanged, fitness included
//! 3. **Tournament Selection** - Parents are picked by tournament
//! 4. **Crossover (BLX-α)** - Two parents' genes are blended into a child
//! 5. **Mutation** - Gaussian noise is added to the child's genes
//!
//! # Key Components
//!
//! - [`Individual`] - A genome and its fitness, once evaluated
//! - [`Population`] - Individuals of one generation
//! - [`PopulationEvolver`] - Selection, crossover and mutation parameters
//!
//! Unlike a fixed-size GA, [`PopulationEvolver::evolve`] takes the size of
//! the next generation, which lets the trainer grow and shrink the pool
//! between its configured bounds.

use std::cmp::Ordering;

use rand::{Rng, seq::IndexedRandom};

use crate::{
    genes::{self, Genome},
    layout::ParamLayout,
};

/// A candidate solution.
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    genome: Genome,
    fitness: Option<f32>,
}

impl Individual {
    /// Creates an individual that still has to be evaluated.
    #[must_use]
    pub fn new(genome: Genome) -> Self {
        Self {
            genome,
            fitness: None,
        }
    }

    #[must_use]
    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    /// Fitness, or `None` if not evaluated yet.
    ///
    /// Values produced by early-exit evaluation are lower bounds of the true
    /// fitness.
    #[must_use]
    pub fn fitness(&self) -> Option<f32> {
        self.fitness
    }

    pub fn set_fitness(&mut self, fitness: f32) {
        self.fitness = Some(fitness);
    }

    fn rank_key(&self) -> f32 {
        self.fitness.unwrap_or(f32::NEG_INFINITY)
    }

    fn cmp_fitness(&self, other: &Self) -> Ordering {
        self.rank_key().total_cmp(&other.rank_key())
    }
}

/// Summary of the fitness values of a population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitnessStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

/// Individuals of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    individuals: Vec<Individual>,
}

impl Population {
    /// Creates a population whose first individual is `seed` and whose other
    /// `count - 1` individuals are random.
    pub fn seeded<R>(seed: Genome, layout: &ParamLayout, count: usize, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let individuals = std::iter::once(seed)
            .chain((1..count).map(|_| layout.random_genome(rng)))
            .map(Individual::new)
            .collect();
        Self { individuals }
    }

    #[must_use]
    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    pub fn individuals_mut(&mut self) -> &mut [Individual] {
        &mut self.individuals
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    /// Sorts by fitness, best first. Unevaluated individuals go last.
    pub fn sort_by_fitness(&mut self) {
        self.individuals.sort_by(|a, b| b.cmp_fitness(a));
    }

    /// Fitness summary over the evaluated individuals.
    #[must_use]
    pub fn compute_fitness_stats(&self) -> Option<FitnessStats> {
        let values: Vec<f32> = self
            .individuals
            .iter()
            .filter_map(Individual::fitness)
            .collect();
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        #[expect(clippy::cast_precision_loss)]
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        Some(FitnessStats { min, max, mean })
    }
}

/// Controls how one generation turns into the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopulationEvolver {
    /// Number of top individuals preserved unchanged
    pub elite_count: usize,
    /// Tournament size for selection (larger = stronger selection pressure)
    pub tournament_size: usize,
    /// Standard deviation of Gaussian mutation, as a fraction of each gene's span
    pub mutation_sigma: f32,
    /// BLX-α crossover parameter
    pub blx_alpha: f32,
    /// Probability of mutating each gene
    pub mutation_rate: f32,
}

impl PopulationEvolver {
    /// Builds a generation of `next_size` individuals.
    ///
    /// The top `elite_count` individuals are carried over with their fitness;
    /// the rest are new, unevaluated children.
    ///
    /// # Panics
    ///
    /// Panics if `population` is not sorted by fitness (best first) or if it
    /// holds fewer than `elite_count` individuals.
    pub fn evolve<R>(
        &self,
        population: &Population,
        next_size: usize,
        layout: &ParamLayout,
        rng: &mut R,
    ) -> Population
    where
        R: Rng + ?Sized,
    {
        assert!(
            population
                .individuals
                .is_sorted_by(|a, b| a.cmp_fitness(b) != Ordering::Less)
        );
        assert!(population.len() >= self.elite_count);

        let mut next_individuals = Vec::with_capacity(next_size);
        next_individuals.extend(
            population.individuals[..self.elite_count.min(next_size)]
                .iter()
                .cloned(),
        );

        while next_individuals.len() < next_size {
            let p1 = tournament_select(&population.individuals, self.tournament_size, rng);
            let p2 = tournament_select(&population.individuals, self.tournament_size, rng);

            let mut floats = genes::blx_alpha(
                &p1.genome.floats,
                &p2.genome.floats,
                self.blx_alpha,
                layout.float_bounds(),
                rng,
            );
            genes::mutate(
                &mut floats,
                self.mutation_sigma,
                layout.float_bounds(),
                self.mutation_rate,
                rng,
            );
            let mut ints = genes::blx_alpha_ints(
                &p1.genome.ints,
                &p2.genome.ints,
                self.blx_alpha,
                layout.int_bounds(),
                rng,
            );
            genes::mutate_ints(
                &mut ints,
                self.mutation_sigma,
                layout.int_bounds(),
                self.mutation_rate,
                rng,
            );

            next_individuals.push(Individual::new(Genome { floats, ints }));
        }

        Population {
            individuals: next_individuals,
        }
    }
}

/// Randomly picks `tournament_size` individuals and returns the fittest.
///
/// # Panics
///
/// Panics if `population` is empty or `tournament_size` is 0.
fn tournament_select<'a, R>(
    population: &'a [Individual],
    tournament_size: usize,
    rng: &mut R,
) -> &'a Individual
where
    R: Rng + ?Sized,
{
    assert!(tournament_size > 0);
    population
        .choose_multiple(rng, tournament_size)
        .max_by(|a, b| a.cmp_fitness(b))
        .expect("population must not be empty")
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use rand_pcg::Pcg64Mcg;
    use segevo_engine::{Criterion, Segmentor};

    use super::*;

    fn layout() -> ParamLayout {
        let mut segmentor = Segmentor::new(1).unwrap();
        let pixel = segmentor
            .add_criterion(None, Criterion::pixel_net(1))
            .unwrap();
        segmentor
            .add_criterion(Some(&pixel), Criterion::blob_filter(1))
            .unwrap();
        ParamLayout::new(&segmentor)
    }

    fn evaluated(layout: &ParamLayout, fitness: &[f32], rng: &mut Pcg64Mcg) -> Population {
        let mut population = Population::seeded(layout.random_genome(rng), layout, fitness.len(), rng);
        for (ind, &f) in population.individuals_mut().iter_mut().zip(fitness) {
            ind.set_fitness(f);
        }
        population
    }

    const EVOLVER: PopulationEvolver = PopulationEvolver {
        elite_count: 2,
        tournament_size: 2,
        mutation_sigma: 0.1,
        blx_alpha: 0.2,
        mutation_rate: 0.3,
    };

    #[test]
    fn test_seeded_population_keeps_seed_first() {
        let layout = layout();
        let mut rng = Pcg64Mcg::seed_from_u64(2);
        let seed = layout.random_genome(&mut rng);
        let population = Population::seeded(seed.clone(), &layout, 5, &mut rng);
        assert_eq!(population.len(), 5);
        assert_eq!(population.individuals()[0].genome(), &seed);
        assert!(population.individuals().iter().all(|i| i.fitness().is_none()));
    }

    #[test]
    fn test_sort_and_stats() {
        let layout = layout();
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let mut population = evaluated(&layout, &[0.2, 0.8, 0.5], &mut rng);
        population.individuals_mut()[0].fitness = None;
        population.sort_by_fitness();
        let order: Vec<_> = population.individuals().iter().map(Individual::fitness).collect();
        assert_eq!(order, [Some(0.8), Some(0.5), None]);

        let stats = population.compute_fitness_stats().unwrap();
        assert_eq!((stats.min, stats.max), (0.5, 0.8));
        assert!((stats.mean - 0.65).abs() < 1e-6);
    }

    #[test]
    fn test_evolve_keeps_elites_and_resizes() {
        let layout = layout();
        let mut rng = Pcg64Mcg::seed_from_u64(4);
        let mut population = evaluated(&layout, &[0.1, 0.9, 0.4, 0.7, 0.3], &mut rng);
        population.sort_by_fitness();

        for next_size in [3, 5, 8] {
            let next = EVOLVER.evolve(&population, next_size, &layout, &mut rng);
            assert_eq!(next.len(), next_size);
            assert_eq!(next.individuals()[..2], population.individuals()[..2]);
            assert!(next.individuals()[2..].iter().all(|i| i.fitness().is_none()));
            for ind in next.individuals() {
                assert_eq!(ind.genome().floats.len(), layout.float_len());
                assert_eq!(ind.genome().ints.len(), layout.int_len());
            }
        }
    }

    #[test]
    fn test_tournament_prefers_fitter() {
        let layout = layout();
        let mut rng = Pcg64Mcg::seed_from_u64(5);
        let population = evaluated(&layout, &[0.1, 0.9], &mut rng);
        for _ in 0..20 {
            let winner = tournament_select(population.individuals(), 2, &mut rng);
            assert_eq!(winner.fitness(), Some(0.9));
        }
    }
}
