//! Evolutionary training of segmentor parameters.
//!
//! Criteria expose their trainable parameters as flat float and int vectors.
//! This crate maps the parameters of a whole criterion tree onto one genome
//! and evolves a population of genomes with a genetic algorithm, scoring each
//! one by the IoU of the segmentor's predictions against the dataset masks.
//!
//! # How Training Works
//!
//! 1. **Layout** - One walk over the tree fixes each criterion's gene ranges
//! 2. **Population** - The current parameters plus random genomes
//! 3. **Evaluation** - Each new genome is scattered into the tree and scored on
//!    the training samples, stopping early once it cannot reach the elite
//! 4. **New best** - Validated, checkpointed and reported to the observer
//! 5. **Reproduction** - Elites are kept, the rest is bred by crossover and
//!    mutation; the pool grows or shrinks with progress
//! 6. **Repeat** - Until the target fitness, the epoch budget or cancellation
//!
//! # Architecture
//!
//! ```text
//! Genetic Algorithm (genetic, genes)
//!     ↓ evolves
//! Genome
//!     ↓ scattered by
//! ParamLayout (layout)
//!     ↓ into
//! Segmentor (segevo-engine)
//!     ↓ scored by
//! evaluate_fast (fitness)
//!     ↓ produces
//! Fitness
//!     ↓ guides
//! Selection & Reproduction
//! ```
//!
//! # Example
//!
//! ```
//! use segevo_engine::{Criterion, Dataset, Sample, Segmentor};
//! use segevo_training::{TrainOptions, train};
//!
//! let mut segmentor = Segmentor::new(1).unwrap();
//! segmentor.add_criterion(None, Criterion::pixel_net(1)).unwrap();
//!
//! let sample = Sample {
//!     image: image::RgbImage::new(2, 2),
//!     masks: vec![image::GrayImage::new(2, 2)],
//! };
//! let dataset = Dataset::new("tiny", 1, vec![sample]).unwrap();
//!
//! let options = TrainOptions {
//!     seed: Some(1),
//!     ..TrainOptions::default()
//! };
//! let report = train(&mut segmentor, &dataset, &options, &mut ()).unwrap();
//! assert!(report.best_fitness.is_some());
//! ```

pub use self::trainer::{
    EpochSummary, EvolutionPhase, NewBest, TrainError, TrainOptions, TrainOutcome, TrainReport,
    TrainingObserver, train,
};

pub mod checkpoint;
pub mod fitness;
pub mod genes;
pub mod genetic;
pub mod layout;
pub mod trainer;
