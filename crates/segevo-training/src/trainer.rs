//! Training loop.
//!
//! ```text
//! Initializing (layout, population)
//!     ↓
//! Epoch ─→ Entity ─→ Evaluate ─→ UpdateFitness ─→ (new best) Checkpoint
//!   ↑                                                   │
//!   └──────── Evolve (selection, crossover, mutation, pool resize)
//!     ↓
//! TargetReached | EpochsExhausted | Interrupted
//! ```
//!
//! The parameter layout is computed once per call. The first individual of
//! the initial population is the segmentor's current parameters, the others
//! are random. Elites keep their fitness across epochs and are never
//! re-evaluated; their scores seed the per-epoch [`EliteCutoff`] used for
//! early exit.
//!
//! Every time an entity beats the best fitness so far, its exact validation
//! fitness is computed (when the dataset has a validation category), a
//! checkpoint is written (when a directory is configured) and the observer is
//! notified. The best genome is kept in memory and scattered back into the
//! segmentor when training ends, however it ends.
//!
//! The input cache lives for the duration of one call.

use std::path::{Path, PathBuf};

use rand::SeedableRng as _;
use rand_pcg::Pcg64Mcg;
use segevo_engine::{
    CancelToken, Dataset, InputCache, ParamError, Sample, Segmentor, SegmentorError,
    TrainingParams,
};

use crate::{
    checkpoint,
    fitness::{self, EliteCutoff},
    genes::Genome,
    genetic::{FitnessStats, Individual, Population, PopulationEvolver},
    layout::ParamLayout,
};

/// Dataset category the fitness is computed on.
pub const TRAINING_CATEGORY: usize = 0;
/// Dataset category used for the exact validation fitness of new bests.
pub const VALIDATION_CATEGORY: usize = 1;

const TOURNAMENT_SIZE: usize = 2;
const MUTATION_RATE: f32 = 0.3;
const BLX_ALPHA: f32 = 0.2;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvolutionPhase {
    #[default]
    Exploration,
    Transition,
    Convergence,
}

impl EvolutionPhase {
    /// Phase of `epoch` within a budget of `epoch_count` epochs: the first
    /// 30% explore, up to 80% transition, the rest converge.
    #[must_use]
    pub fn from_progress(epoch: u32, epoch_count: u32) -> Self {
        match u64::from(epoch) * 100 / u64::from(epoch_count.max(1)) {
            0..30 => Self::Exploration,
            30..80 => Self::Transition,
            _ => Self::Convergence,
        }
    }

    const fn mutation_sigma(self) -> f32 {
        match self {
            Self::Exploration => 0.1,
            Self::Transition => 0.05,
            Self::Convergence => 0.02,
        }
    }

    const fn evolver(self, elite_count: usize) -> PopulationEvolver {
        PopulationEvolver {
            elite_count,
            tournament_size: TOURNAMENT_SIZE,
            mutation_sigma: self.mutation_sigma(),
            blx_alpha: BLX_ALPHA,
            mutation_rate: MUTATION_RATE,
        }
    }
}

/// Run-level options of [`train`].
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    /// Seed of every random decision; drawn from the OS when `None`.
    pub seed: Option<u64>,
    /// Where checkpoints are written; none are written when `None`.
    pub checkpoint_dir: Option<PathBuf>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum TrainOutcome {
    #[display("target reached")]
    TargetReached,
    #[display("epochs exhausted")]
    EpochsExhausted,
    #[display("interrupted")]
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub outcome: TrainOutcome,
    /// Best training fitness, `None` if interrupted before any evaluation.
    pub best_fitness: Option<f32>,
    pub best_validation: Option<f32>,
    pub epochs_run: u32,
    /// Last checkpoint successfully written.
    pub checkpoint: Option<PathBuf>,
}

/// A new best entity.
#[derive(Debug, Clone, Copy)]
pub struct NewBest<'a> {
    pub epoch: u32,
    pub fitness: f32,
    pub validation: Option<f32>,
    pub checkpoint: Option<&'a Path>,
}

/// State at the end of a fully evaluated epoch.
#[derive(Debug, Clone, Copy)]
pub struct EpochSummary {
    pub epoch: u32,
    pub phase: EvolutionPhase,
    pub pool_size: usize,
    pub stats: FitnessStats,
    pub best_fitness: f32,
}

/// Hooks called by [`train`]. Both default to doing nothing.
pub trait TrainingObserver {
    fn on_new_best(&mut self, _event: &NewBest<'_>) {}
    fn on_epoch_end(&mut self, _summary: &EpochSummary) {}
}

impl TrainingObserver for () {}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum TrainError {
    #[display("dataset provides {masks} masks per sample but the model has {classes} classes")]
    InvalidData { masks: usize, classes: usize },
    #[display("dataset has no training sample")]
    EmptyTrainingSet,
    #[display("invalid training parameters: {_0}")]
    Params(#[error(source)] ParamError),
    #[display("{_0}")]
    Segmentor(#[error(source)] SegmentorError),
}

impl From<ParamError> for TrainError {
    fn from(e: ParamError) -> Self {
        Self::Params(e)
    }
}

impl From<SegmentorError> for TrainError {
    fn from(e: SegmentorError) -> Self {
        Self::Segmentor(e)
    }
}

/// Exact validation fitness of the current parameters, then a checkpoint.
///
/// An interrupted validation yields neither a value nor a checkpoint, since
/// the file name would lack the validation fitness.
fn checkpoint_best(
    segmentor: &Segmentor,
    dataset: &Dataset,
    options: &TrainOptions,
    has_validation: bool,
    epoch: u32,
    fitness: f32,
) -> Result<(Option<f32>, Option<PathBuf>), SegmentorError> {
    let validation = if has_validation {
        match segmentor.evaluate_with(dataset, VALIDATION_CATEGORY, &options.cancel) {
            Ok(v) => Some(v),
            Err(SegmentorError::Interrupted) => {
                log::warn!("Epoch #{epoch}: validation interrupted, checkpoint not written");
                return Ok((None, None));
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };
    let checkpoint = options.checkpoint_dir.as_deref().and_then(|dir| {
        checkpoint::write(dir, segmentor, epoch, fitness, validation)
            .inspect_err(|e| log::warn!("Failed to write checkpoint: {e}"))
            .ok()
    });

    match validation {
        Some(v) => log::info!("Epoch #{epoch}: new best {fitness:.6} (validation {v:.6})"),
        None => log::info!("Epoch #{epoch}: new best {fitness:.6}"),
    }
    Ok((validation, checkpoint))
}

/// Shrinks the pool by one elite after an improving epoch, grows it by one
/// elite otherwise, within the configured bounds.
fn next_pool_size(params: &TrainingParams, current: usize, improved: bool) -> usize {
    if improved {
        current
            .saturating_sub(params.elite_count)
            .max(params.min_pool_size)
    } else {
        (current + params.elite_count).min(params.max_pool_size)
    }
}

struct Best {
    genome: Genome,
    fitness: f32,
    validation: Option<f32>,
}

/// Trains the parameters of `segmentor` on `dataset` with the hyperparameters
/// stored in the segmentor.
///
/// On return, including when interrupted, the segmentor holds the best
/// parameters found. When checkpoints are enabled, that is also the content
/// of [`TrainReport::checkpoint`] unless its write failed or the run was
/// interrupted while validating it.
pub fn train<O>(
    segmentor: &mut Segmentor,
    dataset: &Dataset,
    options: &TrainOptions,
    observer: &mut O,
) -> Result<TrainReport, TrainError>
where
    O: TrainingObserver + ?Sized,
{
    if dataset.mask_count() < segmentor.class_count() {
        return Err(TrainError::InvalidData {
            masks: dataset.mask_count(),
            classes: segmentor.class_count(),
        });
    }
    let params = *segmentor.training_params();
    params.validate()?;
    segmentor.validate()?;

    let samples: Vec<&Sample> = dataset.category(TRAINING_CATEGORY).collect();
    if samples.is_empty() {
        return Err(TrainError::EmptyTrainingSet);
    }
    let validation_count = dataset.category(VALIDATION_CATEGORY).len();

    for index in segmentor.root().reuse_conflicts() {
        log::warn!(
            "Criterion #{index} reuses its input below a trainable criterion; its input is not cached"
        );
    }

    let layout = ParamLayout::new(segmentor);
    let mut rng = match options.seed {
        Some(seed) => Pcg64Mcg::seed_from_u64(seed),
        None => Pcg64Mcg::from_rng(&mut rand::rng()),
    };
    log::info!(
        "Training {} float and {} int genes on {} samples ({} validation), pool {} in [{}, {}], {} epochs",
        layout.float_len(),
        layout.int_len(),
        samples.len(),
        validation_count,
        params.pool_size,
        params.min_pool_size,
        params.max_pool_size,
        params.epoch_count,
    );

    let initial = layout.gather(segmentor);
    let mut population = Population::seeded(initial.clone(), &layout, params.pool_size, &mut rng);
    let mut cache = InputCache::new();
    let cancel = &options.cancel;

    let mut best: Option<Best> = None;
    let mut last_checkpoint = None;
    let mut outcome = TrainOutcome::EpochsExhausted;
    let mut epochs_run = 0;

    let result: Result<(), SegmentorError> = 'training: {
        for epoch in 0..params.epoch_count {
            epochs_run = epoch + 1;
            let phase = EvolutionPhase::from_progress(epoch, params.epoch_count);

            let mut cutoff = EliteCutoff::new(params.elite_count);
            for fitness in population.individuals().iter().filter_map(Individual::fitness) {
                cutoff.push(fitness);
            }

            let mut improved = false;
            for individual in population.individuals_mut() {
                if individual.fitness().is_some() {
                    continue;
                }
                if cancel.is_cancelled() {
                    outcome = TrainOutcome::Interrupted;
                    break 'training Ok(());
                }

                layout.scatter(individual.genome(), segmentor);
                let fitness = match fitness::evaluate_fast(
                    segmentor,
                    &samples,
                    cutoff.value(),
                    &mut cache,
                    cancel,
                ) {
                    Ok(fitness) => fitness,
                    Err(SegmentorError::Interrupted) => {
                        outcome = TrainOutcome::Interrupted;
                        break 'training Ok(());
                    }
                    Err(e) => break 'training Err(e),
                };
                individual.set_fitness(fitness);
                cutoff.push(fitness);

                if best.as_ref().is_some_and(|b| fitness <= b.fitness) {
                    continue;
                }
                improved = true;

                let (validation, checkpoint) = match checkpoint_best(
                    segmentor,
                    dataset,
                    options,
                    validation_count > 0,
                    epoch,
                    fitness,
                ) {
                    Ok(recorded) => recorded,
                    Err(e) => break 'training Err(e),
                };
                observer.on_new_best(&NewBest {
                    epoch,
                    fitness,
                    validation,
                    checkpoint: checkpoint.as_deref(),
                });
                if checkpoint.is_some() {
                    last_checkpoint = checkpoint;
                }
                best = Some(Best {
                    genome: individual.genome().clone(),
                    fitness,
                    validation,
                });

                if cancel.is_cancelled() {
                    outcome = TrainOutcome::Interrupted;
                    break 'training Ok(());
                }
                if fitness >= params.target_fitness {
                    outcome = TrainOutcome::TargetReached;
                    break 'training Ok(());
                }
            }

            population.sort_by_fitness();
            let pool_size = population.len();
            if let (Some(stats), Some(b)) = (population.compute_fitness_stats(), &best) {
                log::debug!(
                    "Epoch #{epoch} ({phase:?}): pool {pool_size}, min {:.4}, mean {:.4}, max {:.4}, best {:.4}",
                    stats.min,
                    stats.mean,
                    stats.max,
                    b.fitness,
                );
                observer.on_epoch_end(&EpochSummary {
                    epoch,
                    phase,
                    pool_size,
                    stats,
                    best_fitness: b.fitness,
                });
            }

            if epoch + 1 < params.epoch_count {
                let next_size = next_pool_size(&params, pool_size, improved);
                population = phase
                    .evolver(params.elite_count)
                    .evolve(&population, next_size, &layout, &mut rng);
            }
        }
        Ok(())
    };

    layout.scatter(best.as_ref().map_or(&initial, |b| &b.genome), segmentor);
    result?;

    log::info!(
        "Training ended after {epochs_run} epochs: {outcome}, best fitness {}",
        best.as_ref()
            .map_or_else(|| "n/a".to_owned(), |b| format!("{:.6}", b.fitness))
    );
    Ok(TrainReport {
        outcome,
        best_fitness: best.as_ref().map(|b| b.fitness),
        best_validation: best.as_ref().and_then(|b| b.validation),
        epochs_run,
        checkpoint: last_checkpoint,
    })
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use rand::SeedableRng as _;
    use segevo_engine::Criterion;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        bests: Vec<(u32, f32)>,
        checkpoints: Vec<PathBuf>,
        pool_sizes: Vec<usize>,
        cancel_on_best: Option<CancelToken>,
    }

    impl TrainingObserver for Recorder {
        fn on_new_best(&mut self, event: &NewBest<'_>) {
            self.bests.push((event.epoch, event.fitness));
            self.checkpoints.extend(event.checkpoint.map(Path::to_owned));
            if let Some(cancel) = &self.cancel_on_best {
                cancel.cancel();
            }
        }

        fn on_epoch_end(&mut self, summary: &EpochSummary) {
            self.pool_sizes.push(summary.pool_size);
        }
    }

    /// A uniform image of `color`, whose pixels all belong to `class`.
    fn single_color(color: [u8; 3], class: usize) -> Sample {
        Sample {
            image: RgbImage::from_pixel(4, 4, Rgb(color)),
            masks: (0..2)
                .map(|c| GrayImage::from_pixel(4, 4, Luma([if c == class { 0 } else { 255 }])))
                .collect(),
        }
    }

    fn red_and_blue() -> Dataset {
        Dataset::new(
            "red-and-blue",
            2,
            vec![single_color([230, 30, 30], 0), single_color([30, 30, 230], 1)],
        )
        .unwrap()
    }

    fn pixel_model(params: TrainingParams) -> Segmentor {
        let mut segmentor = Segmentor::new(2).unwrap();
        segmentor
            .add_criterion(None, Criterion::pixel_net(2))
            .unwrap();
        segmentor.set_training_params(params).unwrap();
        segmentor
    }

    fn params(epochs: u32, pool: usize, elite: usize, target: f32) -> TrainingParams {
        TrainingParams {
            epoch_count: epochs,
            elite_count: elite,
            target_fitness: target,
            ..TrainingParams::default().with_fixed_pool(pool)
        }
    }

    fn seeded(seed: u64) -> TrainOptions {
        TrainOptions {
            seed: Some(seed),
            ..TrainOptions::default()
        }
    }

    #[test]
    fn test_phase_from_progress() {
        let test_cases = [
            (0, 100, EvolutionPhase::Exploration),
            (29, 100, EvolutionPhase::Exploration),
            (30, 100, EvolutionPhase::Transition),
            (79, 100, EvolutionPhase::Transition),
            (80, 100, EvolutionPhase::Convergence),
            (4, 5, EvolutionPhase::Convergence),
            (0, 1, EvolutionPhase::Exploration),
        ];
        for (epoch, total, expected) in test_cases {
            assert_eq!(EvolutionPhase::from_progress(epoch, total), expected, "{epoch}/{total}");
        }
    }

    #[test]
    fn test_pool_resizing() {
        let params = TrainingParams {
            pool_size: 10,
            min_pool_size: 6,
            max_pool_size: 14,
            elite_count: 3,
            ..TrainingParams::default()
        };
        let test_cases = [
            (10, true, 7),
            (7, true, 6),
            (6, true, 6),
            (10, false, 13),
            (13, false, 14),
            (14, false, 14),
        ];
        for (current, improved, expected) in test_cases {
            assert_eq!(next_pool_size(&params, current, improved), expected, "{current} {improved}");
        }
    }

    #[test]
    fn test_too_few_masks_is_rejected_up_front() {
        let mut segmentor = Segmentor::new(3).unwrap();
        segmentor
            .add_criterion(None, Criterion::pixel_net(3))
            .unwrap();
        let before = segmentor.clone();
        let result = train(&mut segmentor, &red_and_blue(), &seeded(1), &mut ());
        assert!(matches!(
            result,
            Err(TrainError::InvalidData {
                masks: 2,
                classes: 3
            })
        ));
        assert_eq!(segmentor, before);
    }

    #[test]
    fn test_empty_training_category() {
        let mut dataset = red_and_blue();
        dataset
            .split(&[0, 2], &mut Pcg64Mcg::seed_from_u64(0))
            .unwrap();
        let mut segmentor = pixel_model(params(5, 6, 2, 0.9));
        let result = train(&mut segmentor, &dataset, &seeded(1), &mut ());
        assert!(matches!(result, Err(TrainError::EmptyTrainingSet)));
    }

    #[test]
    fn test_smoke_training_reaches_target() {
        let dataset = red_and_blue();
        let mut segmentor = pixel_model(params(50, 20, 5, 0.9));
        let report = train(&mut segmentor, &dataset, &seeded(42), &mut ()).unwrap();

        assert_eq!(report.outcome, TrainOutcome::TargetReached);
        let best = report.best_fitness.unwrap();
        assert!(best >= 0.9, "best fitness {best}");
        assert_eq!(segmentor.evaluate(&dataset, TRAINING_CATEGORY).unwrap(), best);
    }

    #[test]
    fn test_cancellation_keeps_last_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut dataset = Dataset::new(
            "colors",
            2,
            vec![
                single_color([230, 30, 30], 0),
                single_color([30, 30, 230], 1),
                single_color([200, 60, 40], 0),
                single_color([40, 60, 200], 1),
            ],
        )
        .unwrap();
        dataset
            .split(&[2, 2], &mut Pcg64Mcg::seed_from_u64(3))
            .unwrap();

        let cancel = CancelToken::new();
        let options = TrainOptions {
            seed: Some(5),
            checkpoint_dir: Some(dir.path().to_owned()),
            cancel: cancel.clone(),
        };
        let mut recorder = Recorder {
            cancel_on_best: Some(cancel),
            ..Recorder::default()
        };
        let mut segmentor = pixel_model(params(50, 10, 3, 1.0));
        let report = train(&mut segmentor, &dataset, &options, &mut recorder).unwrap();

        assert_eq!(report.outcome, TrainOutcome::Interrupted);
        assert_eq!(report.epochs_run, 1);
        assert_eq!(recorder.bests.len(), 1);
        assert!(report.best_validation.is_some());

        let path = report.checkpoint.unwrap();
        assert_eq!(recorder.checkpoints, [path.clone()]);
        let name = path.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(name.starts_with("00000_"), "{name}");
        assert!(name.ends_with("_checkpoint.json"), "{name}");
        assert_eq!(Segmentor::open(&path).unwrap(), segmentor);
    }

    #[test]
    fn test_failed_checkpoint_write_keeps_training() {
        let dir = tempfile::tempdir().unwrap();
        let options = TrainOptions {
            checkpoint_dir: Some(dir.path().join("missing")),
            ..seeded(7)
        };
        let dataset = red_and_blue();
        let mut recorder = Recorder::default();
        let mut segmentor = pixel_model(params(3, 6, 2, 1.0));
        let report = train(&mut segmentor, &dataset, &options, &mut recorder).unwrap();

        assert_ne!(report.outcome, TrainOutcome::Interrupted);
        assert_eq!(report.checkpoint, None);
        assert!(recorder.checkpoints.is_empty());
        assert!(!recorder.bests.is_empty());

        let best = report.best_fitness.unwrap();
        assert_eq!(recorder.bests.last().map(|b| b.1), Some(best));
        assert_eq!(segmentor.evaluate(&dataset, TRAINING_CATEGORY).unwrap(), best);
    }

    #[test]
    fn test_interrupted_validation_skips_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut dataset = red_and_blue();
        dataset
            .split(&[1, 1], &mut Pcg64Mcg::seed_from_u64(0))
            .unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = TrainOptions {
            seed: Some(1),
            checkpoint_dir: Some(dir.path().to_owned()),
            cancel,
        };
        let segmentor = pixel_model(params(5, 6, 2, 0.9));

        assert_eq!(
            checkpoint_best(&segmentor, &dataset, &options, true, 0, 0.5),
            Ok((None, None))
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let options = TrainOptions {
            cancel: CancelToken::new(),
            ..options
        };
        let (validation, checkpoint) =
            checkpoint_best(&segmentor, &dataset, &options, true, 0, 0.5).unwrap();
        assert!(validation.is_some());
        assert!(checkpoint.is_some_and(|p| p.exists()));
    }

    #[test]
    fn test_cancelled_before_start_keeps_model() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = TrainOptions {
            cancel,
            ..seeded(1)
        };
        let mut segmentor = pixel_model(params(5, 6, 2, 0.9));
        let before = segmentor.clone();
        let report = train(&mut segmentor, &red_and_blue(), &options, &mut ()).unwrap();
        assert_eq!(report.outcome, TrainOutcome::Interrupted);
        assert_eq!(report.best_fitness, None);
        assert_eq!(segmentor, before);
    }

    /// Two stripes per image, so that no single colour rule is perfect.
    fn stripes() -> Dataset {
        let samples = (0..3)
            .map(|i| {
                let split = 1 + i;
                let image = RgbImage::from_fn(6, 4, |x, y| {
                    if x < split || y == 0 { Rgb([200, 40, 40]) } else { Rgb([40, 200, 40]) }
                });
                let masks = (0..2)
                    .map(|class| {
                        GrayImage::from_fn(6, 4, |x, _| {
                            Luma([if (x < split) == (class == 0) { 0 } else { 255 }])
                        })
                    })
                    .collect();
                Sample { image, masks }
            })
            .collect();
        Dataset::new("stripes", 2, samples).unwrap()
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let dataset = stripes();
        let run = |seed| {
            let mut segmentor = pixel_model(params(6, 8, 2, 1.0));
            let mut recorder = Recorder::default();
            let report = train(&mut segmentor, &dataset, &seeded(seed), &mut recorder).unwrap();
            (report, recorder.bests, segmentor)
        };
        let (report_a, bests_a, model_a) = run(17);
        let (report_b, bests_b, model_b) = run(17);
        assert_eq!(report_a, report_b);
        assert_eq!(bests_a, bests_b);
        assert_eq!(model_a, model_b);
        assert!(!bests_a.is_empty());
        assert!(bests_a.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[test]
    fn test_pool_stays_within_bounds() {
        let dataset = stripes();
        let mut segmentor = pixel_model(TrainingParams {
            epoch_count: 8,
            pool_size: 6,
            min_pool_size: 4,
            max_pool_size: 10,
            elite_count: 2,
            target_fitness: 1.0,
        });
        let mut recorder = Recorder::default();
        let report = train(&mut segmentor, &dataset, &seeded(23), &mut recorder).unwrap();
        if report.outcome == TrainOutcome::EpochsExhausted {
            assert_eq!(recorder.pool_sizes.len(), 8);
        }
        assert_eq!(recorder.pool_sizes.first(), Some(&6));
        assert!(recorder.pool_sizes.iter().all(|s| (4..=10).contains(s)));
    }
}
