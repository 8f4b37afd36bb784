use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use segevo_engine::{CancelToken, TrainingParams};
use segevo_training::{EpochSummary, NewBest, TrainOptions, TrainOutcome, TrainingObserver};

use crate::util::{self, Output};

/// Exit status of a process killed by SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct TrainArg {
    /// Model file to train
    model: PathBuf,
    /// Dataset file
    dataset: PathBuf,
    /// Training, validation and test percentages
    #[arg(long, value_delimiter = ',', default_value = "70,15,15")]
    split: Vec<u32>,
    /// Seed of the dataset split and of the training run
    #[arg(long)]
    seed: Option<u64>,
    /// Maximum number of epochs
    #[arg(long)]
    epochs: Option<u32>,
    /// Initial pool size
    #[arg(long)]
    pool_size: Option<usize>,
    /// Lower bound of the pool size
    #[arg(long)]
    min_pool: Option<usize>,
    /// Upper bound of the pool size
    #[arg(long)]
    max_pool: Option<usize>,
    /// Number of elite individuals
    #[arg(long)]
    elite: Option<usize>,
    /// Fitness at which training stops
    #[arg(long)]
    target: Option<f32>,
    /// Directory receiving a checkpoint on every new best
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    /// Output file path
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ParamOverrides {
    epochs: Option<u32>,
    pool_size: Option<usize>,
    min_pool: Option<usize>,
    max_pool: Option<usize>,
    elite: Option<usize>,
    target: Option<f32>,
}

impl ParamOverrides {
    /// A pool size outside the stored bounds widens them to include it.
    fn apply(&self, mut params: TrainingParams) -> TrainingParams {
        if let Some(epochs) = self.epochs {
            params.epoch_count = epochs;
        }
        if let Some(pool) = self.pool_size {
            params.pool_size = pool;
            params.min_pool_size = params.min_pool_size.min(pool);
            params.max_pool_size = params.max_pool_size.max(pool);
        }
        if let Some(min) = self.min_pool {
            params.min_pool_size = min;
        }
        if let Some(max) = self.max_pool {
            params.max_pool_size = max;
        }
        if let Some(elite) = self.elite {
            params.elite_count = elite;
        }
        if let Some(target) = self.target {
            params.target_fitness = target;
        }
        params
    }
}

/// Reports training progress on stderr.
struct ProgressReporter {
    started_at: DateTime<Utc>,
}

impl ProgressReporter {
    fn elapsed(&self) -> String {
        let elapsed = Utc::now() - self.started_at;
        format!(
            "{:02}:{:02}:{:02}",
            elapsed.num_hours(),
            elapsed.num_minutes() % 60,
            elapsed.num_seconds() % 60
        )
    }
}

impl TrainingObserver for ProgressReporter {
    fn on_new_best(&mut self, event: &NewBest<'_>) {
        let NewBest {
            epoch,
            fitness,
            validation,
            checkpoint,
        } = event;
        eprintln!("[{}] Epoch #{epoch}: new best", self.elapsed());
        eprintln!("  Fitness:    {fitness:.6}");
        if let Some(validation) = validation {
            eprintln!("  Validation: {validation:.6}");
        }
        if let Some(path) = checkpoint {
            eprintln!("  Checkpoint: {}", path.display());
        }
    }

    fn on_epoch_end(&mut self, summary: &EpochSummary) {
        let EpochSummary {
            epoch,
            phase,
            pool_size,
            stats,
            best_fitness,
        } = summary;
        eprintln!(
            "[{}] Epoch #{epoch} ({phase:?}, pool {pool_size}): min {:.3} max {:.3} mean {:.3}, best {best_fitness:.6}",
            self.elapsed(),
            stats.min,
            stats.max,
            stats.mean,
        );
    }
}

/// Cancels `cancel` on the first Ctrl+C and exits on the second.
fn install_interrupt_handler(cancel: CancelToken) -> anyhow::Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        log::warn!("Interrupt received, stopping after the current evaluation (press Ctrl+C again to abort)");
        cancel.cancel();
    })
    .context("Failed to install Ctrl+C handler")
}

pub(crate) fn run(arg: &TrainArg) -> anyhow::Result<()> {
    let TrainArg {
        model,
        dataset,
        split,
        seed,
        epochs,
        pool_size,
        min_pool,
        max_pool,
        elite,
        target,
        checkpoint_dir,
        output,
    } = arg;

    let mut segmentor = util::read_model_file(model)?;
    let overrides = ParamOverrides {
        epochs: *epochs,
        pool_size: *pool_size,
        min_pool: *min_pool,
        max_pool: *max_pool,
        elite: *elite,
        target: *target,
    };
    let params = overrides.apply(*segmentor.training_params());
    segmentor
        .set_training_params(params)
        .context("Invalid training parameters")?;
    let dataset = util::read_dataset(dataset, split, *seed)?;

    if let Some(dir) = checkpoint_dir {
        std::fs::create_dir_all(dir).with_context(|| {
            format!("Failed to create checkpoint directory: {}", dir.display())
        })?;
    }

    let options = TrainOptions {
        seed: *seed,
        checkpoint_dir: checkpoint_dir.clone(),
        cancel: CancelToken::new(),
    };
    install_interrupt_handler(options.cancel.clone())?;

    let mut reporter = ProgressReporter {
        started_at: Utc::now(),
    };
    let report = segevo_training::train(&mut segmentor, &dataset, &options, &mut reporter)
        .with_context(|| format!("Failed to train model {}", model.display()))?;

    eprintln!();
    eprintln!("Training finished: {}", report.outcome);
    eprintln!("  Epochs: {}", report.epochs_run);
    eprintln!("  Elapsed: {}", reporter.elapsed());
    if let Some(fitness) = report.best_fitness {
        eprintln!("  Best fitness: {fitness:.6}");
    }
    if let Some(validation) = report.best_validation {
        eprintln!("  Validation fitness: {validation:.6}");
    }
    if let Some(path) = &report.checkpoint {
        eprintln!("  Last checkpoint: {}", path.display());
    }
    if report.outcome == TrainOutcome::Interrupted {
        log::warn!("Training was interrupted; saving the best model found so far");
    }

    Output::save_model(&segmentor, output.as_deref())?;
    if let Some(path) = output {
        eprintln!("Model saved to {}", path.display());
    }
    Ok(())
}
