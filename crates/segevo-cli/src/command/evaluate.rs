use std::path::PathBuf;

use anyhow::Context as _;

use crate::util;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct EvaluateArg {
    /// Model file
    model: PathBuf,
    /// Dataset file
    dataset: PathBuf,
    /// Category of samples to score
    #[arg(long, default_value_t = 0)]
    category: usize,
    /// Split percentages applied before scoring; all samples are in category 0 without it
    #[arg(long, value_delimiter = ',')]
    split: Vec<u32>,
    /// Seed of the dataset split
    #[arg(long)]
    seed: Option<u64>,
}

pub(crate) fn run(arg: &EvaluateArg) -> anyhow::Result<()> {
    let EvaluateArg {
        model,
        dataset,
        category,
        split,
        seed,
    } = arg;

    let segmentor = util::read_model_file(model)?;
    let dataset = util::read_dataset(dataset, split, *seed)?;
    let count = dataset.category(*category).len();
    let fitness = segmentor.evaluate(&dataset, *category).with_context(|| {
        format!(
            "Failed to evaluate category {category} of {}",
            dataset.name()
        )
    })?;

    eprintln!("Evaluated {count} samples of category {category}");
    println!("{fitness:.6}");
    Ok(())
}
