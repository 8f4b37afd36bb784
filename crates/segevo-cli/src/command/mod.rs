use clap::{Parser, Subcommand};

use self::{
    evaluate::EvaluateArg, init::InitArg, predict::PredictArg, train::TrainArg,
};

mod evaluate;
mod init;
mod predict;
mod train;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// What mode to run the program in
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Create an untrained model from a preset
    Init(#[clap(flatten)] InitArg),
    /// Train a model on a dataset using the genetic algorithm
    Train(#[clap(flatten)] TrainArg),
    /// Compute the fitness of a model on a dataset category
    Evaluate(#[clap(flatten)] EvaluateArg),
    /// Segment images with a trained model
    Predict(#[clap(flatten)] PredictArg),
}

pub fn run() -> anyhow::Result<()> {
    let args = CommandArgs::parse();
    match args.mode {
        Mode::Init(arg) => init::run(&arg)?,
        Mode::Train(arg) => train::run(&arg)?,
        Mode::Evaluate(arg) => evaluate::run(&arg)?,
        Mode::Predict(arg) => predict::run(&arg)?,
    }
    Ok(())
}
