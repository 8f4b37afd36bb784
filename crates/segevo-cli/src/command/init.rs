use std::path::PathBuf;

use anyhow::ensure;
use segevo_engine::{
    Criterion, Segmentor,
    criterion::textural_net::{MAX_RANK, MAX_SCALE},
};

use crate::util::Output;

/// Shape of a freshly created criterion tree.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, derive_more::FromStr)]
pub enum Preset {
    /// A single pixel network on RGB input
    Pixel,
    /// HSV conversion feeding a pixel network, plus a pixel network on RGB
    #[default]
    Hsv,
    /// A textural network on RGB input
    Textural,
    /// A textural network whose output is cleaned by a blob filter
    Blob,
}

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct InitArg {
    /// Criterion tree to create
    #[arg(long, default_value = "hsv")]
    preset: Preset,
    /// Number of classes to segment
    #[arg(long, default_value_t = 2)]
    classes: usize,
    /// Hidden rank of textural networks
    #[arg(long, default_value_t = 1)]
    rank: usize,
    /// Number of scales of textural networks
    #[arg(long, default_value_t = 2)]
    scale: usize,
    /// Render predictions as pure black and white
    #[arg(long)]
    binary: bool,
    /// Output file path
    #[arg(long)]
    output: Option<PathBuf>,
}

pub(crate) fn run(arg: &InitArg) -> anyhow::Result<()> {
    let InitArg {
        preset,
        classes,
        rank,
        scale,
        binary,
        output,
    } = arg;

    let mut segmentor = build(*preset, *classes, *rank, *scale)?;
    segmentor.set_binary_result(*binary);

    log::info!(
        "Created {preset:?} model with {} classes and {} criteria",
        segmentor.class_count(),
        segmentor.criteria().len()
    );
    Output::save_model(&segmentor, output.as_deref())
}

fn build(preset: Preset, classes: usize, rank: usize, scale: usize) -> anyhow::Result<Segmentor> {
    ensure!(
        (1..=MAX_SCALE).contains(&scale),
        "textural scale {scale} is outside [1, {MAX_SCALE}]"
    );
    ensure!(rank <= MAX_RANK, "textural rank {rank} exceeds {MAX_RANK}");
    let mut segmentor = Segmentor::new(classes)?;
    match preset {
        Preset::Pixel => {
            segmentor.add_criterion(None, Criterion::pixel_net(classes))?;
        }
        Preset::Hsv => {
            let hsv = segmentor.add_criterion(None, Criterion::color_transform(classes))?;
            segmentor.add_criterion(Some(&hsv), Criterion::pixel_net(classes))?;
            segmentor.add_criterion(None, Criterion::pixel_net(classes))?;
        }
        Preset::Textural => {
            segmentor.add_criterion(None, Criterion::textural_net(classes, rank, scale))?;
        }
        Preset::Blob => {
            let textural =
                segmentor.add_criterion(None, Criterion::textural_net(classes, rank, scale))?;
            segmentor.add_criterion(Some(&textural), Criterion::blob_filter(classes))?;
        }
    }
    segmentor.validate()?;
    Ok(segmentor)
}
