use std::path::{Path, PathBuf};

use anyhow::Context as _;
use image::{DynamicImage, GrayImage, RgbImage, imageops};

use crate::util;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct PredictArg {
    /// Model file
    model: PathBuf,
    /// Images to segment
    #[arg(required = true)]
    images: Vec<PathBuf>,
    /// Directory receiving the predictions
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// Also save the source image next to every class prediction
    #[arg(long)]
    side_by_side: bool,
    /// Render pure black and white predictions
    #[arg(long)]
    binary: bool,
}

pub(crate) fn run(arg: &PredictArg) -> anyhow::Result<()> {
    let PredictArg {
        model,
        images,
        output_dir,
        side_by_side,
        binary,
    } = arg;

    let mut segmentor = util::read_model_file(model)?;
    if *binary {
        segmentor.set_binary_result(true);
    }
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    for path in images {
        let image = image::open(path)
            .with_context(|| format!("Failed to open image: {}", path.display()))?
            .to_rgb8();
        let predictions = segmentor
            .predict(&image)
            .with_context(|| format!("Failed to segment {}", path.display()))?;
        let stem = path
            .file_stem()
            .map_or_else(|| "image".into(), |s| s.to_string_lossy());

        let class_count = predictions.len();
        if *side_by_side {
            let composite = compose(&image, &predictions);
            save(composite, &output_dir.join(format!("{stem}_side_by_side.png")))?;
        }
        for (class, prediction) in predictions.into_iter().enumerate() {
            save(prediction, &output_dir.join(format!("{stem}_class{class}.png")))?;
        }
        log::info!("Segmented {} into {class_count} classes", path.display());
    }
    Ok(())
}

fn save(image: impl Into<DynamicImage>, path: &Path) -> anyhow::Result<()> {
    image
        .into()
        .save(path)
        .with_context(|| format!("Failed to save image: {}", path.display()))
}

/// The source image followed by one panel per class, left to right.
fn compose(source: &RgbImage, predictions: &[GrayImage]) -> RgbImage {
    let (width, height) = source.dimensions();
    let panels = u32::try_from(predictions.len() + 1).unwrap_or(u32::MAX);
    let mut canvas = RgbImage::new(width.saturating_mul(panels), height);
    imageops::replace(&mut canvas, source, 0, 0);
    for (index, prediction) in (1..).zip(predictions) {
        let panel = DynamicImage::ImageLuma8(prediction.clone()).to_rgb8();
        imageops::replace(&mut canvas, &panel, i64::from(width) * index, 0);
    }
    canvas
}
