//! Checkpoint files written whenever training finds a new best model.

use std::path::{Path, PathBuf};

use segevo_engine::{ModelError, Segmentor};

/// File name of a checkpoint: zero-padded epoch, training fitness and, when
/// available, validation fitness.
///
/// ```
/// use segevo_training::checkpoint::file_name;
///
/// assert_eq!(file_name(3, 0.5, None), "00003_0.500000_checkpoint.json");
/// assert_eq!(
///     file_name(12, 0.75, Some(0.625)),
///     "00012_0.750000_0.625000_checkpoint.json"
/// );
/// ```
#[must_use]
pub fn file_name(epoch: u32, train_fitness: f32, validation_fitness: Option<f32>) -> String {
    match validation_fitness {
        Some(valid) => format!("{epoch:05}_{train_fitness:.6}_{valid:.6}_checkpoint.json"),
        None => format!("{epoch:05}_{train_fitness:.6}_checkpoint.json"),
    }
}

/// Saves `segmentor` into `dir` and returns the path of the new file.
pub fn write(
    dir: &Path,
    segmentor: &Segmentor,
    epoch: u32,
    train_fitness: f32,
    validation_fitness: Option<f32>,
) -> Result<PathBuf, ModelError> {
    let path = dir.join(file_name(epoch, train_fitness, validation_fitness));
    segmentor.save_file(&path)?;
    Ok(path)
}
