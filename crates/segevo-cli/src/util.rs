use std::{
    fs::File,
    io::{self, BufWriter, StdoutLock, Write as _},
    path::{Path, PathBuf},
};

use anyhow::Context;
use rand::SeedableRng as _;
use rand_pcg::Pcg64Mcg;
use segevo_engine::{Dataset, Segmentor};

#[derive(Debug)]
pub enum Output {
    Stdout {
        writer: StdoutLock<'static>,
    },
    File {
        writer: BufWriter<File>,
        path: PathBuf,
    },
}

impl Output {
    pub fn save_model(segmentor: &Segmentor, output_path: Option<&Path>) -> anyhow::Result<()> {
        let mut output = Output::from_output_path(output_path)?;
        output.write_model(segmentor)
    }

    pub fn from_output_path(output_path: Option<&Path>) -> anyhow::Result<Self> {
        match output_path {
            Some(path) => Output::open(path.to_owned()),
            None => Ok(Output::stdout()),
        }
    }

    pub fn stdout() -> Self {
        Output::Stdout {
            writer: io::stdout().lock(),
        }
    }

    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Output::File {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn display_path(&self) -> String {
        match self {
            Output::Stdout { .. } => "stdout".to_string(),
            Output::File { path, .. } => path.display().to_string(),
        }
    }

    pub fn write_model(&mut self, segmentor: &Segmentor) -> anyhow::Result<()> {
        segmentor
            .save(&mut *self)
            .with_context(|| format!("Failed to write model to {}", self.display_path()))?;
        writeln!(&mut *self).with_context(|| {
            format!(
                "Failed to write newline after model to {}",
                self.display_path()
            )
        })?;
        self.flush()
            .with_context(|| format!("Failed to flush output to {}", self.display_path()))?;
        Ok(())
    }
}

impl io::Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Stdout { writer } => writer.write(buf),
            Output::File { writer, .. } => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Stdout { writer } => writer.flush(),
            Output::File { writer, .. } => writer.flush(),
        }
    }
}

/// Read a model from a JSON file
pub fn read_model_file<P>(path: P) -> anyhow::Result<Segmentor>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    Segmentor::open(path).with_context(|| format!("Failed to load model file: {}", path.display()))
}

/// Read a dataset and partition it into categories
///
/// `split` holds one percentage per category. Rounding leftovers go to the
/// first category. Without a split, every sample is in category 0.
pub fn read_dataset<P>(path: P, split: &[u32], seed: Option<u64>) -> anyhow::Result<Dataset>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut dataset = Dataset::open(path)
        .with_context(|| format!("Failed to load dataset file: {}", path.display()))?;
    if split.is_empty() {
        return Ok(dataset);
    }

    let counts = split_counts(dataset.len(), split);
    let mut rng = match seed {
        Some(seed) => Pcg64Mcg::seed_from_u64(seed),
        None => Pcg64Mcg::from_rng(&mut rand::rng()),
    };
    dataset
        .split(&counts, &mut rng)
        .with_context(|| format!("Failed to split dataset {}", path.display()))?;
    log::info!("Dataset split into categories of {counts:?} samples");
    Ok(dataset)
}

fn split_counts(len: usize, percentages: &[u32]) -> Vec<usize> {
    let total: usize = percentages.iter().map(|&p| p as usize).sum();
    if total == 0 {
        return vec![0; percentages.len()];
    }
    let mut counts: Vec<usize> = percentages
        .iter()
        .map(|&p| len * p as usize / total)
        .collect();
    let assigned: usize = counts.iter().sum();
    counts[0] += len - assigned;
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_counts() {
        let test_cases: [(usize, &[u32], &[usize]); 4] = [
            (20, &[70, 15, 15], &[14, 3, 3]),
            (10, &[70, 15, 15], &[8, 1, 1]),
            (3, &[1, 1], &[2, 1]),
            (5, &[0, 0], &[0, 0]),
        ];
        for (len, percentages, expected) in test_cases {
            assert_eq!(split_counts(len, percentages), expected, "{len} {percentages:?}");
        }
    }
}
