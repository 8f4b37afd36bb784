//! Labeled image datasets.
//!
//! A dataset is a list of samples (an RGB image plus one mask per class)
//! partitioned into categories. By convention category 0 is used for
//! training, 1 for validation and 2 for testing.
//!
//! # File format
//!
//! ```json
//! {
//!   "name": "leaves",
//!   "nbMask": 2,
//!   "samples": [
//!     { "img": "img000.png", "mask": ["mask000-0.png", "mask000-1.png"] }
//!   ]
//! }
//! ```
//!
//! Paths are relative to the dataset file. Every image is loaded eagerly when
//! the dataset is opened.

use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use image::{GrayImage, RgbImage};
use rand::{Rng, seq::SliceRandom};
use serde::Deserialize;

/// An image and its ground-truth masks.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: RgbImage,
    /// One mask per class; dark pixels belong to the class.
    pub masks: Vec<GrayImage>,
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum DatasetError {
    #[display("failed to read dataset file {}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[display("failed to parse dataset file {}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[display("failed to load image {}", path.display())]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[display("sample {index} has {found} masks, expected {expected}")]
    MaskCount {
        index: usize,
        found: usize,
        expected: usize,
    },
    #[display("cannot split {available} samples into categories of {requested:?}")]
    Split {
        requested: Vec<usize>,
        available: usize,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetFile {
    #[serde(default)]
    name: String,
    nb_mask: usize,
    samples: Vec<SampleFile>,
}

#[derive(Debug, Deserialize)]
struct SampleFile {
    img: PathBuf,
    mask: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    mask_count: usize,
    samples: Vec<Sample>,
    categories: Vec<Vec<usize>>,
}

impl Dataset {
    /// Builds a dataset from in-memory samples, all in category 0.
    pub fn new(name: impl Into<String>, mask_count: usize, samples: Vec<Sample>) -> Result<Self, DatasetError> {
        for (index, sample) in samples.iter().enumerate() {
            if sample.masks.len() != mask_count {
                return Err(DatasetError::MaskCount {
                    index,
                    found: sample.masks.len(),
                    expected: mask_count,
                });
            }
        }
        let categories = vec![(0..samples.len()).collect()];
        Ok(Self {
            name: name.into(),
            mask_count,
            samples,
            categories,
        })
    }

    /// Loads a dataset description and every image it references.
    pub fn open<P>(path: P) -> Result<Self, DatasetError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_owned(),
            source,
        })?;
        let desc: DatasetFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| DatasetError::Parse {
                path: path.to_owned(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let samples = desc
            .samples
            .iter()
            .map(|s| {
                let image = load_image(&base.join(&s.img))?.to_rgb8();
                let masks = s
                    .mask
                    .iter()
                    .map(|m| Ok(load_image(&base.join(m))?.to_luma8()))
                    .collect::<Result<Vec<_>, DatasetError>>()?;
                Ok(Sample { image, masks })
            })
            .collect::<Result<Vec<_>, DatasetError>>()?;
        log::info!("Loaded {} samples from {}", samples.len(), path.display());

        Self::new(desc.name, desc.nb_mask, samples)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of masks every sample carries.
    #[must_use]
    pub fn mask_count(&self) -> usize {
        self.mask_count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    /// Samples of category `index`, empty if the category does not exist.
    pub fn category(&self, index: usize) -> impl ExactSizeIterator<Item = &Sample> + '_ {
        self.categories
            .get(index)
            .map_or(&[][..], Vec::as_slice)
            .iter()
            .map(|&i| &self.samples[i])
    }

    /// Randomly partitions the samples into categories of the given sizes.
    ///
    /// Samples left over after the requested counts are dropped from every
    /// category.
    pub fn split<R>(&mut self, counts: &[usize], rng: &mut R) -> Result<(), DatasetError>
    where
        R: Rng + ?Sized,
    {
        if counts.is_empty() || counts.iter().sum::<usize>() > self.samples.len() {
            return Err(DatasetError::Split {
                requested: counts.to_vec(),
                available: self.samples.len(),
            });
        }
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        order.shuffle(rng);
        let mut rest = order.as_slice();
        self.categories = counts
            .iter()
            .map(|&n| {
                let (head, tail) = rest.split_at(n);
                rest = tail;
                head.to_vec()
            })
            .collect();
        Ok(())
    }
}

fn load_image(path: &Path) -> Result<image::DynamicImage, DatasetError> {
    image::open(path).map_err(|source| DatasetError::Image {
        path: path.to_owned(),
        source,
    })
}
