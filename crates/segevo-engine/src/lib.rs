//! Segmentation engine: criterion trees evaluated over images.
//!
//! A [`Segmentor`] owns a tree of criteria. Each criterion is a small
//! transform over a per-pixel tensor: a colour-space conversion, a per-pixel
//! neural classifier, a multi-scale textural classifier, or a blob-size
//! filter. Internal nodes feed their output to their children; leaves emit
//! per-class confidences which are merged by the [`combiner`] into the final
//! prediction.
//!
//! # Architecture
//!
//! ```text
//! RgbImage
//!     ↓ Tensor::from_rgb_image
//! Criterion tree (depth-first walk)
//!     ↓ leaf predictions, values in [-1, 1]
//! Combiner (cross-criterion, then cross-class)
//!     ↓ confidence tensor
//! Rendering (one greyscale image per class)
//! ```
//!
//! A confidence of `-1` means "detected" (rendered black), `+1` means "not
//! detected" (rendered white) and `0` means unknown (mid-grey).
//!
//! Training is not part of this crate; see `segevo-training`, which searches
//! the trainable parameters exposed by [`Criterion`] and scatters them back
//! into the tree.
//!
//! # Example
//!
//! ```
//! use segevo_engine::{Criterion, Segmentor};
//!
//! let mut segmentor = Segmentor::new(2).unwrap();
//! let hsv = segmentor.add_criterion(None, Criterion::color_transform(2)).unwrap();
//! segmentor.add_criterion(Some(&hsv), Criterion::pixel_net(2)).unwrap();
//! segmentor.add_criterion(None, Criterion::pixel_net(2)).unwrap();
//!
//! let image = image::RgbImage::new(4, 4);
//! let predictions = segmentor.predict(&image).unwrap();
//! assert_eq!(predictions.len(), 2);
//! ```

pub use self::{
    cache::InputCache,
    cancel::{CancelToken, Interrupted},
    criterion::{Criterion, CriterionKind},
    dataset::{Dataset, DatasetError, Sample},
    params::{ParamError, TrainingParams},
    schema::ModelError,
    segmentor::{Reuse, Segmentor, SegmentorError, ValidatedSegmentor},
    tensor::Tensor,
    tree::{CriterionNode, NodePath},
};

pub mod cache;
pub mod cancel;
pub mod combiner;
pub mod criterion;
pub mod dataset;
pub mod iou;
pub mod network;
pub mod params;
pub mod schema;
pub mod segmentor;
pub mod tensor;
pub mod tree;
