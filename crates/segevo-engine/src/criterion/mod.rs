//! Criteria: the prediction units composed into a segmentor's tree.
//!
//! Each [`Criterion`] maps an input tensor to an output tensor. Its variant is
//! a closed [`CriterionKind`]:
//!
//! | Variant           | Input channels | Output channels | Float genes     | Int genes   |
//! |-------------------|----------------|-----------------|-----------------|-------------|
//! | `ColorTransform`  | 3              | 3               | -               | -           |
//! | `PixelNet`        | 3              | classes         | network params  | -           |
//! | `TexturalNet`     | 3              | classes         | network params  | -           |
//! | `BlobFilter`      | classes        | classes         | -               | per class   |
//!
//! Evaluation is split in two steps. [`Criterion::prepare_input`] turns the
//! parent's output into what the criterion actually consumes; it only does
//! work for the textural criterion, whose fragment features are expensive and
//! independent of any trainable parameter. [`Criterion::evaluate`] then runs
//! the criterion on the prepared input. During training the prepared input is
//! what gets cached per sample (see [`crate::cache`]).

use std::{borrow::Cow, ops::RangeInclusive};

use crate::{
    cancel::{CancelToken, Interrupted},
    network::{self, Network},
    tensor::Tensor,
};

pub use self::{
    blob_filter::BlobFilter, color::ColorTransform, pixel_net::PixelNet,
    textural_net::TexturalNet,
};

pub mod blob_filter;
pub mod color;
pub mod pixel_net;
pub mod textural_net;

/// Closed set of criterion variants.
#[derive(Debug, Clone, PartialEq)]
pub enum CriterionKind {
    ColorTransform(ColorTransform),
    PixelNet(PixelNet),
    TexturalNet(TexturalNet),
    BlobFilter(BlobFilter),
}

impl CriterionKind {
    /// Integer tag used by the model file format.
    #[must_use]
    pub fn type_tag(&self) -> u32 {
        match self {
            Self::ColorTransform(_) => 0,
            Self::PixelNet(_) => 1,
            Self::TexturalNet(_) => 2,
            Self::BlobFilter(_) => 3,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ColorTransform(_) => "color-transform",
            Self::PixelNet(_) => "pixel-net",
            Self::TexturalNet(_) => "textural-net",
            Self::BlobFilter(_) => "blob-filter",
        }
    }
}

/// A prediction unit attached to a tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    class_count: usize,
    reuse_input: bool,
    kind: CriterionKind,
}

impl Criterion {
    pub(crate) fn from_kind(class_count: usize, kind: CriterionKind) -> Self {
        Self {
            class_count,
            reuse_input: false,
            kind,
        }
    }

    /// RGB to HSV conversion feeding its children.
    #[must_use]
    pub fn color_transform(class_count: usize) -> Self {
        Self::from_kind(class_count, CriterionKind::ColorTransform(ColorTransform))
    }

    /// Per-pixel neural classifier.
    #[must_use]
    pub fn pixel_net(class_count: usize) -> Self {
        Self::from_kind(class_count, CriterionKind::PixelNet(PixelNet::new(class_count)))
    }

    /// Multi-scale textural classifier with `rank` hidden layers.
    ///
    /// # Panics
    ///
    /// Panics if `scale` is not in `1..=`[`textural_net::MAX_SCALE`].
    #[must_use]
    pub fn textural_net(class_count: usize, rank: usize, scale: usize) -> Self {
        Self::from_kind(
            class_count,
            CriterionKind::TexturalNet(TexturalNet::new(class_count, rank, scale)),
        )
    }

    /// Per-class blob-size filter.
    #[must_use]
    pub fn blob_filter(class_count: usize) -> Self {
        Self::from_kind(class_count, CriterionKind::BlobFilter(BlobFilter::new(class_count)))
    }

    /// Sets the input reuse flag, enabling per-sample caching during training.
    #[must_use]
    pub fn with_reuse_input(mut self, reuse_input: bool) -> Self {
        self.reuse_input = reuse_input;
        self
    }

    #[must_use]
    pub fn kind(&self) -> &CriterionKind {
        &self.kind
    }

    #[must_use]
    pub fn class_count(&self) -> usize {
        self.class_count
    }

    #[must_use]
    pub fn reuse_input(&self) -> bool {
        self.reuse_input
    }

    pub fn set_reuse_input(&mut self, reuse_input: bool) {
        self.reuse_input = reuse_input;
    }

    /// Number of channels the criterion expects from its parent.
    #[must_use]
    pub fn input_channels(&self) -> usize {
        match &self.kind {
            CriterionKind::ColorTransform(_) => 3,
            CriterionKind::PixelNet(_) => PixelNet::INPUT_CHANNELS,
            CriterionKind::TexturalNet(_) => 3,
            CriterionKind::BlobFilter(_) => self.class_count,
        }
    }

    /// Number of channels the criterion produces.
    #[must_use]
    pub fn output_channels(&self) -> usize {
        match &self.kind {
            CriterionKind::ColorTransform(_) => 3,
            CriterionKind::PixelNet(_)
            | CriterionKind::TexturalNet(_)
            | CriterionKind::BlobFilter(_) => self.class_count,
        }
    }

    /// Whether the output is a per-class prediction usable by the combiner.
    #[must_use]
    pub fn is_classifier(&self) -> bool {
        !matches!(self.kind, CriterionKind::ColorTransform(_))
    }

    #[must_use]
    pub fn float_param_count(&self) -> usize {
        self.network().map_or(0, |n| n.params().len())
    }

    #[must_use]
    pub fn int_param_count(&self) -> usize {
        match &self.kind {
            CriterionKind::BlobFilter(f) => f.min_sizes().len(),
            _ => 0,
        }
    }

    /// Whether the criterion has any trainable parameter.
    #[must_use]
    pub fn is_trainable(&self) -> bool {
        self.float_param_count() + self.int_param_count() > 0
    }

    /// Range each float gene is searched in.
    #[must_use]
    pub fn float_param_range(&self) -> RangeInclusive<f32> {
        network::PARAM_RANGE
    }

    /// Range each int gene is searched in.
    #[must_use]
    pub fn int_param_range(&self) -> RangeInclusive<i64> {
        blob_filter::MIN_SIZE_RANGE
    }

    #[must_use]
    pub fn float_params(&self) -> &[f32] {
        self.network().map(Network::params).unwrap_or_default()
    }

    #[must_use]
    pub fn int_params(&self) -> Vec<i64> {
        match &self.kind {
            CriterionKind::BlobFilter(f) => f.min_sizes().iter().map(|&v| i64::from(v)).collect(),
            _ => vec![],
        }
    }

    /// Overwrites the float genes.
    ///
    /// # Panics
    ///
    /// Panics if `params.len()` differs from [`Self::float_param_count`].
    pub fn set_float_params(&mut self, params: &[f32]) {
        match self.network_mut() {
            Some(network) => network.set_params(params),
            None => assert!(params.is_empty(), "criterion has no float parameters"),
        }
    }

    /// Overwrites the int genes.
    ///
    /// # Panics
    ///
    /// Panics if `params.len()` differs from [`Self::int_param_count`].
    pub fn set_int_params(&mut self, params: &[i64]) {
        match &mut self.kind {
            CriterionKind::BlobFilter(f) => f.set_min_sizes(params),
            _ => assert!(params.is_empty(), "criterion has no int parameters"),
        }
    }

    /// Turns the parent's output into this criterion's actual input.
    pub fn prepare_input<'a>(
        &self,
        input: &'a Tensor,
        cancel: &CancelToken,
    ) -> Result<Cow<'a, Tensor>, Interrupted> {
        match &self.kind {
            CriterionKind::TexturalNet(net) => Ok(Cow::Owned(net.prepare(input, cancel)?)),
            _ => Ok(Cow::Borrowed(input)),
        }
    }

    /// Runs the criterion on an input produced by [`Self::prepare_input`].
    pub fn evaluate(&self, prepared: &Tensor, cancel: &CancelToken) -> Result<Tensor, Interrupted> {
        match &self.kind {
            CriterionKind::ColorTransform(t) => t.evaluate(prepared, cancel),
            CriterionKind::PixelNet(net) => net.evaluate(prepared, cancel),
            CriterionKind::TexturalNet(net) => net.evaluate(prepared, cancel),
            CriterionKind::BlobFilter(f) => f.evaluate(prepared, cancel),
        }
    }

    fn network(&self) -> Option<&Network> {
        match &self.kind {
            CriterionKind::PixelNet(net) => Some(net.network()),
            CriterionKind::TexturalNet(net) => Some(net.network()),
            CriterionKind::ColorTransform(_) | CriterionKind::BlobFilter(_) => None,
        }
    }

    fn network_mut(&mut self) -> Option<&mut Network> {
        match &mut self.kind {
            CriterionKind::PixelNet(net) => Some(net.network_mut()),
            CriterionKind::TexturalNet(net) => Some(net.network_mut()),
            CriterionKind::ColorTransform(_) | CriterionKind::BlobFilter(_) => None,
        }
    }
}
