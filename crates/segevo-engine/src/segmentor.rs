use image::{GrayImage, Luma, RgbImage};

use crate::{
    cache::InputCache,
    cancel::{CancelToken, Interrupted},
    combiner,
    criterion::Criterion,
    dataset::{Dataset, Sample},
    iou::BinaryMask,
    params::{ParamError, TrainingParams},
    tensor::Tensor,
    tree::{CriterionNode, NodePath, Walk},
};

#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum SegmentorError {
    #[display("class count must be positive")]
    InvalidClassCount,
    #[display("invalid criterion tree: {reason}")]
    InvalidTree { reason: String },
    #[display("no criterion node at {path}")]
    UnknownNode { path: NodePath },
    #[display("criterion predicts {found} classes but the segmentor has {expected}")]
    ClassCountMismatch { expected: usize, found: usize },
    #[display("samples provide {masks} masks but the segmentor has {classes} classes")]
    InvalidData { masks: usize, classes: usize },
    #[display("mask {index} is {mask:?} but its image is {image:?}")]
    MaskDimensions {
        index: usize,
        mask: (u32, u32),
        image: (u32, u32),
    },
    #[display("dataset category {category} is empty")]
    EmptyCategory { category: usize },
    #[display("invalid parameters: {_0}")]
    Params(#[error(source)] ParamError),
    #[display("operation interrupted")]
    Interrupted,
}

impl From<Interrupted> for SegmentorError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

impl From<ParamError> for SegmentorError {
    fn from(e: ParamError) -> Self {
        Self::Params(e)
    }
}

/// Training-time input reuse for one sample.
#[derive(Debug)]
pub struct Reuse<'a> {
    /// Index of the sample within the training category.
    pub sample: usize,
    pub cache: &'a mut InputCache,
}

/// Pixel-level segmentation model.
///
/// Owns the criterion tree, the class count, the output binarization options
/// and the hyperparameters used when training it.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentor {
    class_count: usize,
    binary_result: bool,
    binary_threshold: f32,
    training: TrainingParams,
    root: CriterionNode,
}

impl Segmentor {
    /// Creates an empty segmentor for `class_count` classes.
    pub fn new(class_count: usize) -> Result<Self, SegmentorError> {
        if class_count == 0 {
            return Err(SegmentorError::InvalidClassCount);
        }
        Ok(Self {
            class_count,
            binary_result: false,
            binary_threshold: 0.0,
            training: TrainingParams::default(),
            root: CriterionNode::new(None),
        })
    }

    pub(crate) fn from_parts(
        class_count: usize,
        binary_result: bool,
        binary_threshold: f32,
        training: TrainingParams,
        root: CriterionNode,
    ) -> Self {
        Self {
            class_count,
            binary_result,
            binary_threshold,
            training,
            root,
        }
    }

    #[must_use]
    pub fn class_count(&self) -> usize {
        self.class_count
    }

    #[must_use]
    pub fn root(&self) -> &CriterionNode {
        &self.root
    }

    #[must_use]
    pub fn training_params(&self) -> &TrainingParams {
        &self.training
    }

    pub fn set_training_params(&mut self, params: TrainingParams) -> Result<(), ParamError> {
        params.validate()?;
        self.training = params;
        Ok(())
    }

    /// Whether [`Self::predict`] renders hard black/white decisions.
    #[must_use]
    pub fn binary_result(&self) -> bool {
        self.binary_result
    }

    pub fn set_binary_result(&mut self, binary_result: bool) {
        self.binary_result = binary_result;
    }

    /// Confidences strictly below this value are detections.
    #[must_use]
    pub fn binary_threshold(&self) -> f32 {
        self.binary_threshold
    }

    pub fn set_binary_threshold(&mut self, threshold: f32) -> Result<(), ParamError> {
        if !threshold.is_finite() {
            return Err(ParamError::Threshold { value: threshold });
        }
        self.binary_threshold = threshold;
        Ok(())
    }

    /// Attaches `criterion` under `parent` (the root when `None`) and returns
    /// the path of the new node.
    pub fn add_criterion(
        &mut self,
        parent: Option<&NodePath>,
        criterion: Criterion,
    ) -> Result<NodePath, SegmentorError> {
        if criterion.class_count() != self.class_count {
            return Err(SegmentorError::ClassCountMismatch {
                expected: self.class_count,
                found: criterion.class_count(),
            });
        }
        let parent = parent.cloned().unwrap_or_default();
        let node = self
            .root
            .node_mut(&parent)
            .ok_or_else(|| SegmentorError::UnknownNode {
                path: parent.clone(),
            })?;
        let index = node.push_child(CriterionNode::new(Some(criterion)));
        Ok(parent.child(index))
    }

    /// The criterion at `path`, if that node holds one.
    pub fn criterion_mut(&mut self, path: &NodePath) -> Option<&mut Criterion> {
        self.root.node_mut(path)?.criterion_mut()
    }

    /// Criteria in depth-first, pre-order order.
    #[must_use]
    pub fn criteria(&self) -> Vec<&Criterion> {
        self.root.criteria()
    }

    pub fn criteria_mut(&mut self) -> Vec<&mut Criterion> {
        self.root.criteria_mut()
    }

    pub fn validate(&self) -> Result<(), SegmentorError> {
        self.root
            .validate(self.class_count, 3)
            .map_err(|reason| SegmentorError::InvalidTree { reason })
    }

    /// Predicts one greyscale image per class.
    ///
    /// Black is a detection, white is no detection and mid-grey is unknown.
    /// With [`Self::binary_result`] set, every pixel is either black or white.
    pub fn predict(&self, image: &RgbImage) -> Result<Vec<GrayImage>, SegmentorError> {
        let confidence = self.confidence(image, &CancelToken::new())?;
        Ok(self.render(&confidence))
    }

    /// Per-pixel, per-class confidences in `[-1, 1]`.
    pub fn confidence(&self, image: &RgbImage, cancel: &CancelToken) -> Result<Tensor, SegmentorError> {
        self.validate()?;
        self.confidence_with(&Tensor::from_rgb_image(image), Walk::new(cancel, None))
    }

    fn confidence_with(&self, input: &Tensor, mut walk: Walk<'_>) -> Result<Tensor, SegmentorError> {
        let leaves = self.root.predict_leaves(input, &mut walk)?;
        Ok(combiner::combine(
            &leaves,
            input.width(),
            input.height(),
            self.class_count,
        ))
    }

    /// Renders confidences as greyscale images, one per class.
    #[must_use]
    pub fn render(&self, confidence: &Tensor) -> Vec<GrayImage> {
        let (width, height) = (confidence.width(), confidence.height());
        (0..self.class_count)
            .map(|class| {
                let mut image = GrayImage::new(
                    u32::try_from(width).unwrap_or(u32::MAX),
                    u32::try_from(height).unwrap_or(u32::MAX),
                );
                for (pixel, values) in image.pixels_mut().zip(confidence.pixels()) {
                    *pixel = Luma([self.to_grey(values[class])]);
                }
                image
            })
            .collect()
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn to_grey(&self, value: f32) -> u8 {
        if self.binary_result {
            if value < self.binary_threshold { 0 } else { 255 }
        } else {
            ((value.clamp(-1.0, 1.0) + 1.0) * 0.5 * 255.0).round() as u8
        }
    }

    /// Checks the tree once so that many samples can be scored without
    /// repeating the check.
    pub fn validated(&self) -> Result<ValidatedSegmentor<'_>, SegmentorError> {
        self.validate()?;
        Ok(ValidatedSegmentor { segmentor: self })
    }

    /// Mean IoU across classes between the binarized prediction for `sample`
    /// and its masks.
    ///
    /// Validates the tree on every call; use [`Self::validated`] to score a
    /// batch of samples.
    pub fn evaluate_sample(
        &self,
        sample: &Sample,
        reuse: Option<Reuse<'_>>,
        cancel: &CancelToken,
    ) -> Result<f32, SegmentorError> {
        self.validated()?.evaluate_sample(sample, reuse, cancel)
    }

    /// Exact fitness over a dataset category: mean of
    /// [`Self::evaluate_sample`], without caching or early exit.
    pub fn evaluate(&self, dataset: &Dataset, category: usize) -> Result<f32, SegmentorError> {
        self.evaluate_with(dataset, category, &CancelToken::new())
    }

    pub fn evaluate_with(
        &self,
        dataset: &Dataset,
        category: usize,
        cancel: &CancelToken,
    ) -> Result<f32, SegmentorError> {
        let samples = dataset.category(category);
        let count = samples.len();
        if count == 0 {
            return Err(SegmentorError::EmptyCategory { category });
        }
        let validated = self.validated()?;
        let mut sum = 0.0;
        for sample in samples {
            cancel.check()?;
            sum += validated.evaluate_sample(sample, None, cancel)?;
        }
        #[expect(clippy::cast_precision_loss)]
        let fitness = sum / count as f32;
        Ok(fitness)
    }
}

/// A segmentor whose tree passed [`Segmentor::validate`].
#[derive(Debug, Clone, Copy)]
pub struct ValidatedSegmentor<'a> {
    segmentor: &'a Segmentor,
}

impl<'a> ValidatedSegmentor<'a> {
    #[must_use]
    pub fn segmentor(&self) -> &'a Segmentor {
        self.segmentor
    }

    /// Mean IoU across classes between the binarized prediction for `sample`
    /// and its masks.
    ///
    /// With `reuse`, criterion inputs are read from and stored in the
    /// training cache under the given sample index.
    pub fn evaluate_sample(
        &self,
        sample: &Sample,
        reuse: Option<Reuse<'_>>,
        cancel: &CancelToken,
    ) -> Result<f32, SegmentorError> {
        let segmentor = self.segmentor;
        let class_count = segmentor.class_count;
        if sample.masks.len() < class_count {
            return Err(SegmentorError::InvalidData {
                masks: sample.masks.len(),
                classes: class_count,
            });
        }
        for (index, mask) in sample.masks.iter().enumerate().take(class_count) {
            if mask.dimensions() != sample.image.dimensions() {
                return Err(SegmentorError::MaskDimensions {
                    index,
                    mask: mask.dimensions(),
                    image: sample.image.dimensions(),
                });
            }
        }

        let input = Tensor::from_rgb_image(&sample.image);
        let walk = Walk::new(cancel, reuse.map(|r| (r.sample, r.cache)));
        let confidence = segmentor.confidence_with(&input, walk)?;

        let total: f32 = sample
            .masks
            .iter()
            .take(class_count)
            .enumerate()
            .map(|(class, mask)| {
                let predicted =
                    BinaryMask::from_confidence(&confidence, class, segmentor.binary_threshold);
                predicted.iou(&BinaryMask::from_mask_image(mask))
            })
            .sum();
        #[expect(clippy::cast_precision_loss)]
        let fitness = total / class_count as f32;
        Ok(fitness)
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn two_class_model() -> Segmentor {
        let mut segmentor = Segmentor::new(2).unwrap();
        let hsv = segmentor
            .add_criterion(None, Criterion::color_transform(2))
            .unwrap();
        segmentor
            .add_criterion(Some(&hsv), Criterion::pixel_net(2))
            .unwrap();
        segmentor
            .add_criterion(None, Criterion::pixel_net(2))
            .unwrap();
        segmentor
    }

    fn randomize(segmentor: &mut Segmentor) {
        let mut k = 0_u32;
        for criterion in segmentor.criteria_mut() {
            let params: Vec<f32> = (0..criterion.float_param_count())
                .map(|_| {
                    k = k.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    #[expect(clippy::cast_precision_loss)]
                    let v = (k >> 8) as f32 / (1 << 24) as f32;
                    v * 2.0 - 1.0
                })
                .collect();
            criterion.set_float_params(&params);
        }
    }

    #[expect(clippy::cast_possible_truncation)]
    fn noisy_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 37 % 256) as u8, (y * 91 % 256) as u8, ((x + y) * 13 % 256) as u8])
        })
    }

    #[test]
    fn test_zero_classes_is_rejected() {
        assert_eq!(Segmentor::new(0), Err(SegmentorError::InvalidClassCount));
    }

    #[test]
    fn test_add_criterion_paths() {
        let mut segmentor = Segmentor::new(1).unwrap();
        let a = segmentor
            .add_criterion(None, Criterion::color_transform(1))
            .unwrap();
        let b = segmentor
            .add_criterion(Some(&a), Criterion::pixel_net(1))
            .unwrap();
        assert_eq!(b.to_string(), "root/0/0");

        let missing = NodePath::root().child(5);
        assert_eq!(
            segmentor.add_criterion(Some(&missing), Criterion::pixel_net(1)),
            Err(SegmentorError::UnknownNode { path: missing })
        );
        assert_eq!(
            segmentor.add_criterion(None, Criterion::pixel_net(3)),
            Err(SegmentorError::ClassCountMismatch {
                expected: 1,
                found: 3
            })
        );
    }

    #[test]
    fn test_confidence_stays_in_range() {
        let mut segmentor = two_class_model();
        randomize(&mut segmentor);
        let confidence = segmentor
            .confidence(&noisy_image(7, 5), &CancelToken::new())
            .unwrap();
        assert_eq!(confidence.channels(), 2);
        assert!(
            confidence
                .as_slice()
                .iter()
                .all(|v| (-1.0..=1.0).contains(v))
        );
    }

    #[test]
    fn test_predict_renders_one_image_per_class() {
        let mut segmentor = two_class_model();
        randomize(&mut segmentor);
        let image = noisy_image(6, 4);
        let grey = segmentor.predict(&image).unwrap();
        assert_eq!(grey.len(), 2);
        assert_eq!(grey[0].dimensions(), (6, 4));

        segmentor.set_binary_result(true);
        for prediction in segmentor.predict(&image).unwrap() {
            assert!(prediction.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        }
    }

    #[test]
    fn test_untrained_model_renders_unknown() {
        let segmentor = two_class_model();
        let grey = segmentor.predict(&noisy_image(3, 3)).unwrap();
        assert!(grey[0].pixels().all(|p| p.0[0] == 128));
    }

    #[test]
    fn test_invalid_tree_is_reported() {
        let mut segmentor = Segmentor::new(1).unwrap();
        segmentor
            .add_criterion(None, Criterion::color_transform(1))
            .unwrap();
        assert!(matches!(
            segmentor.predict(&noisy_image(2, 2)),
            Err(SegmentorError::InvalidTree { .. })
        ));
    }

    #[test]
    fn test_evaluate_sample_checks_masks() {
        let segmentor = two_class_model();
        let sample = Sample {
            image: noisy_image(3, 3),
            masks: vec![GrayImage::new(3, 3)],
        };
        assert_eq!(
            segmentor.evaluate_sample(&sample, None, &CancelToken::new()),
            Err(SegmentorError::InvalidData {
                masks: 1,
                classes: 2
            })
        );

        let sample = Sample {
            image: noisy_image(3, 3),
            masks: vec![GrayImage::new(3, 3), GrayImage::new(2, 3)],
        };
        assert!(matches!(
            segmentor.evaluate_sample(&sample, None, &CancelToken::new()),
            Err(SegmentorError::MaskDimensions { index: 1, .. })
        ));
    }

    #[test]
    fn test_untrained_model_scores_empty_masks_perfectly() {
        // no detection anywhere and nothing to detect: IoU is 1 for every class
        let segmentor = two_class_model();
        let white = GrayImage::from_pixel(4, 4, Luma([255]));
        let sample = Sample {
            image: noisy_image(4, 4),
            masks: vec![white.clone(), white],
        };
        let dataset = Dataset::new("d", 2, vec![sample]).unwrap();
        assert_eq!(segmentor.evaluate(&dataset, 0), Ok(1.0));
        assert_eq!(
            segmentor.evaluate(&dataset, 1),
            Err(SegmentorError::EmptyCategory { category: 1 })
        );
    }

    #[test]
    fn test_validated_view_scores_like_evaluate_sample() {
        let mut segmentor = two_class_model();
        randomize(&mut segmentor);
        let sample = Sample {
            image: noisy_image(5, 4),
            masks: vec![
                GrayImage::from_fn(5, 4, |x, _| Luma([if x < 2 { 0 } else { 255 }])),
                GrayImage::from_fn(5, 4, |x, _| Luma([if x < 2 { 255 } else { 0 }])),
            ],
        };
        let cancel = CancelToken::new();
        let validated = segmentor.validated().unwrap();
        assert_eq!(
            validated.evaluate_sample(&sample, None, &cancel),
            segmentor.evaluate_sample(&sample, None, &cancel)
        );

        let mut cache = InputCache::new();
        let reused = validated
            .evaluate_sample(
                &sample,
                Some(Reuse {
                    sample: 0,
                    cache: &mut cache,
                }),
                &cancel,
            )
            .unwrap();
        assert_eq!(Ok(reused), segmentor.evaluate_sample(&sample, None, &cancel));
    }

    #[test]
    fn test_validated_view_rejects_invalid_tree() {
        let mut segmentor = Segmentor::new(1).unwrap();
        segmentor
            .add_criterion(None, Criterion::color_transform(1))
            .unwrap();
        assert!(matches!(
            segmentor.validated(),
            Err(SegmentorError::InvalidTree { .. })
        ));
    }

    #[test]
    fn test_cancelled_evaluation() {
        let segmentor = two_class_model();
        let cancel = CancelToken::new();
        cancel.cancel();
        let sample = Sample {
            image: noisy_image(2, 2),
            masks: vec![GrayImage::new(2, 2); 2],
        };
        let dataset = Dataset::new("d", 2, vec![sample]).unwrap();
        assert_eq!(
            segmentor.evaluate_with(&dataset, 0, &cancel),
            Err(SegmentorError::Interrupted)
        );
    }
}
