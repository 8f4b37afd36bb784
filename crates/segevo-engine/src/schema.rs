//! JSON model files.
//!
//! ```json
//! {
//!   "nbClass": 2,
//!   "flagBinaryResult": 0,
//!   "thresholdBinaryResult": 0.0,
//!   "nbEpoch": 100,
//!   "sizePool": 20,
//!   "sizeMinPool": 16,
//!   "sizeMaxPool": 64,
//!   "nbElite": 5,
//!   "targetBestValue": 0.99,
//!   "criteria": {
//!     "nbSubtree": 1,
//!     "subtree_0": {
//!       "criterion": { "type": 1, "nbClass": 2, "flagReusedInput": 0, "nn": { ... } },
//!       "nbSubtree": 0
//!     }
//!   }
//! }
//! ```
//!
//! Criterion type tags are `0` colour transform, `1` pixel network, `2`
//! textural network (with integer `rank` and `size`, the number of scales)
//! and `3` blob filter (with the per-class `minSize` vector). Network
//! criteria embed their network under `nn`.
//!
//! `sizeMinPool` and `sizeMaxPool` are optional and default to `sizePool`.
//!
//! Decoding checks the presence and range of every field, at every level of
//! the tree, before anything is built. A failed load never touches an
//! existing segmentor: [`Segmentor::load`] returns a new one.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    criterion::{
        BlobFilter, ColorTransform, Criterion, CriterionKind, PixelNet, TexturalNet,
        blob_filter::MIN_SIZE_RANGE,
        textural_net::{MAX_RANK, MAX_SCALE},
    },
    network::Network,
    params::{ParamError, TrainingParams},
    segmentor::{Segmentor, SegmentorError},
    tree::{CriterionNode, NodePath},
};

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ModelError {
    #[display("failed to access model file {}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[display("failed to encode or decode model JSON")]
    Json { source: serde_json::Error },
    #[display("missing field `{field}`")]
    MissingField { field: String },
    #[display("field `{field}` has invalid value {value}")]
    InvalidValue { field: String, value: String },
    #[display("{path}: unknown criterion type {tag}")]
    UnknownCriterionType { path: NodePath, tag: u32 },
    #[display("{path}: declares {declared} subtrees but holds {found}")]
    SubtreeCount {
        path: NodePath,
        declared: usize,
        found: usize,
    },
    #[display("{path}: network does not fit a {kind} criterion")]
    NetworkShape { path: NodePath, kind: &'static str },
    #[display("invalid hyperparameters: {_0}")]
    Params(#[error(source)] ParamError),
    #[display("invalid model: {_0}")]
    Segmentor(#[error(source)] SegmentorError),
}

impl From<serde_json::Error> for ModelError {
    fn from(source: serde_json::Error) -> Self {
        Self::Json { source }
    }
}

impl From<ParamError> for ModelError {
    fn from(e: ParamError) -> Self {
        Self::Params(e)
    }
}

impl From<SegmentorError> for ModelError {
    fn from(e: SegmentorError) -> Self {
        Self::Segmentor(e)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelFile {
    nb_class: Option<usize>,
    flag_binary_result: Option<u8>,
    threshold_binary_result: Option<f32>,
    nb_epoch: Option<u32>,
    size_pool: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size_min_pool: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size_max_pool: Option<usize>,
    nb_elite: Option<usize>,
    target_best_value: Option<f32>,
    criteria: Option<NodeFile>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    criterion: Option<CriterionFile>,
    nb_subtree: Option<usize>,
    #[serde(flatten)]
    subtrees: BTreeMap<String, NodeFile>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CriterionFile {
    #[serde(rename = "type")]
    kind: Option<u32>,
    nb_class: Option<usize>,
    flag_reused_input: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nn: Option<Network>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rank: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_size: Option<Vec<i64>>,
}

fn subtree_key(index: usize) -> String {
    format!("subtree_{index}")
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

fn require<T>(value: Option<T>, field: impl FnOnce() -> String) -> Result<T, ModelError> {
    value.ok_or_else(|| ModelError::MissingField { field: field() })
}

fn parse_flag(value: Option<u8>, field: impl Fn() -> String) -> Result<bool, ModelError> {
    match require(value, &field)? {
        0 => Ok(false),
        1 => Ok(true),
        v => Err(ModelError::InvalidValue {
            field: field(),
            value: v.to_string(),
        }),
    }
}

impl ModelFile {
    fn encode(segmentor: &Segmentor) -> Self {
        let params = segmentor.training_params();
        let elastic = params.min_pool_size != params.pool_size
            || params.max_pool_size != params.pool_size;
        Self {
            nb_class: Some(segmentor.class_count()),
            flag_binary_result: Some(flag(segmentor.binary_result())),
            threshold_binary_result: Some(segmentor.binary_threshold()),
            nb_epoch: Some(params.epoch_count),
            size_pool: Some(params.pool_size),
            size_min_pool: elastic.then_some(params.min_pool_size),
            size_max_pool: elastic.then_some(params.max_pool_size),
            nb_elite: Some(params.elite_count),
            target_best_value: Some(params.target_fitness),
            criteria: Some(NodeFile::encode(segmentor.root())),
        }
    }

    fn decode(self) -> Result<Segmentor, ModelError> {
        let class_count = require(self.nb_class, || "nbClass".to_owned())?;
        if class_count == 0 {
            return Err(ModelError::InvalidValue {
                field: "nbClass".to_owned(),
                value: class_count.to_string(),
            });
        }
        let binary_result = parse_flag(self.flag_binary_result, || "flagBinaryResult".to_owned())?;
        let binary_threshold = require(self.threshold_binary_result, || {
            "thresholdBinaryResult".to_owned()
        })?;
        if !binary_threshold.is_finite() {
            return Err(ParamError::Threshold {
                value: binary_threshold,
            }
            .into());
        }

        let pool_size = require(self.size_pool, || "sizePool".to_owned())?;
        let params = TrainingParams {
            epoch_count: require(self.nb_epoch, || "nbEpoch".to_owned())?,
            pool_size,
            min_pool_size: self.size_min_pool.unwrap_or(pool_size),
            max_pool_size: self.size_max_pool.unwrap_or(pool_size),
            elite_count: require(self.nb_elite, || "nbElite".to_owned())?,
            target_fitness: require(self.target_best_value, || "targetBestValue".to_owned())?,
        };
        params.validate()?;

        let root = require(self.criteria, || "criteria".to_owned())?
            .decode(&NodePath::root(), class_count)?;
        if root.criterion().is_some() {
            return Err(SegmentorError::InvalidTree {
                reason: "the root node cannot hold a criterion".to_owned(),
            }
            .into());
        }

        Ok(Segmentor::from_parts(
            class_count,
            binary_result,
            binary_threshold,
            params,
            root,
        ))
    }
}

impl NodeFile {
    fn encode(node: &CriterionNode) -> Self {
        Self {
            criterion: node.criterion().map(CriterionFile::encode),
            nb_subtree: Some(node.children().len()),
            subtrees: node
                .children()
                .iter()
                .enumerate()
                .map(|(i, child)| (subtree_key(i), Self::encode(child)))
                .collect(),
        }
    }

    fn decode(mut self, path: &NodePath, class_count: usize) -> Result<CriterionNode, ModelError> {
        let criterion = self
            .criterion
            .take()
            .map(|c| c.decode(path, class_count))
            .transpose()?;
        let declared = require(self.nb_subtree, || format!("{path}.nbSubtree"))?;
        if self.subtrees.len() != declared {
            return Err(ModelError::SubtreeCount {
                path: path.clone(),
                declared,
                found: self.subtrees.len(),
            });
        }

        let mut node = CriterionNode::new(criterion);
        for i in 0..declared {
            let child_path = path.child(i);
            let child = require(self.subtrees.remove(&subtree_key(i)), || {
                format!("{path}.{}", subtree_key(i))
            })?;
            node.push_child(child.decode(&child_path, class_count)?);
        }
        Ok(node)
    }
}

impl CriterionFile {
    fn encode(criterion: &Criterion) -> Self {
        let mut file = Self {
            kind: Some(criterion.kind().type_tag()),
            nb_class: Some(criterion.class_count()),
            flag_reused_input: Some(flag(criterion.reuse_input())),
            ..Self::default()
        };
        match criterion.kind() {
            CriterionKind::ColorTransform(_) => {}
            CriterionKind::PixelNet(net) => file.nn = Some(net.network().clone()),
            CriterionKind::TexturalNet(net) => {
                file.nn = Some(net.network().clone());
                file.rank = Some(net.rank());
                file.size = Some(net.scale());
            }
            CriterionKind::BlobFilter(_) => file.min_size = Some(criterion.int_params()),
        }
        file
    }

    fn decode(self, path: &NodePath, class_count: usize) -> Result<Criterion, ModelError> {
        let field = |name: &str| format!("{path}.criterion.{name}");
        let tag = require(self.kind, || field("type"))?;
        let nb_class = require(self.nb_class, || field("nbClass"))?;
        if nb_class != class_count {
            return Err(SegmentorError::ClassCountMismatch {
                expected: class_count,
                found: nb_class,
            }
            .into());
        }
        let reuse_input = parse_flag(self.flag_reused_input, || field("flagReusedInput"))?;

        let kind = match tag {
            0 => CriterionKind::ColorTransform(ColorTransform),
            1 => {
                let network = require(self.nn, || field("nn"))?;
                let expected = PixelNet::new(class_count);
                check_network(path, "pixel-net", &network, expected.network())?;
                CriterionKind::PixelNet(PixelNet::from_network(network))
            }
            2 => {
                let network = require(self.nn, || field("nn"))?;
                let rank = require(self.rank, || field("rank"))?;
                let scale = require(self.size, || field("size"))?;
                if rank > MAX_RANK {
                    return Err(ModelError::InvalidValue {
                        field: field("rank"),
                        value: rank.to_string(),
                    });
                }
                if !(1..=MAX_SCALE).contains(&scale) {
                    return Err(ModelError::InvalidValue {
                        field: field("size"),
                        value: scale.to_string(),
                    });
                }
                let expected = TexturalNet::new(class_count, rank, scale);
                check_network(path, "textural-net", &network, expected.network())?;
                CriterionKind::TexturalNet(TexturalNet::from_parts(rank, scale, network))
            }
            3 => {
                let min_sizes = require(self.min_size, || field("minSize"))?;
                if min_sizes.len() != class_count {
                    return Err(ModelError::InvalidValue {
                        field: field("minSize"),
                        value: format!("{min_sizes:?}"),
                    });
                }
                let min_sizes = min_sizes
                    .iter()
                    .map(|&v| {
                        if MIN_SIZE_RANGE.contains(&v) {
                            u32::try_from(v).ok()
                        } else {
                            None
                        }
                        .ok_or_else(|| ModelError::InvalidValue {
                            field: field("minSize"),
                            value: v.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                CriterionKind::BlobFilter(BlobFilter::from_min_sizes(min_sizes))
            }
            tag => {
                return Err(ModelError::UnknownCriterionType {
                    path: path.clone(),
                    tag,
                });
            }
        };
        Ok(Criterion::from_kind(class_count, kind).with_reuse_input(reuse_input))
    }
}

fn check_network(
    path: &NodePath,
    kind: &'static str,
    network: &Network,
    expected: &Network,
) -> Result<(), ModelError> {
    let same_topology = network.nb_input() == expected.nb_input()
        && network.nb_output() == expected.nb_output()
        && network.hidden_layers() == expected.hidden_layers();
    if same_topology && network.is_consistent() {
        Ok(())
    } else {
        Err(ModelError::NetworkShape {
            path: path.clone(),
            kind,
        })
    }
}

impl Segmentor {
    /// Writes the model as pretty-printed JSON.
    pub fn save<W>(&self, writer: W) -> Result<(), ModelError>
    where
        W: Write,
    {
        serde_json::to_writer_pretty(writer, &ModelFile::encode(self))?;
        Ok(())
    }

    /// Reads a model written by [`Self::save`].
    pub fn load<R>(reader: R) -> Result<Self, ModelError>
    where
        R: Read,
    {
        let file: ModelFile = serde_json::from_reader(reader)?;
        let segmentor = file.decode()?;
        segmentor.validate()?;
        Ok(segmentor)
    }

    pub fn save_file<P>(&self, path: P) -> Result<(), ModelError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let io_error = |source| ModelError::Io {
            path: path.to_owned(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
        self.save(&mut writer)?;
        writer.flush().map_err(io_error)?;
        Ok(())
    }

    pub fn open<P>(path: P) -> Result<Self, ModelError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ModelError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::load(BufReader::new(file))
    }
}
