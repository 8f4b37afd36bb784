//! Criterion tree and its depth-first evaluation.
//!
//! The root node of a segmentor never holds a criterion; its children are
//! fed the image itself. An internal node feeds its output to each of its
//! children; a leaf's output is a per-class prediction collected for the
//! combiner.
//!
//! Criteria are indexed by their position in a depth-first, pre-order walk.
//! The index is stable for a given tree shape and is what the training cache
//! and the genome layout key on.
//!
//! The walk is recursive and each intermediate output lives in the stack frame
//! of the node that produced it, so it is released as soon as the node's last
//! child has been visited: memory is bounded by tree depth, not tree size.

use std::fmt;

use crate::{
    cache::InputCache,
    cancel::{CancelToken, Interrupted},
    criterion::Criterion,
    tensor::Tensor,
};

/// Child indices leading from the root to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    /// The root node.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }

    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root")?;
        for i in &self.0 {
            write!(f, "/{i}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CriterionNode {
    criterion: Option<Criterion>,
    children: Vec<CriterionNode>,
}

/// Options for one tree walk.
#[derive(Debug)]
pub(crate) struct Walk<'a> {
    pub(crate) cancel: &'a CancelToken,
    /// Sample index and cache, set only by training calls.
    pub(crate) reuse: Option<(usize, &'a mut InputCache)>,
    next_index: usize,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(cancel: &'a CancelToken, reuse: Option<(usize, &'a mut InputCache)>) -> Self {
        Self {
            cancel,
            reuse,
            next_index: 0,
        }
    }
}

impl CriterionNode {
    #[must_use]
    pub fn new(criterion: Option<Criterion>) -> Self {
        Self {
            criterion,
            children: vec![],
        }
    }

    #[must_use]
    pub fn criterion(&self) -> Option<&Criterion> {
        self.criterion.as_ref()
    }

    pub fn criterion_mut(&mut self) -> Option<&mut Criterion> {
        self.criterion.as_mut()
    }

    #[must_use]
    pub fn children(&self) -> &[CriterionNode] {
        &self.children
    }

    pub(crate) fn push_child(&mut self, child: CriterionNode) -> usize {
        self.children.push(child);
        self.children.len() - 1
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns the node at `path`, if any.
    #[must_use]
    pub fn node(&self, path: &NodePath) -> Option<&CriterionNode> {
        path.indices()
            .iter()
            .try_fold(self, |node, &i| node.children.get(i))
    }

    pub fn node_mut(&mut self, path: &NodePath) -> Option<&mut CriterionNode> {
        path.indices()
            .iter()
            .try_fold(self, |node, &i| node.children.get_mut(i))
    }

    /// Criteria in depth-first, pre-order order.
    #[must_use]
    pub fn criteria(&self) -> Vec<&Criterion> {
        fn collect<'a>(node: &'a CriterionNode, out: &mut Vec<&'a Criterion>) {
            out.extend(node.criterion.as_ref());
            for child in &node.children {
                collect(child, out);
            }
        }
        let mut out = vec![];
        collect(self, &mut out);
        out
    }

    /// Mutable criteria in depth-first, pre-order order.
    pub fn criteria_mut(&mut self) -> Vec<&mut Criterion> {
        fn collect<'a>(node: &'a mut CriterionNode, out: &mut Vec<&'a mut Criterion>) {
            out.extend(node.criterion.as_mut());
            for child in &mut node.children {
                collect(child, out);
            }
        }
        let mut out = vec![];
        collect(self, &mut out);
        out
    }

    /// Pre-order indices of criteria whose reuse flag is set although an
    /// ancestor has trainable parameters, which would make a cached input
    /// stale between entities. Such criteria are never served from the cache.
    #[must_use]
    pub fn reuse_conflicts(&self) -> Vec<usize> {
        fn visit(node: &CriterionNode, upstream_trainable: bool, index: &mut usize, out: &mut Vec<usize>) {
            let mut trainable = upstream_trainable;
            if let Some(c) = &node.criterion {
                if c.reuse_input() && upstream_trainable {
                    out.push(*index);
                }
                *index += 1;
                trainable |= c.is_trainable();
            }
            for child in &node.children {
                visit(child, trainable, index, out);
            }
        }
        let mut out = vec![];
        visit(self, false, &mut 0, &mut out);
        out
    }

    /// Checks the tree against the segmentor's class count.
    ///
    /// `self` is the root; it receives `input_channels` channels (3 for RGB).
    pub fn validate(&self, class_count: usize, input_channels: usize) -> Result<(), String> {
        if self.criterion.is_some() {
            return Err("the root node cannot hold a criterion".to_owned());
        }
        let mut leaves = 0;
        for (i, child) in self.children.iter().enumerate() {
            child.validate_node(&NodePath::root().child(i), class_count, input_channels, &mut leaves)?;
        }
        if leaves == 0 {
            return Err("the tree has no leaf criterion".to_owned());
        }
        Ok(())
    }

    fn validate_node(
        &self,
        path: &NodePath,
        class_count: usize,
        input_channels: usize,
        leaves: &mut usize,
    ) -> Result<(), String> {
        let output_channels = match &self.criterion {
            Some(c) => {
                if c.class_count() != class_count {
                    return Err(format!(
                        "{path}: {} has {} classes, expected {class_count}",
                        c.kind().name(),
                        c.class_count()
                    ));
                }
                if c.input_channels() != input_channels {
                    return Err(format!(
                        "{path}: {} expects {} input channels but receives {input_channels}",
                        c.kind().name(),
                        c.input_channels()
                    ));
                }
                if self.is_leaf() {
                    if !c.is_classifier() {
                        return Err(format!(
                            "{path}: {} cannot be a leaf, it does not predict classes",
                            c.kind().name()
                        ));
                    }
                    *leaves += 1;
                }
                c.output_channels()
            }
            None if self.is_leaf() => return Err(format!("{path}: leaf without criterion")),
            None => input_channels,
        };
        for (i, child) in self.children.iter().enumerate() {
            child.validate_node(&path.child(i), class_count, output_channels, leaves)?;
        }
        Ok(())
    }

    /// Evaluates the tree on `input`, returning every leaf's output in
    /// depth-first order.
    pub(crate) fn predict_leaves(&self, input: &Tensor, walk: &mut Walk<'_>) -> Result<Vec<Tensor>, Interrupted> {
        let mut leaves = vec![];
        self.walk(Some(input), false, walk, &mut leaves)?;
        Ok(leaves)
    }

    fn criterion_count(&self) -> usize {
        usize::from(self.criterion.is_some())
            + self.children.iter().map(Self::criterion_count).sum::<usize>()
    }

    /// Whether this node, whose first criterion has pre-order index `index`,
    /// has to be given its input.
    ///
    /// It does not when every criterion that would consume the input is
    /// served from the cache for `reuse`'s sample.
    pub(crate) fn needs_input(
        &self,
        index: usize,
        upstream_trainable: bool,
        reuse: Option<(usize, &InputCache)>,
    ) -> bool {
        let Some(criterion) = &self.criterion else {
            return self.children_need_input(index, upstream_trainable, reuse);
        };
        if let Some((sample, cache)) = reuse
            && criterion.reuse_input()
            && !upstream_trainable
            && cache.contains(index, sample)
        {
            return false;
        }
        self.is_leaf()
            || self.children_need_input(index + 1, upstream_trainable || criterion.is_trainable(), reuse)
    }

    fn children_need_input(
        &self,
        first_index: usize,
        upstream_trainable: bool,
        reuse: Option<(usize, &InputCache)>,
    ) -> bool {
        let mut index = first_index;
        self.children.iter().any(|child| {
            let needs = child.needs_input(index, upstream_trainable, reuse);
            index += child.criterion_count();
            needs
        })
    }

    /// `input` is `None` only when no criterion below needs it.
    fn walk(
        &self,
        input: Option<&Tensor>,
        upstream_trainable: bool,
        walk: &mut Walk<'_>,
        leaves: &mut Vec<Tensor>,
    ) -> Result<(), Interrupted> {
        walk.cancel.check()?;
        let Some(criterion) = &self.criterion else {
            for child in &self.children {
                child.walk(input, upstream_trainable, walk, leaves)?;
            }
            return Ok(());
        };

        let index = walk.next_index;
        walk.next_index += 1;
        let trainable = upstream_trainable || criterion.is_trainable();

        let needs_output = self.is_leaf() || {
            let reuse = walk.reuse.as_ref().map(|(sample, cache)| (*sample, &**cache));
            self.children_need_input(index + 1, trainable, reuse)
        };
        let output = if needs_output {
            let cached;
            let prepared;
            let input = match &mut walk.reuse {
                Some((sample, cache)) if criterion.reuse_input() && !upstream_trainable => {
                    cached = cache.get_or_try_insert(index, *sample, || {
                        let input = input.expect("input is skipped only when cached");
                        criterion
                            .prepare_input(input, walk.cancel)
                            .map(std::borrow::Cow::into_owned)
                    })?;
                    &*cached
                }
                _ => {
                    let input = input.expect("input is skipped only when cached");
                    prepared = criterion.prepare_input(input, walk.cancel)?;
                    &*prepared
                }
            };
            Some(criterion.evaluate(input, walk.cancel)?)
        } else {
            None
        };

        if self.is_leaf() {
            leaves.extend(output);
        } else {
            for child in &self.children {
                child.walk(output.as_ref(), trainable, walk, leaves)?;
            }
        }
        Ok(())
    }
}
