use std::path::Path;

use crate::aln::decay::{WeightDecay, decay_weights};
use crate::aln::evaluator::{Evaluation, evaluate, evaluate_exhaustive};
use crate::aln::invert::invert;
use crate::aln::monotonicity::{Monotonicity, var_monotonicity};
use crate::aln::node::{MinMaxKind, NodeId};
use crate::aln::tree::Tree;
use crate::buffer::{ErrorMode, NoiseVarianceBuffer};
use crate::core::constraint::BoundKind;
use crate::core::error::{AlnError, AlnResult};
use crate::persist;
use crate::streams::SampleStream;
use crate::training::{TrainConfig, TrainObserver, TrainReport, Trainer};

pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// A trainable piecewise-linear approximator: the tree plus its training
/// buffer.
#[derive(Clone, Debug)]
pub struct Aln {
    pub(crate) tree: Tree,
    pub(crate) buffer: Option<NoiseVarianceBuffer>,
    pub(crate) total_splits: usize,
}

impl Aln {
    /// `dim` counts the inputs and the output; `output` is the output's index.
    pub fn new(dim: usize, output: usize) -> AlnResult<Self> {
        Ok(Self::from_tree(Tree::new(dim, output)?))
    }

    pub fn from_tree(tree: Tree) -> Self {
        Self {
            tree,
            buffer: None,
            total_splits: 0,
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn dimension(&self) -> usize {
        self.tree.dimension()
    }

    pub fn output_index(&self) -> usize {
        self.tree.output_index()
    }

    pub fn total_splits(&self) -> usize {
        self.total_splits
    }

    pub fn leaf_count(&self) -> usize {
        self.tree.leaf_count()
    }

    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    pub fn set_bound(
        &mut self,
        var: usize,
        region: usize,
        kind: BoundKind,
        value: f64,
    ) -> AlnResult<()> {
        self.tree.set_bound(var, region, kind, value)
    }

    pub fn add_region(&mut self, parent: usize, learn_factor: f64) -> AlnResult<usize> {
        self.tree.add_region(parent, learn_factor)
    }

    pub fn assign_region(&mut self, node: NodeId, region: usize) -> AlnResult<()> {
        self.tree.assign_region(node, region)
    }

    pub fn set_growable(&mut self, node: NodeId, growable: bool) -> AlnResult<()> {
        self.tree.set_growable(node, growable)
    }

    pub fn set_constant(&mut self, node: NodeId, constant: bool) -> AlnResult<()> {
        self.tree.set_constant(node, constant)
    }

    pub fn add_children(
        &mut self,
        node: NodeId,
        kind: MinMaxKind,
        count: usize,
    ) -> AlnResult<Vec<NodeId>> {
        self.tree.add_children(node, kind, count)
    }

    /// Sets buffer capacity and error mode. Only allowed before the first
    /// sample is loaded.
    pub fn configure_buffer(&mut self, capacity: usize, mode: ErrorMode) -> AlnResult<()> {
        if self.buffer.as_ref().is_some_and(|b| !b.is_empty()) {
            return Err(AlnError::invalid(
                "buffer already holds samples; its shape and mode are fixed",
            ));
        }
        self.buffer = Some(NoiseVarianceBuffer::new(
            self.dimension(),
            self.output_index(),
            capacity,
            mode,
        )?);
        Ok(())
    }

    pub fn buffer(&self) -> Option<&NoiseVarianceBuffer> {
        self.buffer.as_ref()
    }

    pub fn add_sample(&mut self, sample: &[f64]) -> AlnResult<()> {
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| AlnError::invalid("configure the buffer before adding samples"))?;
        buffer.insert(sample)
    }

    /// Loads every remaining sample of `stream`; returns how many were added.
    pub fn load_stream(&mut self, stream: &mut dyn SampleStream) -> AlnResult<usize> {
        if stream.dimension() != self.dimension() {
            return Err(AlnError::invalid(format!(
                "stream has {} columns, model expects {}",
                stream.dimension(),
                self.dimension()
            )));
        }
        let mut added = 0;
        while let Some(sample) = stream.next_sample()? {
            self.add_sample(&sample)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn reduce_noise_variance(&mut self) -> AlnResult<usize> {
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| AlnError::invalid("no buffer configured"))?;
        Ok(buffer.reduce_noise_variance())
    }

    /// Surface value at `x`; the output component of `x` is ignored.
    pub fn evaluate(&self, x: &[f64]) -> AlnResult<Evaluation> {
        let x = self.blank_output(x)?;
        Ok(evaluate(&self.tree, &x))
    }

    /// Same as [`Aln::evaluate`] without any pruning.
    pub fn evaluate_exhaustive(&self, x: &[f64]) -> AlnResult<Evaluation> {
        let x = self.blank_output(x)?;
        Ok(evaluate_exhaustive(&self.tree, &x))
    }

    /// Surface value and responsible leaf for every buffered sample.
    pub fn evaluate_buffer(&self) -> Vec<Evaluation> {
        let Some(buffer) = self.buffer.as_ref() else {
            return Vec::new();
        };
        let out = self.output_index();
        let mut x = vec![0.0; self.dimension()];
        buffer
            .rows()
            .map(|r| {
                x.copy_from_slice(r.sample);
                x[out] = 0.0;
                evaluate(&self.tree, &x)
            })
            .collect()
    }

    /// Root mean square error over the buffered samples.
    pub fn rms_error(&self) -> AlnResult<f64> {
        let buffer = self
            .buffer
            .as_ref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| AlnError::invalid("no buffered samples"))?;
        let sum: f64 = buffer
            .rows()
            .map(|r| {
                let e = evaluate(&self.tree, r.sample).value;
                e * e
            })
            .sum();
        Ok((sum / buffer.len() as f64).sqrt())
    }

    pub fn var_monotonicity(&self, var: usize) -> AlnResult<Monotonicity> {
        var_monotonicity(&self.tree, var)
    }

    /// Makes input `var` the output, so the model computes the inverse
    /// function. Buffered samples are kept and re-indexed for the new output.
    pub fn invert(&mut self, var: usize) -> AlnResult<Monotonicity> {
        let before = self.output_index();
        let mono = invert(&mut self.tree, var)?;
        if self.output_index() != before
            && let Some(old) = &self.buffer
        {
            let mut buffer = NoiseVarianceBuffer::new(
                old.dimension(),
                self.output_index(),
                old.capacity(),
                old.mode(),
            )?;
            for row in old.rows() {
                buffer.insert(row.sample)?;
            }
            self.buffer = Some(buffer);
        }
        Ok(mono)
    }

    /// Steepens every piece about its 0 crossing; for classification.
    pub fn decay_weights(&mut self, decay: WeightDecay) -> AlnResult<()> {
        decay.validate()?;
        decay_weights(&mut self.tree, decay);
        Ok(())
    }

    pub fn train(
        &mut self,
        config: &TrainConfig,
        observer: &mut dyn TrainObserver,
    ) -> AlnResult<TrainReport> {
        Trainer::new(config)?.run(self, observer)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> AlnResult<()> {
        persist::save(&self.tree, path)
    }

    pub fn load(path: impl AsRef<Path>) -> AlnResult<Self> {
        Ok(Self::from_tree(persist::load(path)?))
    }

    fn blank_output(&self, x: &[f64]) -> AlnResult<Vec<f64>> {
        if x.len() != self.dimension() {
            return Err(AlnError::invalid(format!(
                "input has {} values, expected {}",
                x.len(),
                self.dimension()
            )));
        }
        let mut x = x.to_vec();
        x[self.output_index()] = 0.0;
        Ok(x)
    }
}
