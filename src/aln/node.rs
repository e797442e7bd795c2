use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum MinMaxKind {
    Min,
    Max,
}

impl MinMaxKind {
    /// Whether the second-visited child wins against the first.
    /// MAX keeps the first child on ties, MIN hands ties to the second.
    #[inline]
    pub fn prefers_second(self, first: f64, second: f64) -> bool {
        (self == MinMaxKind::Max) == (second > first)
    }
}

/// Statistics gathered for one leaf between two split checks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitStats {
    /// samples for which the leaf was active during the statistics walk
    pub hits: usize,
    pub sq_error: f64,
    pub noise_variance: f64,
    /// per-axis sign of error growth away from the centroid, from the walk
    pub bend: Vec<f64>,
    /// adapt-pass hits, squared error and credit
    pub adapt_hits: usize,
    pub adapt_sq_error: f64,
    pub adapt_credit: f64,
    /// smoothed per-axis bend kept while adapting
    pub running_bend: Vec<f64>,
}

impl SplitStats {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            bend: vec![0.0; dim],
            running_bend: vec![0.0; dim],
            ..Self::default()
        }
    }

    pub(crate) fn clear_walk(&mut self) {
        self.hits = 0;
        self.sq_error = 0.0;
        self.noise_variance = 0.0;
        self.bend.iter_mut().for_each(|b| *b = 0.0);
    }

    pub(crate) fn clear_adapt(&mut self) {
        self.adapt_hits = 0;
        self.adapt_sq_error = 0.0;
        self.adapt_credit = 0.0;
    }
}

/// Affine leaf `bias + Σ w_i x_i` where the output weight is pinned at -1, so
/// evaluating with the output zeroed yields the surface value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearLeaf {
    pub(crate) bias: f64,
    pub(crate) weights: Vec<f64>,
    pub(crate) centroid: Vec<f64>,
    pub(crate) variance: Vec<f64>,
    pub(crate) constant: bool,
    pub(crate) growable: bool,
    pub(crate) initialized: bool,
    #[serde(skip)]
    pub(crate) stats: SplitStats,
}

impl LinearLeaf {
    pub(crate) fn new(dim: usize, output: usize, sq_epsilon: f64) -> Self {
        let mut weights = vec![0.0; dim];
        weights[output] = crate::core::constraint::OUTPUT_WEIGHT;
        Self {
            bias: 0.0,
            weights,
            centroid: vec![0.0; dim],
            variance: vec![sq_epsilon; dim],
            constant: false,
            growable: true,
            initialized: false,
            stats: SplitStats::new(dim),
        }
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn centroid(&self) -> &[f64] {
        &self.centroid
    }

    pub fn variance(&self) -> &[f64] {
        &self.variance
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    pub fn is_growable(&self) -> bool {
        self.growable
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn split_stats(&self) -> &SplitStats {
        &self.stats
    }

    #[inline]
    pub fn value(&self, x: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(x)
                .map(|(w, xi)| w * xi)
                .sum::<f64>()
    }

    /// Places the hyperplane through the centroid.
    pub(crate) fn recenter_bias(&mut self, output: usize) {
        self.bias = self.centroid[output]
            - self
                .weights
                .iter()
                .zip(&self.centroid)
                .enumerate()
                .filter(|(i, _)| *i != output)
                .map(|(_, (w, c))| w * c)
                .sum::<f64>();
    }

    pub(crate) fn fresh_copy(&self) -> Self {
        let dim = self.weights.len();
        Self {
            stats: SplitStats::new(dim),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    pub(crate) kind: MinMaxKind,
    pub(crate) children: [NodeId; 2],
    /// routing hyperplane: visit child 1 first when `normal·x + threshold > 0`
    pub(crate) normal: Vec<f64>,
    pub(crate) threshold: f64,
    pub(crate) centroid: Vec<f64>,
    pub(crate) half_width: Option<Vec<f64>>,
    #[serde(skip)]
    pub(crate) hits: usize,
    #[serde(skip)]
    pub(crate) active: usize,
    #[serde(skip)]
    pub(crate) active_responsibility: f64,
}

impl Selector {
    pub(crate) fn new(kind: MinMaxKind, children: [NodeId; 2], centroid: Vec<f64>) -> Self {
        let dim = centroid.len();
        Self {
            kind,
            children,
            normal: vec![0.0; dim],
            threshold: 0.0,
            centroid,
            half_width: None,
            hits: 0,
            active: 0,
            active_responsibility: 1.0,
        }
    }

    pub fn kind(&self) -> MinMaxKind {
        self.kind
    }

    pub fn children(&self) -> [NodeId; 2] {
        self.children
    }

    pub fn normal(&self) -> &[f64] {
        &self.normal
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn centroid(&self) -> &[f64] {
        &self.centroid
    }

    pub fn half_width(&self) -> Option<&[f64]> {
        self.half_width.as_deref()
    }

    pub fn active_child(&self) -> NodeId {
        self.children[self.active]
    }

    /// Child indices in visiting order for input `x`.
    #[inline]
    pub(crate) fn visit_order(&self, x: &[f64], output: usize) -> [usize; 2] {
        let dot: f64 = self
            .normal
            .iter()
            .zip(x)
            .enumerate()
            .filter(|(i, _)| *i != output)
            .map(|(_, (n, xi))| n * xi)
            .sum::<f64>()
            + self.threshold;
        if dot > 0.0 { [1, 0] } else { [0, 1] }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf(LinearLeaf),
    Selector(Selector),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) region: usize,
    pub(crate) kind: NodeKind,
    #[serde(skip)]
    pub(crate) evaluated: bool,
    #[serde(skip)]
    pub(crate) activations: u64,
    #[serde(skip)]
    pub(crate) activations_last_epoch: u64,
}

impl Node {
    pub(crate) fn new(parent: Option<NodeId>, region: usize, kind: NodeKind) -> Self {
        Self {
            parent,
            region,
            kind,
            evaluated: false,
            activations: 0,
            activations_last_epoch: 0,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn region(&self) -> usize {
        self.region
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn as_leaf(&self) -> Option<&LinearLeaf> {
        match &self.kind {
            NodeKind::Leaf(l) => Some(l),
            NodeKind::Selector(_) => None,
        }
    }

    pub fn as_selector(&self) -> Option<&Selector> {
        match &self.kind {
            NodeKind::Selector(s) => Some(s),
            NodeKind::Leaf(_) => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    /// Activations this epoch plus the whole previous epoch.
    pub fn recent_activations(&self) -> u64 {
        self.activations + self.activations_last_epoch
    }
}
