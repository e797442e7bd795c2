use log::{debug, trace};

use crate::aln::evaluator::{EvalOptions, evaluate_with};
use crate::aln::node::{MinMaxKind, NodeId, NodeKind};
use crate::aln::split::f_table::FTable;
use crate::aln::tree::Tree;
use crate::buffer::{ErrorMode, NoiseVarianceBuffer};
use crate::core::error::AlnResult;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SplitConfig {
    pub classify: bool,
    /// With `classify`, always split into MIN.
    pub convex: bool,
    /// Lifetime cap on the number of splits.
    pub max_splits: Option<usize>,
    pub eval: EvalOptions,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplitReport {
    /// leaves with enough hits to be judged
    pub checked: usize,
    /// leaves whose error exceeded the limit
    pub needing_split: usize,
    /// leaves turned into selectors, with the chosen kind
    pub split: Vec<(NodeId, MinMaxKind)>,
}

impl SplitReport {
    /// No judged leaf fits badly enough to keep training.
    pub fn converged(&self) -> bool {
        self.needing_split == 0
    }
}

#[derive(Clone, Debug)]
enum Criterion {
    FTest(FTable),
    FixedMse(f64),
}

/// Per-axis contribution of a subtree to its parent's extent.
struct Extent {
    hits: usize,
    centroid: Vec<f64>,
    spread: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct SplitController {
    criterion: Criterion,
    config: SplitConfig,
}

impl SplitController {
    pub fn new(mode: ErrorMode, config: SplitConfig) -> AlnResult<Self> {
        mode.validate()?;
        let criterion = match mode {
            ErrorMode::FTest { significance } => Criterion::FTest(FTable::new(significance)?),
            ErrorMode::FixedMse { threshold } => Criterion::FixedMse(threshold),
        };
        Ok(Self { criterion, config })
    }

    /// A leaf is judged only with more hits than this.
    pub fn min_hits(&self, dim: usize) -> usize {
        if self.config.classify {
            1
        } else {
            (1.2 * dim as f64 + 1.0) as usize
        }
    }

    /// Gathers statistics over the buffer, refreshes selector geometry and
    /// splits every leaf that fits worse than the noise allows.
    pub fn run(
        &self,
        tree: &mut Tree,
        buffer: &NoiseVarianceBuffer,
        splits_so_far: usize,
    ) -> SplitReport {
        clear_walk_stats(tree);
        self.accumulate(tree, buffer);
        let root = tree.root();
        aggregate(tree, root);
        self.split_leaves(tree, splits_so_far)
    }

    fn accumulate(&self, tree: &mut Tree, buffer: &NoiseVarianceBuffer) {
        let output = tree.output_index();
        let track_noise = matches!(self.criterion, Criterion::FTest(_));
        let mut x = vec![0.0; tree.dimension()];

        for row in buffer.rows() {
            x.copy_from_slice(row.sample);
            let desired = x[output];
            x[output] = 0.0;
            let eval = evaluate_with(tree, &x, self.config.eval);

            let NodeKind::Leaf(leaf) = &mut tree.node_mut(eval.leaf).kind else {
                continue;
            };
            if !leaf.growable {
                continue;
            }
            let err = eval.value - desired;
            let stats = &mut leaf.stats;
            stats.hits += 1;
            stats.sq_error += err * err;

            let mut fitted_diff = 0.0;
            for j in (0..x.len()).filter(|j| *j != output) {
                let dx = x[j] - leaf.centroid[j];
                let spread = dx * dx - leaf.variance[j];
                // positive when the data bends up away from the centroid
                stats.bend[j] -= spread * err;
                fitted_diff += leaf.weights[j] * row.neighbor_diff[j];
            }
            if track_noise && row.neighbor_sq_dist.is_finite() {
                let noise = row.neighbor_diff[output] - fitted_diff;
                stats.noise_variance += 0.5 * noise * noise;
            }
        }
    }

    fn split_leaves(&self, tree: &mut Tree, splits_so_far: usize) -> SplitReport {
        let min_hits = self.min_hits(tree.dimension());
        let mut report = SplitReport::default();
        let mut budget = self
            .config
            .max_splits
            .map(|m| m.saturating_sub(splits_so_far));

        for id in tree.leaf_ids() {
            let Some(leaf) = tree.leaf(id) else {
                continue;
            };
            let s = leaf.split_stats();
            if !leaf.is_growable() || s.hits <= min_hits {
                continue;
            }
            report.checked += 1;

            let (limit, noise) = match &self.criterion {
                Criterion::FTest(table) => (table.limit(s.hits), s.noise_variance),
                Criterion::FixedMse(mse) => (*mse, s.hits as f64),
            };
            let fits = s.sq_error <= noise * limit;
            debug!(
                "leaf {}: hits={} sq_error={:.6e} noise={:.6e} limit={:.4} fits={}",
                id.index(),
                s.hits,
                s.sq_error,
                noise,
                limit,
                fits
            );
            if fits {
                continue;
            }
            report.needing_split += 1;

            // two points cannot place a break
            if s.hits <= 2 || budget == Some(0) {
                continue;
            }
            let kind = self.convexity(tree, id);
            if tree.split_leaf(id, kind).is_ok() {
                trace!("split leaf {} into {kind}", id.index());
                report.split.push((id, kind));
                if let Some(b) = budget.as_mut() {
                    *b -= 1;
                }
            }
        }
        report
    }

    fn convexity(&self, tree: &Tree, id: NodeId) -> MinMaxKind {
        if self.config.classify && self.config.convex {
            return MinMaxKind::Min;
        }
        let node = tree.node_ref(id);
        let Some(leaf) = node.as_leaf() else {
            return MinMaxKind::Min;
        };
        let mut bend: f64 = leaf.stats.bend.iter().sum();
        if bend == 0.0 {
            bend = leaf.stats.running_bend.iter().sum();
        }
        if bend > 0.0 {
            MinMaxKind::Max
        } else if bend < 0.0 {
            MinMaxKind::Min
        } else {
            node.parent
                .and_then(|p| tree.selector(p))
                .map_or(MinMaxKind::Min, |s| s.kind)
        }
    }
}

fn clear_walk_stats(tree: &mut Tree) {
    let (nodes, _) = tree.nodes_and_regions();
    for node in nodes.iter_mut() {
        if let NodeKind::Leaf(l) = &mut node.kind {
            l.stats.clear_walk();
        }
    }
}

/// Recomputes each selector's hit-weighted centroid, half-width and routing
/// hyperplane from its children.
fn aggregate(tree: &mut Tree, id: NodeId) -> Extent {
    let output = tree.output_index();
    let children = match &tree.node_ref(id).kind {
        NodeKind::Leaf(l) => {
            let mut centroid = l.centroid.clone();
            centroid[output] = 0.0;
            let spread = l
                .variance
                .iter()
                .enumerate()
                .map(|(j, v)| if j == output { 0.0 } else { 4.0 * v.sqrt() })
                .collect();
            return Extent {
                hits: l.stats.hits,
                centroid,
                spread,
            };
        }
        NodeKind::Selector(s) => s.children,
    };

    let left = aggregate(tree, children[0]);
    let right = aggregate(tree, children[1]);
    let hits = left.hits + right.hits;
    let dim = left.centroid.len();

    let centroid: Vec<f64> = (0..dim)
        .map(|j| {
            if hits == 0 {
                0.5 * (left.centroid[j] + right.centroid[j])
            } else {
                (left.hits as f64 * left.centroid[j] + right.hits as f64 * right.centroid[j])
                    / hits as f64
            }
        })
        .collect();
    let normal: Vec<f64> = (0..dim).map(|j| centroid[j] - left.centroid[j]).collect();
    let threshold = -(0..dim)
        .map(|j| (right.centroid[j] - normal[j]) * normal[j])
        .sum::<f64>();
    let half_width: Vec<f64> = (0..dim)
        .map(|j| {
            left.spread[j] + right.spread[j] + 0.5 * (right.centroid[j] - left.centroid[j]).abs()
        })
        .collect();
    let spread = half_width.iter().map(|h| 0.5 * h).collect();

    if let NodeKind::Selector(s) = &mut tree.node_mut(id).kind {
        s.hits = hits;
        s.centroid = centroid.clone();
        s.normal = normal;
        s.threshold = threshold;
        s.half_width = Some(half_width);
    }

    Extent {
        hits,
        centroid,
        spread,
    }
}
