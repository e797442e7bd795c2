use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::aln::node::{MinMaxKind, NodeId, NodeKind};
use crate::aln::tree::Tree;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub value: f64,
    pub leaf: NodeId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EvalOptions {
    /// Skip subtrees that cannot change an ancestor's result.
    pub alpha_beta: bool,
    /// Skip a selector subtree when the input lies outside its recorded
    /// extent. This can change results.
    pub distance_cutoff: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            alpha_beta: true,
            distance_cutoff: false,
        }
    }
}

impl EvalOptions {
    pub fn exhaustive() -> Self {
        Self {
            alpha_beta: false,
            distance_cutoff: false,
        }
    }
}

/// Bounds handed down from ancestors. `ceiling` comes from MIN ancestors and
/// `floor` from MAX ancestors.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cutoff {
    ceiling: Option<f64>,
    floor: Option<f64>,
}

impl Cutoff {
    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    pub fn floor(&self) -> Option<f64> {
        self.floor
    }

    /// Called after a selector of `kind` evaluated its first child to `value`.
    /// Returns true when the second child cannot matter to any ancestor;
    /// otherwise tightens the bound for the second child.
    ///
    /// The comparisons follow the tie rule: a MIN ancestor takes its second
    /// child on a tie, so a MAX only stops strictly above the ceiling, while a
    /// MAX ancestor keeps its first child on a tie, so a MIN may stop at the
    /// floor.
    pub fn update(&mut self, kind: MinMaxKind, value: f64) -> bool {
        match kind {
            MinMaxKind::Max => {
                if let Some(c) = self.ceiling
                    && value > c
                {
                    return true;
                }
                self.floor = Some(self.floor.map_or(value, |f| f.max(value)));
            }
            MinMaxKind::Min => {
                if let Some(f) = self.floor
                    && value <= f
                {
                    return true;
                }
                self.ceiling = Some(self.ceiling.map_or(value, |c| c.min(value)));
            }
        }
        false
    }
}

/// Evaluates the tree at `x` with the default options. The output component of
/// `x` is part of the affine sum: zero it for the surface value, or leave the
/// desired output in place to get the signed error.
pub fn evaluate(tree: &Tree, x: &[f64]) -> Evaluation {
    evaluate_with(tree, x, EvalOptions::default())
}

pub fn evaluate_with(tree: &Tree, x: &[f64], opts: EvalOptions) -> Evaluation {
    debug_assert_eq!(x.len(), tree.dimension());
    eval_node(tree, tree.root(), x, Cutoff::default(), opts)
}

/// Full walk without any cutoff; same visiting order and tie rule as
/// [`evaluate`], so both agree on value and leaf.
pub fn evaluate_exhaustive(tree: &Tree, x: &[f64]) -> Evaluation {
    evaluate_with(tree, x, EvalOptions::exhaustive())
}

fn eval_node(tree: &Tree, id: NodeId, x: &[f64], mut cutoff: Cutoff, opts: EvalOptions) -> Evaluation {
    let s = match &tree.node_ref(id).kind {
        NodeKind::Leaf(l) => {
            return Evaluation {
                value: l.value(x),
                leaf: id,
            };
        }
        NodeKind::Selector(s) => s,
    };

    let [a, b] = s.visit_order(x, tree.output_index());
    let first = eval_node(tree, s.children[a], x, cutoff, opts);
    if opts.alpha_beta && cutoff.update(s.kind, first.value) {
        return first;
    }
    if opts.distance_cutoff && outside_extent(tree, s.children[b], x) {
        return first;
    }
    let second = eval_node(tree, s.children[b], x, cutoff, opts);
    if s.kind.prefers_second(first.value, second.value) {
        second
    } else {
        first
    }
}

fn outside_extent(tree: &Tree, id: NodeId, x: &[f64]) -> bool {
    let Some(s) = tree.node_ref(id).as_selector() else {
        return false;
    };
    let Some(hw) = s.half_width.as_deref() else {
        return false;
    };
    let output = tree.output_index();
    x.iter()
        .zip(&s.centroid)
        .zip(hw)
        .enumerate()
        .any(|(j, ((xj, cj), wj))| j != output && (xj - cj).abs() > *wj)
}

enum Step {
    Leaf(f64),
    Selector(MinMaxKind, [NodeId; 2], [usize; 2]),
}

/// Evaluation used before adapting: marks visited nodes and records which
/// child each visited selector picked.
pub(crate) fn evaluate_for_adapt(
    tree: &mut Tree,
    id: NodeId,
    x: &[f64],
    mut cutoff: Cutoff,
    opts: EvalOptions,
) -> Evaluation {
    let output = tree.output_index();
    let step = match &tree.node_ref(id).kind {
        NodeKind::Leaf(l) => Step::Leaf(l.value(x)),
        NodeKind::Selector(s) => Step::Selector(s.kind, s.children, s.visit_order(x, output)),
    };

    tree.node_mut(id).evaluated = true;
    let (kind, children, [a, b]) = match step {
        Step::Leaf(value) => return Evaluation { value, leaf: id },
        Step::Selector(kind, children, order) => (kind, children, order),
    };
    tree.node_mut(children[0]).evaluated = false;
    tree.node_mut(children[1]).evaluated = false;

    let first = evaluate_for_adapt(tree, children[a], x, cutoff, opts);
    let (active, result) = if (opts.alpha_beta && cutoff.update(kind, first.value))
        || (opts.distance_cutoff && outside_extent(tree, children[b], x))
    {
        (a, first)
    } else {
        let second = evaluate_for_adapt(tree, children[b], x, cutoff, opts);
        if kind.prefers_second(first.value, second.value) {
            (b, second)
        } else {
            (a, first)
        }
    };

    if let NodeKind::Selector(s) = &mut tree.node_mut(id).kind {
        s.active = active;
        s.active_responsibility = 1.0;
    }
    result
}
