use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::aln::evaluator::{Cutoff, EvalOptions, evaluate_for_adapt};
use crate::aln::node::{NodeId, NodeKind};
use crate::aln::tree::Tree;

/// Children receiving credit at or below this are not visited.
pub const CREDIT_FLOOR: f64 = 0.0;

/// A squared distance above this multiple of the axis variance counts as far
/// from the centroid when tracking the running bend.
const FAR_VARIANCE_RATIO: f64 = 1.144_712_695;

/// Keeps a rarely active child learning. The numbers are empirical tunables.
///
/// Off by default: handing credit to the losing piece on every sample of a
/// one-sided fit keeps both pieces chasing each other's data, and a plain
/// |x| fit then never settles on a single break.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StarvationRule {
    pub enabled: bool,
    /// Responsibility the active child must hold before its sibling is
    /// considered for forced credit.
    pub threshold: f64,
    /// Responsibility left to the active child when the rule fires.
    pub forced_responsibility: f64,
}

impl Default for StarvationRule {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 1.0,
            forced_responsibility: 0.75,
        }
    }
}

impl StarvationRule {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

/// Per-sample state shared by every node of one adapt pass.
#[derive(Clone, Copy, Debug)]
pub struct AdaptContext {
    /// tree value minus desired output for this sample
    pub error: f64,
    pub learn_rate: f64,
    pub useful: bool,
    pub starvation: StarvationRule,
    pub eval: EvalOptions,
}

/// Credit shares `(active, inactive)` for active responsibility `r`. Weighted
/// by activation probabilities `r` and `1 - r` they sum to one.
pub fn responsibility_split(r: f64) -> (f64, f64) {
    let factor = 1.0 / (1.0 - 2.0 * r * (1.0 - r));
    (r * factor, (1.0 - r) * factor)
}

/// Adapts the tree to one sample. `x` carries the desired output and must have
/// just been evaluated with [`evaluate_for_adapt`] so selectors know their
/// active child.
pub fn adapt(tree: &mut Tree, x: &[f64], ctx: &AdaptContext) {
    let root = tree.root();
    adapt_node(tree, root, x, 1.0, true, ctx);
}

fn adapt_node(
    tree: &mut Tree,
    id: NodeId,
    x: &[f64],
    credit: f64,
    on_active_path: bool,
    ctx: &AdaptContext,
) {
    if ctx.useful && on_active_path {
        tree.node_mut(id).activations += 1;
    }

    let (children, active, r_active) = match &tree.node_ref(id).kind {
        NodeKind::Leaf(_) => {
            adapt_leaf(tree, id, x, credit, ctx);
            return;
        }
        NodeKind::Selector(s) => (s.children, s.active, s.active_responsibility),
    };

    let output = tree.output_index();
    let out_eps = tree
        .constraint(tree.node_ref(id).region, output)
        .map_or(0.0, |c| c.epsilon());
    let (active_id, other_id) = (children[active], children[1 - active]);

    let starved = ctx.starvation.enabled
        && ctx.error.abs() > out_eps
        && r_active >= ctx.starvation.threshold
        && tree.node_ref(other_id).recent_activations()
            < tree.node_ref(active_id).recent_activations();

    let r = if starved {
        if !tree.node_ref(other_id).evaluated {
            evaluate_for_adapt(tree, other_id, x, Cutoff::default(), ctx.eval);
        }
        ctx.starvation.forced_responsibility
    } else {
        r_active
    };

    let (share_active, share_other) = responsibility_split(r);
    let credit_active = share_active * credit;
    let credit_other = share_other * credit;

    if credit_active > CREDIT_FLOOR {
        adapt_node(tree, active_id, x, credit_active, on_active_path, ctx);
    }
    if credit_other > CREDIT_FLOOR {
        adapt_node(tree, other_id, x, credit_other, false, ctx);
    }
}

fn adapt_leaf(tree: &mut Tree, id: NodeId, x: &[f64], credit: f64, ctx: &AdaptContext) {
    let output = tree.output_index();
    let (nodes, regions) = tree.nodes_and_regions();
    let node = &mut nodes[id.index()];
    let region = &regions[node.region];
    let NodeKind::Leaf(leaf) = &mut node.kind else {
        return;
    };
    if leaf.constant || !ctx.useful {
        return;
    }

    let e = ctx.error;
    leaf.stats.adapt_hits += 1;
    leaf.stats.adapt_sq_error += e * e * credit;
    leaf.stats.adapt_credit += credit;

    let dim = leaf.weights.len();
    let lr = ctx.learn_rate * region.learn_factor();
    let step = lr * credit / (2 * dim - 1) as f64;

    leaf.centroid[output] += (x[output] - leaf.centroid[output]) * step;

    for (i, c) in region.constraints().iter().enumerate() {
        if i == output || c.is_weight_fixed() {
            continue;
        }
        let xmc = x[i] - leaf.centroid[i];
        let var = leaf.variance[i] + (xmc * xmc - leaf.variance[i]) * lr;
        leaf.variance[i] = var.max(c.sq_epsilon());
        leaf.centroid[i] += xmc * step;

        let xmc = x[i] - leaf.centroid[i];
        let w = leaf.weights[i] - e * step * xmc / leaf.variance[i];
        leaf.weights[i] = c.clamp_weight(w);

        if leaf.growable {
            let bend = if xmc * xmc > FAR_VARIANCE_RATIO * leaf.variance[i] {
                -e
            } else {
                e
            };
            let rb = &mut leaf.stats.running_bend[i];
            *rb += (bend - *rb) * lr;
        }
    }

    leaf.recenter_bias(output);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aln::evaluator::evaluate;
    use crate::aln::fixtures::constant_leaf;
    use crate::aln::node::MinMaxKind;
    use crate::core::constraint::BoundKind;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() <= eps
    }

    fn ctx(error: f64, learn_rate: f64) -> AdaptContext {
        AdaptContext {
            error,
            learn_rate,
            useful: true,
            starvation: StarvationRule::default(),
            eval: EvalOptions::default(),
        }
    }

    fn step(tree: &mut Tree, x: &[f64], learn_rate: f64) -> f64 {
        let root = tree.root();
        let e = evaluate_for_adapt(tree, root, x, Cutoff::default(), EvalOptions::default());
        adapt(tree, x, &ctx(e.value, learn_rate));
        e.value
    }

    #[test]
    fn responsibility_shares_conserve_expected_update() {
        for i in 0..=100 {
            let r = i as f64 / 100.0;
            let (a, o) = responsibility_split(r);
            assert!(approx_eq(r * a + (1.0 - r) * o, 1.0, 1e-12), "r={r}");
            assert!(a >= 0.0 && o >= 0.0);
        }
        assert_eq!(responsibility_split(1.0), (1.0, 0.0));
        assert_eq!(responsibility_split(0.5), (1.0, 1.0));
    }

    #[test]
    fn single_leaf_learns_a_line() {
        let mut t = Tree::new(2, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        t.initialize_leaves(&[0.0, 1.0], &mut rng);
        for _ in 0..4000 {
            let x0: f64 = rng.random_range(-1.0..1.0);
            step(&mut t, &[x0, 2.0 * x0 + 1.0], 0.2);
        }
        let leaf = t.leaf(t.root()).unwrap();
        assert!(approx_eq(leaf.weights()[0], 2.0, 1e-3), "{:?}", leaf.weights());
        assert!(approx_eq(evaluate(&t, &[0.5, 0.0]).value, 2.0, 1e-3));
    }

    #[test]
    fn weights_stay_inside_bounds_and_output_stays_pinned() {
        let mut t = Tree::new(3, 2).unwrap();
        t.set_bound(0, 0, BoundKind::WeightMin, -0.5).unwrap();
        t.set_bound(0, 0, BoundKind::WeightMax, 0.5).unwrap();
        t.set_bound(1, 0, BoundKind::WeightMin, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        t.initialize_leaves(&[0.0, 0.0, 0.0], &mut rng);
        for _ in 0..2000 {
            let a: f64 = rng.random_range(-1.0..1.0);
            let b: f64 = rng.random_range(-1.0..1.0);
            step(&mut t, &[a, b, 4.0 * a - 3.0 * b], 0.3);
            let w = t.leaf(t.root()).unwrap().weights();
            assert!((-0.5..=0.5).contains(&w[0]));
            assert!(w[1] >= 0.0);
            assert_eq!(w[2], -1.0);
        }
    }

    #[test]
    fn adapted_leaf_passes_through_its_centroid() {
        let mut t = Tree::new(3, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        t.initialize_leaves(&[0.1, 0.2, 0.3], &mut rng);
        for k in 0..50 {
            let a = (k as f64 * 0.37).sin();
            let b = (k as f64 * 0.11).cos();
            step(&mut t, &[a, a * b, b], 0.5);
        }
        let leaf = t.leaf(t.root()).unwrap();
        let mut c = leaf.centroid().to_vec();
        let y = c[1];
        c[1] = 0.0;
        assert!(approx_eq(leaf.value(&c), y, 1e-12));
    }

    #[test]
    fn fixed_weight_axis_is_left_alone() {
        let mut t = Tree::new(3, 2).unwrap();
        t.set_bound(1, 0, BoundKind::WeightMin, 0.0).unwrap();
        t.set_bound(1, 0, BoundKind::WeightMax, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        t.initialize_leaves(&[0.0, 0.0, 0.0], &mut rng);
        let before = t.leaf(t.root()).unwrap().centroid()[1];
        for k in 0..20 {
            let v = k as f64 / 10.0;
            step(&mut t, &[v, v, v], 0.3);
        }
        let leaf = t.leaf(t.root()).unwrap();
        assert_eq!(leaf.weights()[1], 0.0);
        assert_eq!(leaf.centroid()[1], before);
    }

    #[test]
    fn constant_and_useless_samples_do_not_move_leaves() {
        let mut t = Tree::new(2, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        t.initialize_leaves(&[0.0, 0.0], &mut rng);
        let before = t.leaf(t.root()).unwrap().clone();

        let mut c = ctx(1.0, 0.5);
        c.useful = false;
        adapt(&mut t, &[1.0, 0.0], &c);
        assert_eq!(t.leaf(t.root()).unwrap().weights(), before.weights());
        assert_eq!(t.node(t.root()).unwrap().recent_activations(), 0);

        t.set_constant(t.root(), true).unwrap();
        adapt(&mut t, &[1.0, 0.0], &ctx(1.0, 0.5));
        assert_eq!(t.leaf(t.root()).unwrap().centroid(), before.centroid());
        assert_eq!(t.node(t.root()).unwrap().recent_activations(), 1);
    }

    #[test]
    fn only_active_leaf_moves_by_default() {
        let mut t = Tree::new(2, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        t.initialize_leaves(&[0.0, 0.0], &mut rng);
        let kids = t.add_children(t.root(), MinMaxKind::Max, 2).unwrap();
        constant_leaf(&mut t, kids[0], 1.0);
        constant_leaf(&mut t, kids[1], -1.0);
        let idle = t.leaf(kids[1]).unwrap().clone();

        step(&mut t, &[0.5, 3.0], 0.3);
        assert_eq!(t.leaf(kids[1]).unwrap(), &idle);
        assert_eq!(t.node(kids[0]).unwrap().recent_activations(), 1);
        assert_eq!(t.node(kids[1]).unwrap().recent_activations(), 0);
        assert_eq!(t.leaf(kids[0]).unwrap().split_stats().adapt_hits, 1);
    }

    fn starved_pair() -> (Tree, Vec<NodeId>) {
        let mut t = Tree::new(2, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        t.initialize_leaves(&[0.0, 0.0], &mut rng);
        let kids = t.add_children(t.root(), MinMaxKind::Max, 2).unwrap();
        constant_leaf(&mut t, kids[0], 1.0);
        constant_leaf(&mut t, kids[1], -1.0);
        t.node_mut(kids[0]).activations_last_epoch = 10;
        (t, kids)
    }

    fn adapt_with(t: &mut Tree, x: &[f64], starvation: StarvationRule) {
        let root = t.root();
        let e = evaluate_for_adapt(t, root, x, Cutoff::default(), EvalOptions::default());
        let mut c = ctx(e.value, 0.3);
        c.starvation = starvation;
        adapt(t, x, &c);
    }

    #[test]
    fn starvation_is_off_by_default() {
        let (mut t, kids) = starved_pair();
        let idle = t.leaf(kids[1]).unwrap().clone();
        adapt_with(&mut t, &[0.5, 3.0], StarvationRule::default());
        assert_eq!(t.leaf(kids[1]).unwrap(), &idle);
    }

    #[test]
    fn starved_child_gets_forced_credit() {
        let (mut t, kids) = starved_pair();
        let idle = t.leaf(kids[1]).unwrap().weights().to_vec();
        let rule = StarvationRule::enabled();
        assert!(rule.forced_responsibility < 1.0);
        adapt_with(&mut t, &[0.5, 3.0], rule);

        let moved = t.leaf(kids[1]).unwrap();
        assert_ne!(moved.weights(), idle.as_slice());
        let (_, share) = responsibility_split(rule.forced_responsibility);
        assert!(approx_eq(moved.split_stats().adapt_credit, share, 1e-12));
        assert!(t.leaf(kids[0]).unwrap().split_stats().adapt_credit > 1.0);
        // credit is not an activation
        assert_eq!(t.node(kids[1]).unwrap().recent_activations(), 0);
    }

    #[test]
    fn starvation_needs_a_real_error() {
        let (mut t, kids) = starved_pair();
        let idle = t.leaf(kids[1]).unwrap().clone();
        let x = [0.5, 1.0];
        assert_eq!(evaluate(&t, &x).value, 0.0);
        adapt_with(&mut t, &x, StarvationRule::enabled());
        assert_eq!(t.leaf(kids[1]).unwrap(), &idle);
    }

    #[test]
    fn running_bend_is_positive_for_convex_data() {
        let mut t = Tree::new(2, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(8);
        t.initialize_leaves(&[0.0, 0.5], &mut rng);
        for _ in 0..3000 {
            let v: f64 = rng.random_range(-1.0..1.0);
            step(&mut t, &[v, v * v], 0.1);
        }
        let bend = t.leaf(t.root()).unwrap().split_stats().running_bend[0];
        assert!(bend > 0.0, "bend {bend}");
    }
}
