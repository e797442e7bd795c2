use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::aln::node::{MinMaxKind, NodeId};
use crate::aln::tree::Tree;

/// Turns a leaf into the flat surface `value`.
pub(crate) fn constant_leaf(tree: &mut Tree, id: NodeId, value: f64) {
    let output = tree.output_index();
    let leaf = tree.leaf_mut(id).unwrap();
    leaf.weights.iter_mut().for_each(|w| *w = 0.0);
    leaf.weights[output] = -1.0;
    leaf.bias = value;
}

/// Random tree with `leaves` leaves, random affine pieces and random routing
/// hyperplanes.
pub(crate) fn random_tree(seed: u64, dim: usize, output: usize, leaves: usize) -> Tree {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tree = Tree::new(dim, output).unwrap();
    while tree.leaf_count() < leaves {
        let ids = tree.leaf_ids();
        let pick = ids[rng.random_range(0..ids.len())];
        let kind = if rng.random_bool(0.5) {
            MinMaxKind::Min
        } else {
            MinMaxKind::Max
        };
        tree.add_children(pick, kind, 2).unwrap();
    }

    for i in 0..tree.node_count() {
        let id = NodeId(i);
        if tree.node(id).unwrap().is_leaf() {
            let leaf = tree.leaf_mut(id).unwrap();
            leaf.bias = rng.random_range(-1.0..1.0);
            for (j, w) in leaf.weights.iter_mut().enumerate() {
                *w = if j == output {
                    -1.0
                } else {
                    rng.random_range(-2.0..2.0)
                };
            }
            leaf.initialized = true;
        } else {
            let s = tree.selector_mut(id).unwrap();
            for (j, n) in s.normal.iter_mut().enumerate() {
                *n = if j == output {
                    0.0
                } else {
                    rng.random_range(-1.0..1.0)
                };
            }
            s.threshold = rng.random_range(-0.5..0.5);
        }
    }
    tree
}
