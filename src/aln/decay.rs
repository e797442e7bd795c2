use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::aln::node::{LinearLeaf, NodeKind};
use crate::aln::tree::Tree;
use crate::core::error::{AlnError, AlnResult};

/// Weights smaller than this have no settled sign yet and are not grown.
const SETTLED_WEIGHT: f64 = 0.006;

/// Slope growth for classification: every piece is rotated about the point
/// where it crosses the 0 level, so class boundaries stay put while the
/// surface pulls away from both class levels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeightDecay {
    /// Multiplier on input weights; above 1 steepens the pieces.
    pub factor: f64,
    /// Bound on the magnitude of any grown weight.
    pub bound: f64,
}

impl WeightDecay {
    pub fn validate(&self) -> AlnResult<()> {
        if !(self.factor > 0.0 && self.factor.is_finite()) {
            return Err(AlnError::invalid(format!(
                "weight decay factor must be positive and finite, got {}",
                self.factor
            )));
        }
        if !(self.bound > 0.0) {
            return Err(AlnError::invalid(format!(
                "weight decay bound must be positive, got {}",
                self.bound
            )));
        }
        Ok(())
    }
}

/// Applies `decay` to every non-constant leaf.
pub fn decay_weights(tree: &mut Tree, decay: WeightDecay) {
    let output = tree.output_index();
    for node in tree.nodes_mut() {
        if let NodeKind::Leaf(leaf) = &mut node.kind
            && !leaf.constant
        {
            decay_leaf(leaf, output, decay);
        }
    }
}

fn decay_leaf(leaf: &mut LinearLeaf, output: usize, decay: WeightDecay) {
    let inputs = (leaf.weights.len() - 1) as f64;
    let level = leaf.centroid[output];

    // each settled axis takes an equal part of the way to the 0 level
    for i in 0..leaf.weights.len() {
        let w = leaf.weights[i];
        if i == output || w.abs() < SETTLED_WEIGHT {
            continue;
        }
        let shift = level / (inputs * w);
        leaf.centroid[i] -= shift;
        leaf.centroid[output] -= w * shift;
        leaf.weights[i] = (w * decay.factor).clamp(-decay.bound, decay.bound);
    }
    leaf.recenter_bias(output);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aln::evaluator::evaluate;
    use crate::aln::node::{MinMaxKind, NodeId};

    fn piece(tree: &mut Tree, id: NodeId, weights: &[f64], centroid: &[f64]) {
        let output = tree.output_index();
        let leaf = tree.leaf_mut(id).unwrap();
        leaf.weights = weights.to_vec();
        leaf.centroid = centroid.to_vec();
        leaf.recenter_bias(output);
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    const DOUBLE: WeightDecay = WeightDecay {
        factor: 2.0,
        bound: 10.0,
    };

    #[test]
    fn steepens_about_the_zero_crossing() {
        let mut t = Tree::new(2, 1).unwrap();
        let root = t.root();
        piece(&mut t, root, &[1.0, -1.0], &[0.0, 0.5]);
        // y = x + 0.5 crosses 0 at -0.5
        decay_weights(&mut t, DOUBLE);

        let leaf = t.leaf(root).unwrap();
        assert_eq!(leaf.weights(), &[2.0, -1.0]);
        assert!(approx_eq(leaf.centroid()[0], -0.5));
        assert!(approx_eq(leaf.centroid()[1], 0.0));
        assert!(approx_eq(evaluate(&t, &[-0.5, 0.0]).value, 0.0));
        assert!(approx_eq(evaluate(&t, &[0.5, 0.0]).value, 2.0));
    }

    #[test]
    fn zero_level_set_survives_in_two_inputs() {
        let mut t = Tree::new(3, 2).unwrap();
        let root = t.root();
        piece(&mut t, root, &[1.0, -2.0, -1.0], &[0.3, 0.1, 0.7]);
        // y = 0.6 + a - 2b is 0 along b = (a + 0.6) / 2
        let bias = t.leaf(root).unwrap().bias();
        assert!(approx_eq(bias, 0.6));
        let points: Vec<[f64; 3]> = [-1.0, 0.0, 2.0]
            .iter()
            .map(|&a| [a, (a + bias) / 2.0, 0.0])
            .collect();
        for x in &points {
            assert!(approx_eq(evaluate(&t, x).value, 0.0));
        }

        decay_weights(&mut t, DOUBLE);
        assert_eq!(t.leaf(root).unwrap().weights(), &[2.0, -4.0, -1.0]);
        for x in &points {
            assert!(approx_eq(evaluate(&t, x).value, 0.0), "{x:?}");
        }
    }

    #[test]
    fn unsettled_bounded_and_constant_pieces() {
        let mut t = Tree::new(2, 1).unwrap();
        let kids = t.add_children(t.root(), MinMaxKind::Max, 3).unwrap();
        piece(&mut t, kids[0], &[0.001, -1.0], &[0.0, 0.5]);
        piece(&mut t, kids[1], &[8.0, -1.0], &[0.0, 0.0]);
        piece(&mut t, kids[2], &[1.0, -1.0], &[0.0, 0.5]);
        t.set_constant(kids[2], true).unwrap();
        let constant = t.leaf(kids[2]).unwrap().clone();
        let unsettled = t.leaf(kids[0]).unwrap().clone();

        decay_weights(&mut t, DOUBLE);
        assert_eq!(t.leaf(kids[0]).unwrap(), &unsettled);
        assert_eq!(t.leaf(kids[1]).unwrap().weights(), &[10.0, -1.0]);
        assert_eq!(t.leaf(kids[2]).unwrap(), &constant);
    }

    #[test]
    fn bad_settings_are_rejected() {
        assert!(DOUBLE.validate().is_ok());
        for (factor, bound) in [(0.0, 1.0), (f64::NAN, 1.0), (1.1, 0.0), (1.1, f64::NAN)] {
            assert!(WeightDecay { factor, bound }.validate().is_err());
        }
    }
}
