use log::debug;

use crate::aln::monotonicity::{Monotonicity, var_monotonicity};
use crate::aln::node::{MinMaxKind, NodeKind};
use crate::aln::tree::Tree;
use crate::core::constraint::{DEFAULT_EPSILON, OUTPUT_WEIGHT, VarConstraint};
use crate::core::error::{AlnError, AlnResult};

/// Weight bound on every input once a tree has been inverted. Inverted slopes
/// are reciprocals and can be far steeper than anything seen in training.
pub const INVERTED_WEIGHT_BOUND: f64 = 1.0e6;

/// Turns `tree` into its inverse with respect to `var`: afterwards `var` is
/// the output and the old output is an input. Requires the surface to be
/// monotone in `var`; returns the monotonicity that was found.
///
/// Pieces that are flat in `var` get the smallest meaningful slope, the output
/// epsilon over the range of `var` in the root region, so that range must be
/// finite.
pub fn invert(tree: &mut Tree, var: usize) -> AlnResult<Monotonicity> {
    let mono = var_monotonicity(tree, var)?;
    let old = tree.output_index();
    if var == old {
        return Ok(mono);
    }
    let increasing = match mono {
        Monotonicity::StrongInc | Monotonicity::WeakInc => true,
        Monotonicity::StrongDec | Monotonicity::WeakDec => false,
        Monotonicity::Constant | Monotonicity::Free => {
            return Err(AlnError::invalid(format!(
                "output is {mono} in variable {var}, only a monotone surface can be inverted"
            )));
        }
    };

    let flat = flat_slopes(tree, var, increasing)?;
    for node in tree.nodes_mut() {
        let region = node.region;
        match &mut node.kind {
            NodeKind::Selector(s) => {
                // y = MAX(f, g) increasing in x  <=>  x = MIN(f⁻¹, g⁻¹)
                if increasing {
                    s.kind = match s.kind {
                        MinMaxKind::Min => MinMaxKind::Max,
                        MinMaxKind::Max => MinMaxKind::Min,
                    };
                }
                // routing geometry lives in the old input space
                s.normal.iter_mut().for_each(|n| *n = 0.0);
                s.threshold = 0.0;
                s.half_width = None;
            }
            NodeKind::Leaf(leaf) => {
                let w = if leaf.weights[var] != 0.0 {
                    leaf.weights[var]
                } else if let Some(&w) = flat.get(region) {
                    w
                } else {
                    continue;
                };
                let factor = OUTPUT_WEIGHT / w;
                leaf.weights.iter_mut().for_each(|wi| *wi *= factor);
                leaf.weights[var] = OUTPUT_WEIGHT;
                leaf.recenter_bias(var);
            }
        }
    }

    for region in tree.regions_mut() {
        region.repin_output(var, INVERTED_WEIGHT_BOUND);
    }
    tree.set_output_index(var);
    debug!("inverted tree on variable {var} ({mono}), old output {old}");
    Ok(mono)
}

/// Per-region slope given to pieces flat in `var`; empty when no piece is.
fn flat_slopes(tree: &Tree, var: usize, increasing: bool) -> AlnResult<Vec<f64>> {
    let any_flat = tree
        .leaf_ids()
        .into_iter()
        .filter_map(|id| tree.leaf(id))
        .any(|l| l.weights[var] == 0.0);
    if !any_flat {
        return Ok(Vec::new());
    }

    let range = tree
        .constraint(0, var)
        .map_or(f64::INFINITY, |c| c.max() - c.min());
    if !(range.is_finite() && range > 0.0) {
        return Err(AlnError::invalid(format!(
            "a piece is flat in variable {var}; set finite min and max bounds on it to invert"
        )));
    }
    let sign = if increasing { 1.0 } else { -1.0 };
    let output = tree.output_index();
    Ok((0..tree.regions().len())
        .map(|r| {
            let eps = tree
                .constraint(r, output)
                .map_or(DEFAULT_EPSILON, VarConstraint::epsilon);
            sign * eps / range
        })
        .collect())
}
