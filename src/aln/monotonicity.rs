use serde::Serialize;
use strum_macros::Display;

use crate::aln::node::{NodeId, NodeKind};
use crate::aln::tree::Tree;
use crate::core::error::{AlnError, AlnResult};

/// How the tree's output responds to one input variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
pub enum Monotonicity {
    /// every piece ignores the variable
    Constant,
    StrongInc,
    StrongDec,
    /// increasing in some pieces, flat in others
    WeakInc,
    WeakDec,
    /// pieces disagree in sign
    Free,
}

impl Monotonicity {
    fn of_weight(w: f64) -> Self {
        if w < 0.0 {
            Monotonicity::StrongDec
        } else if w > 0.0 {
            Monotonicity::StrongInc
        } else {
            Monotonicity::Constant
        }
    }

    /// Monotonicity of a MIN or MAX over two pieces.
    pub fn combine(self, other: Self) -> Self {
        use Monotonicity::*;
        match (self, other) {
            (Free, _) | (_, Free) => Free,
            (a, b) if a == b => a,
            (Constant, WeakInc | StrongInc) | (WeakInc | StrongInc, Constant) => WeakInc,
            (Constant, WeakDec | StrongDec) | (WeakDec | StrongDec, Constant) => WeakDec,
            (WeakInc, StrongInc) | (StrongInc, WeakInc) => WeakInc,
            (WeakDec, StrongDec) | (StrongDec, WeakDec) => WeakDec,
            _ => Free,
        }
    }
}

pub fn var_monotonicity(tree: &Tree, var: usize) -> AlnResult<Monotonicity> {
    if var >= tree.dimension() {
        return Err(AlnError::invalid(format!(
            "variable {var} out of range 0..{}",
            tree.dimension()
        )));
    }
    Ok(subtree(tree, tree.root(), var))
}

fn subtree(tree: &Tree, id: NodeId, var: usize) -> Monotonicity {
    match &tree.node_ref(id).kind {
        NodeKind::Leaf(l) => Monotonicity::of_weight(l.weights[var]),
        NodeKind::Selector(s) => {
            let first = subtree(tree, s.children[0], var);
            if first == Monotonicity::Free {
                return first;
            }
            first.combine(subtree(tree, s.children[1], var))
        }
    }
}
