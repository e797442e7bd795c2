pub mod adapter;
pub mod decay;
pub mod evaluator;
pub mod invert;
pub mod model;
pub mod monotonicity;
pub mod node;
pub mod split;
pub mod tree;

#[cfg(test)]
pub(crate) mod fixtures;

pub use decay::{WeightDecay, decay_weights};
pub use evaluator::{EvalOptions, Evaluation, evaluate, evaluate_exhaustive, evaluate_with};
pub use invert::invert;
pub use model::Aln;
pub use monotonicity::{Monotonicity, var_monotonicity};
pub use node::{LinearLeaf, MinMaxKind, Node, NodeId, NodeKind, Selector, SplitStats};
pub use tree::Tree;
