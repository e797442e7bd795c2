use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::aln::node::{LinearLeaf, MinMaxKind, Node, NodeId, NodeKind, Selector, SplitStats};
use crate::core::constraint::{BoundKind, OUTPUT_WEIGHT, Region, VarConstraint};
use crate::core::error::{AlnError, AlnResult};

const INIT_WEIGHT_SPREAD: f64 = 1.0e-5;

/// Arena of MIN/MAX selectors and linear leaves. Nodes are never removed, so a
/// `NodeId` stays valid for the life of the tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    dim: usize,
    output: usize,
    root: NodeId,
    nodes: Vec<Node>,
    regions: Vec<Region>,
}

impl Tree {
    /// A single growable leaf representing the constant 0 surface.
    pub fn new(dim: usize, output: usize) -> AlnResult<Self> {
        if dim < 2 {
            return Err(AlnError::invalid(format!(
                "dimension must be at least 2 (one input and the output), got {dim}"
            )));
        }
        if output >= dim {
            return Err(AlnError::invalid(format!(
                "output index {output} out of range 0..{dim}"
            )));
        }

        let region = Region::new(dim, output, None);
        let sq_eps = region
            .constraint(output)
            .map(VarConstraint::sq_epsilon)
            .unwrap_or_default();
        let leaf = LinearLeaf::new(dim, output, sq_eps);

        Ok(Self {
            dim,
            output,
            root: NodeId(0),
            nodes: vec![Node::new(None, 0, NodeKind::Leaf(leaf))],
            regions: vec![region],
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn output_index(&self) -> usize {
        self.output
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn leaf(&self, id: NodeId) -> Option<&LinearLeaf> {
        self.node(id).and_then(Node::as_leaf)
    }

    pub fn selector(&self, id: NodeId) -> Option<&Selector> {
        self.node(id).and_then(Node::as_selector)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Constraint for `var` in `region`, walking up to parent regions when the
    /// region itself does not carry one.
    pub fn constraint(&self, region: usize, var: usize) -> Option<&VarConstraint> {
        let mut current = Some(region);
        while let Some(r) = current {
            let reg = self.regions.get(r)?;
            if let Some(c) = reg.constraint(var) {
                return Some(c);
            }
            current = reg.parent();
        }
        None
    }

    /// Leaves in left-to-right order.
    pub fn leaf_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match &self.nodes[id.0].kind {
                NodeKind::Leaf(_) => out.push(id),
                NodeKind::Selector(s) => {
                    stack.push(s.children[1]);
                    stack.push(s.children[0]);
                }
            }
        }
        out
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn depth(&self) -> usize {
        fn go(tree: &Tree, id: NodeId) -> usize {
            match &tree.nodes[id.0].kind {
                NodeKind::Leaf(_) => 1,
                NodeKind::Selector(s) => 1 + go(tree, s.children[0]).max(go(tree, s.children[1])),
            }
        }
        go(self, self.root)
    }

    pub fn add_region(&mut self, parent: usize, learn_factor: f64) -> AlnResult<usize> {
        let base = self
            .regions
            .get(parent)
            .ok_or_else(|| AlnError::invalid(format!("unknown region {parent}")))?;
        let mut region = base.clone().with_parent(parent);
        region.set_learn_factor(learn_factor)?;
        self.regions.push(region);
        Ok(self.regions.len() - 1)
    }

    /// Moves `node` and its whole subtree into `region`.
    pub fn assign_region(&mut self, node: NodeId, region: usize) -> AlnResult<()> {
        self.check_node(node)?;
        if region >= self.regions.len() {
            return Err(AlnError::invalid(format!("unknown region {region}")));
        }
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let n = &mut self.nodes[id.0];
            n.region = region;
            if let NodeKind::Selector(s) = &n.kind {
                stack.extend(s.children);
            }
        }
        self.clamp_region_weights(region);
        Ok(())
    }

    pub fn set_bound(
        &mut self,
        var: usize,
        region: usize,
        kind: BoundKind,
        value: f64,
    ) -> AlnResult<()> {
        let output = self.output;
        let reg = self
            .regions
            .get_mut(region)
            .ok_or_else(|| AlnError::invalid(format!("unknown region {region}")))?;
        reg.set_bound(var, output, kind, value)?;
        if matches!(kind, BoundKind::WeightMin | BoundKind::WeightMax) {
            self.clamp_region_weights(region);
        }
        Ok(())
    }

    pub fn set_growable(&mut self, node: NodeId, growable: bool) -> AlnResult<()> {
        self.leaf_mut(node)?.growable = growable;
        Ok(())
    }

    pub fn set_constant(&mut self, node: NodeId, constant: bool) -> AlnResult<()> {
        self.leaf_mut(node)?.constant = constant;
        Ok(())
    }

    /// Replaces the leaf `node` by selectors of `kind` over `count` copies of
    /// it. More than two children become a right-leaning chain of binary
    /// selectors. Returns the new leaves, left to right.
    pub fn add_children(
        &mut self,
        node: NodeId,
        kind: MinMaxKind,
        count: usize,
    ) -> AlnResult<Vec<NodeId>> {
        if count < 2 {
            return Err(AlnError::invalid(format!(
                "a selector needs at least 2 children, got {count}"
            )));
        }
        self.leaf_mut(node)?;

        let mut leaves = Vec::with_capacity(count);
        let mut current = node;
        for remaining in (2..=count).rev() {
            let [left, right] = self.split_leaf(current, kind)?;
            leaves.push(left);
            if remaining == 2 {
                leaves.push(right);
            }
            current = right;
        }
        Ok(leaves)
    }

    /// Turns a leaf into a selector with two fresh copies of the leaf.
    pub(crate) fn split_leaf(&mut self, id: NodeId, kind: MinMaxKind) -> AlnResult<[NodeId; 2]> {
        let (template, region) = {
            let node = self
                .nodes
                .get(id.0)
                .ok_or_else(|| AlnError::invalid(format!("unknown node {}", id.0)))?;
            match &node.kind {
                NodeKind::Leaf(l) => (l.fresh_copy(), node.region),
                NodeKind::Selector(_) => {
                    return Err(AlnError::invalid(format!("node {} is not a leaf", id.0)));
                }
            }
        };

        let left = NodeId(self.nodes.len());
        let right = NodeId(self.nodes.len() + 1);
        let centroid = template.centroid.clone();
        self.nodes.push(Node::new(
            Some(id),
            region,
            NodeKind::Leaf(template.clone()),
        ));
        self.nodes
            .push(Node::new(Some(id), region, NodeKind::Leaf(template)));
        self.nodes[id.0].kind = NodeKind::Selector(Selector::new(kind, [left, right], centroid));
        debug_assert!(
            [left, right]
                .iter()
                .all(|c| self.nodes[c.0].parent == Some(id) && self.nodes[c.0].is_leaf())
        );
        Ok([left, right])
    }

    /// Pins output weights and gives any uninitialised leaf tiny random
    /// weights with its centroid at `x`.
    pub(crate) fn initialize_leaves<R: Rng + ?Sized>(&mut self, x: &[f64], rng: &mut R) {
        let output = self.output;
        for r in self.regions.iter_mut() {
            r.prepare(output);
        }
        let Tree { nodes, regions, .. } = self;
        for node in nodes.iter_mut() {
            let region = &regions[node.region];
            let NodeKind::Leaf(leaf) = &mut node.kind else {
                continue;
            };
            leaf.weights[output] = OUTPUT_WEIGHT;
            if leaf.initialized {
                continue;
            }
            for (i, c) in region.constraints().iter().enumerate() {
                if i == output {
                    leaf.variance[i] = c.sq_epsilon();
                    continue;
                }
                let w = rng.random_range(-INIT_WEIGHT_SPREAD..=INIT_WEIGHT_SPREAD);
                leaf.weights[i] = c.clamp_weight(w);
                leaf.variance[i] = c.sq_epsilon();
            }
            leaf.centroid.copy_from_slice(x);
            leaf.recenter_bias(output);
            leaf.initialized = true;
        }
    }

    /// Rolls activation counters into the last-epoch slot and clears the
    /// per-epoch adapt statistics.
    pub(crate) fn begin_epoch(&mut self) {
        for node in self.nodes.iter_mut() {
            node.activations_last_epoch = node.activations;
            node.activations = 0;
            if let NodeKind::Leaf(l) = &mut node.kind {
                l.stats.clear_adapt();
            }
        }
    }

    #[inline]
    pub(crate) fn node_ref(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub(crate) fn nodes_and_regions(&mut self) -> (&mut [Node], &[Region]) {
        (&mut self.nodes, &self.regions)
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub(crate) fn regions_mut(&mut self) -> &mut [Region] {
        &mut self.regions
    }

    pub(crate) fn set_output_index(&mut self, output: usize) {
        debug_assert!(output < self.dim);
        self.output = output;
    }

    pub(crate) fn leaf_mut(&mut self, id: NodeId) -> AlnResult<&mut LinearLeaf> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Leaf(l)) => Ok(l),
            Some(NodeKind::Selector(_)) => {
                Err(AlnError::invalid(format!("node {} is not a leaf", id.0)))
            }
            None => Err(AlnError::invalid(format!("unknown node {}", id.0))),
        }
    }

    #[cfg(test)]
    pub(crate) fn selector_mut(&mut self, id: NodeId) -> Option<&mut Selector> {
        match &mut self.nodes.get_mut(id.0)?.kind {
            NodeKind::Selector(s) => Some(s),
            NodeKind::Leaf(_) => None,
        }
    }

    fn check_node(&self, id: NodeId) -> AlnResult<()> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(AlnError::invalid(format!("unknown node {}", id.0)))
        }
    }

    fn clamp_region_weights(&mut self, region: usize) {
        let output = self.output;
        let Tree { nodes, regions, .. } = self;
        let reg = &regions[region];
        for node in nodes.iter_mut().filter(|n| n.region == region) {
            if let NodeKind::Leaf(leaf) = &mut node.kind {
                for (i, c) in reg.constraints().iter().enumerate() {
                    if i != output {
                        leaf.weights[i] = c.clamp_weight(leaf.weights[i]);
                    }
                }
                if leaf.initialized {
                    leaf.recenter_bias(output);
                }
            }
        }
    }

    /// Checks arena links of a tree built elsewhere and resets per-pass state.
    pub(crate) fn validate_and_reset(&mut self) -> AlnResult<()> {
        let corrupt = |msg: String| AlnError::Generic(format!("corrupt tree: {msg}"));

        if self.dim < 2 || self.output >= self.dim {
            return Err(corrupt(format!(
                "dimension {} with output {}",
                self.dim, self.output
            )));
        }
        if self.regions.is_empty() {
            return Err(corrupt("no regions".into()));
        }
        for (i, r) in self.regions.iter().enumerate() {
            if r.constraints().len() != self.dim {
                return Err(corrupt(format!(
                    "region {i} has {} constraints for dimension {}",
                    r.constraints().len(),
                    self.dim
                )));
            }
            // regions are only ever added below an existing one
            if r.parent().is_some_and(|p| p >= i) {
                return Err(corrupt(format!("region {i} has parent out of order")));
            }
            if !(r.learn_factor() > 0.0 && r.learn_factor().is_finite()) {
                return Err(corrupt(format!("region {i} has a bad learn factor")));
            }
            let bad_constraint = r.constraints().iter().any(|c| {
                !(c.epsilon() > 0.0 && c.epsilon().is_finite()) || c.weight_min() > c.weight_max()
            });
            if bad_constraint {
                return Err(corrupt(format!("region {i} has an inconsistent constraint")));
            }
        }
        let root = self
            .nodes
            .get(self.root.0)
            .ok_or_else(|| corrupt(format!("root {} out of range", self.root.0)))?;
        if root.parent.is_some() {
            return Err(corrupt("root has a parent".into()));
        }

        let n = self.nodes.len();
        let mut seen = vec![false; n];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                return Err(corrupt(format!("node {} reachable twice", id.0)));
            }
            let node = &self.nodes[id.0];
            if node.region >= self.regions.len() {
                return Err(corrupt(format!("node {} has unknown region", id.0)));
            }
            match &node.kind {
                NodeKind::Leaf(l) => {
                    if l.weights.len() != self.dim
                        || l.centroid.len() != self.dim
                        || l.variance.len() != self.dim
                    {
                        return Err(corrupt(format!("leaf {} has wrong arity", id.0)));
                    }
                    if l.weights[self.output] != OUTPUT_WEIGHT {
                        return Err(corrupt(format!("leaf {} output weight is not -1", id.0)));
                    }
                }
                NodeKind::Selector(s) => {
                    if s.normal.len() != self.dim
                        || s.centroid.len() != self.dim
                        || s.half_width.as_ref().is_some_and(|hw| hw.len() != self.dim)
                    {
                        return Err(corrupt(format!("selector {} has wrong arity", id.0)));
                    }
                    for c in s.children {
                        let child = self
                            .nodes
                            .get(c.0)
                            .ok_or_else(|| corrupt(format!("child {} out of range", c.0)))?;
                        if child.parent != Some(id) {
                            return Err(corrupt(format!("child {} has wrong parent", c.0)));
                        }
                        stack.push(c);
                    }
                }
            }
        }
        if seen.iter().any(|s| !s) {
            return Err(corrupt("unreachable nodes".into()));
        }

        let dim = self.dim;
        for node in self.nodes.iter_mut() {
            node.evaluated = false;
            node.activations = 0;
            node.activations_last_epoch = 0;
            match &mut node.kind {
                NodeKind::Leaf(l) => l.stats = SplitStats::new(dim),
                NodeKind::Selector(s) => {
                    s.active = 0;
                    s.active_responsibility = 1.0;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn construct_validates_dimensions() {
        assert!(matches!(Tree::new(1, 0), Err(AlnError::InvalidArgument(_))));
        assert!(matches!(Tree::new(3, 3), Err(AlnError::InvalidArgument(_))));
        let t = Tree::new(2, 1).unwrap();
        assert_eq!(t.leaf_count(), 1);
        assert_eq!(t.depth(), 1);
        let leaf = t.leaf(t.root()).unwrap();
        assert!(leaf.is_growable());
        assert!(!leaf.is_initialized());
        assert_eq!(leaf.weights(), &[0.0, -1.0]);
    }

    #[test]
    fn add_children_links_new_leaves() {
        let mut t = Tree::new(2, 1).unwrap();
        let kids = t.add_children(t.root(), MinMaxKind::Max, 2).unwrap();
        assert_eq!(kids.len(), 2);
        let sel = t.selector(t.root()).unwrap();
        assert_eq!(sel.kind(), MinMaxKind::Max);
        assert_eq!(sel.children(), [kids[0], kids[1]]);
        for k in &kids {
            assert_eq!(t.node(*k).unwrap().parent(), Some(t.root()));
            assert!(t.leaf(*k).is_some());
        }
        assert_eq!(t.leaf_ids(), kids);
    }

    #[test]
    fn add_three_children_builds_chain() {
        let mut t = Tree::new(3, 2).unwrap();
        let kids = t.add_children(t.root(), MinMaxKind::Min, 3).unwrap();
        assert_eq!(kids.len(), 3);
        assert_eq!(t.leaf_count(), 3);
        assert_eq!(t.depth(), 3);
        assert_eq!(t.leaf_ids(), kids);
        assert!(t.add_children(t.root(), MinMaxKind::Min, 2).is_err());
        assert!(t.add_children(kids[0], MinMaxKind::Min, 1).is_err());
    }

    #[test]
    fn initialize_places_centroid_and_small_weights() {
        let mut t = Tree::new(3, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        t.initialize_leaves(&[0.5, -0.25, 2.0], &mut rng);
        let leaf = t.leaf(t.root()).unwrap();
        assert!(leaf.is_initialized());
        assert_eq!(leaf.centroid(), &[0.5, -0.25, 2.0]);
        assert_eq!(leaf.weights()[2], -1.0);
        for w in &leaf.weights()[..2] {
            assert!(w.abs() <= INIT_WEIGHT_SPREAD);
        }
        let mut x = vec![0.5, -0.25, 0.0];
        assert!((leaf.value(&x) - 2.0).abs() < 1e-12);
        x[2] = 2.0;
        assert!(leaf.value(&x).abs() < 1e-12);
    }

    #[test]
    fn weight_bounds_clamp_existing_leaves() {
        let mut t = Tree::new(2, 1).unwrap();
        t.leaf_mut(t.root()).unwrap().weights[0] = 5.0;
        t.set_bound(0, 0, BoundKind::WeightMax, 2.0).unwrap();
        assert_eq!(t.leaf(t.root()).unwrap().weights()[0], 2.0);
        assert!(t.set_bound(1, 0, BoundKind::WeightMin, -3.0).is_err());
        assert!(t.set_bound(0, 4, BoundKind::Max, 1.0).is_err());
    }

    #[test]
    fn regions_inherit_and_move_subtrees() {
        let mut t = Tree::new(2, 1).unwrap();
        t.set_bound(0, 0, BoundKind::Epsilon, 0.1).unwrap();
        let r = t.add_region(0, 0.5).unwrap();
        assert_eq!(t.regions()[r].parent(), Some(0));
        assert_eq!(t.regions()[r].learn_factor(), 0.5);
        assert_eq!(t.constraint(r, 0).unwrap().epsilon(), 0.1);

        let kids = t.add_children(t.root(), MinMaxKind::Min, 2).unwrap();
        t.assign_region(kids[1], r).unwrap();
        assert_eq!(t.node(kids[1]).unwrap().region(), r);
        assert_eq!(t.node(kids[0]).unwrap().region(), 0);
        assert!(t.add_region(9, 1.0).is_err());
        assert!(t.add_region(0, 0.0).is_err());
    }

    #[test]
    fn begin_epoch_rolls_activations() {
        let mut t = Tree::new(2, 1).unwrap();
        let root = t.root();
        t.node_mut(root).activations = 4;
        t.begin_epoch();
        assert_eq!(t.node(root).unwrap().recent_activations(), 4);
        t.begin_epoch();
        assert_eq!(t.node(root).unwrap().recent_activations(), 0);
    }

    #[test]
    fn validate_catches_broken_links() {
        let mut t = Tree::new(2, 1).unwrap();
        let kids = t.add_children(t.root(), MinMaxKind::Max, 2).unwrap();
        let mut ok = t.clone();
        assert!(ok.validate_and_reset().is_ok());

        t.node_mut(kids[1]).parent = Some(kids[0]);
        assert!(matches!(t.validate_and_reset(), Err(AlnError::Generic(_))));
    }
}
