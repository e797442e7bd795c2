use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::core::error::{AlnError, AlnResult};

pub const DEFAULT_WEIGHT_BOUND: f64 = 1.0e4;
pub const DEFAULT_EPSILON: f64 = 1.0e-3;
pub const OUTPUT_WEIGHT: f64 = -1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum BoundKind {
    WeightMin,
    WeightMax,
    Min,
    Max,
    Epsilon,
}

/// Bounds on a single variable inside a region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VarConstraint {
    min: f64,
    max: f64,
    weight_min: f64,
    weight_max: f64,
    epsilon: f64,
    sq_epsilon: f64,
}

impl Default for VarConstraint {
    fn default() -> Self {
        Self {
            min: -f64::MAX,
            max: f64::MAX,
            weight_min: -DEFAULT_WEIGHT_BOUND,
            weight_max: DEFAULT_WEIGHT_BOUND,
            epsilon: DEFAULT_EPSILON,
            sq_epsilon: DEFAULT_EPSILON * DEFAULT_EPSILON,
        }
    }
}

impl VarConstraint {
    fn for_output() -> Self {
        Self {
            weight_min: OUTPUT_WEIGHT,
            weight_max: OUTPUT_WEIGHT,
            ..Self::default()
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn weight_min(&self) -> f64 {
        self.weight_min
    }

    pub fn weight_max(&self) -> f64 {
        self.weight_max
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn sq_epsilon(&self) -> f64 {
        self.sq_epsilon
    }

    /// A weight pinned to a single value never adapts.
    pub fn is_weight_fixed(&self) -> bool {
        self.weight_min == self.weight_max
    }

    pub fn clamp_weight(&self, w: f64) -> f64 {
        w.clamp(self.weight_min, self.weight_max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn set(&mut self, kind: BoundKind, value: f64) -> AlnResult<()> {
        if value.is_nan() {
            return Err(AlnError::invalid(format!("{kind} bound cannot be NaN")));
        }
        match kind {
            BoundKind::WeightMin if value > self.weight_max => Err(AlnError::invalid(format!(
                "weight-min {value} exceeds weight-max {}",
                self.weight_max
            ))),
            BoundKind::WeightMax if value < self.weight_min => Err(AlnError::invalid(format!(
                "weight-max {value} is below weight-min {}",
                self.weight_min
            ))),
            BoundKind::Min if value > self.max => Err(AlnError::invalid(format!(
                "min {value} exceeds max {}",
                self.max
            ))),
            BoundKind::Max if value < self.min => Err(AlnError::invalid(format!(
                "max {value} is below min {}",
                self.min
            ))),
            BoundKind::Epsilon if !(value > 0.0 && value.is_finite()) => Err(AlnError::invalid(
                format!("epsilon must be positive and finite, got {value}"),
            )),
            BoundKind::WeightMin => {
                self.weight_min = value;
                Ok(())
            }
            BoundKind::WeightMax => {
                self.weight_max = value;
                Ok(())
            }
            BoundKind::Min => {
                self.min = value;
                Ok(())
            }
            BoundKind::Max => {
                self.max = value;
                Ok(())
            }
            BoundKind::Epsilon => {
                self.epsilon = value;
                self.sq_epsilon = value * value;
                Ok(())
            }
        }
    }
}

/// A group of leaves sharing one set of variable constraints and a
/// learning-rate multiplier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    parent: Option<usize>,
    learn_factor: f64,
    constraints: Vec<VarConstraint>,
}

impl Region {
    pub fn new(dim: usize, output: usize, parent: Option<usize>) -> Self {
        let constraints = (0..dim)
            .map(|i| {
                if i == output {
                    VarConstraint::for_output()
                } else {
                    VarConstraint::default()
                }
            })
            .collect();
        Self {
            parent,
            learn_factor: 1.0,
            constraints,
        }
    }

    pub(crate) fn with_parent(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn learn_factor(&self) -> f64 {
        self.learn_factor
    }

    pub fn constraint(&self, var: usize) -> Option<&VarConstraint> {
        self.constraints.get(var)
    }

    pub fn constraints(&self) -> &[VarConstraint] {
        &self.constraints
    }

    pub(crate) fn set_learn_factor(&mut self, factor: f64) -> AlnResult<()> {
        if !(factor > 0.0 && factor.is_finite()) {
            return Err(AlnError::invalid(format!(
                "learn factor must be positive and finite, got {factor}"
            )));
        }
        self.learn_factor = factor;
        Ok(())
    }

    pub(crate) fn set_bound(
        &mut self,
        var: usize,
        output: usize,
        kind: BoundKind,
        value: f64,
    ) -> AlnResult<()> {
        if var == output && matches!(kind, BoundKind::WeightMin | BoundKind::WeightMax) {
            return Err(AlnError::invalid(
                "the output variable's weight is fixed at -1",
            ));
        }
        let dim = self.constraints.len();
        let c = self
            .constraints
            .get_mut(var)
            .ok_or_else(|| AlnError::invalid(format!("variable {var} out of range 0..{dim}")))?;
        c.set(kind, value)
    }

    /// Moves the pinned output weight to `output` and opens every other weight
    /// bound to `±bound`. Value ranges and epsilons are kept.
    pub(crate) fn repin_output(&mut self, output: usize, bound: f64) {
        for (i, c) in self.constraints.iter_mut().enumerate() {
            if i == output {
                c.weight_min = OUTPUT_WEIGHT;
                c.weight_max = OUTPUT_WEIGHT;
            } else {
                c.weight_min = -bound;
                c.weight_max = bound;
            }
        }
    }

    /// Re-pins the output weight and refreshes derived squared epsilons.
    pub(crate) fn prepare(&mut self, output: usize) {
        for (i, c) in self.constraints.iter_mut().enumerate() {
            if i == output {
                c.weight_min = OUTPUT_WEIGHT;
                c.weight_max = OUTPUT_WEIGHT;
            }
            c.sq_epsilon = c.epsilon * c.epsilon;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn new_region_pins_output_weight() {
        let r = Region::new(3, 1, None);
        let out = r.constraint(1).unwrap();
        assert_eq!(out.weight_min(), -1.0);
        assert_eq!(out.weight_max(), -1.0);
        assert!(out.is_weight_fixed());

        let x = r.constraint(0).unwrap();
        assert_eq!(x.weight_min(), -DEFAULT_WEIGHT_BOUND);
        assert_eq!(x.weight_max(), DEFAULT_WEIGHT_BOUND);
        assert_eq!(x.min(), -f64::MAX);
        assert!(r.constraint(3).is_none());
    }

    #[test]
    fn weight_bounds_on_output_are_rejected() {
        let mut r = Region::new(2, 1, None);
        let err = r.set_bound(1, 1, BoundKind::WeightMin, 0.0).unwrap_err();
        assert!(matches!(err, AlnError::InvalidArgument(_)));
        assert!(r.set_bound(1, 1, BoundKind::WeightMax, 2.0).is_err());
        // value bounds on the output are fine
        r.set_bound(1, 1, BoundKind::Max, 10.0).unwrap();
        assert_eq!(r.constraint(1).unwrap().max(), 10.0);
    }

    #[test]
    fn epsilon_updates_square() {
        let mut r = Region::new(2, 1, None);
        r.set_bound(0, 1, BoundKind::Epsilon, 0.5).unwrap();
        assert_eq!(r.constraint(0).unwrap().sq_epsilon(), 0.25);
        assert!(r.set_bound(0, 1, BoundKind::Epsilon, 0.0).is_err());
        assert!(r.set_bound(0, 1, BoundKind::Epsilon, f64::NAN).is_err());
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut r = Region::new(2, 1, None);
        r.set_bound(0, 1, BoundKind::WeightMax, 1.0).unwrap();
        assert!(r.set_bound(0, 1, BoundKind::WeightMin, 2.0).is_err());
        r.set_bound(0, 1, BoundKind::WeightMin, 1.0).unwrap();
        assert!(r.constraint(0).unwrap().is_weight_fixed());
        assert!(r.set_bound(7, 1, BoundKind::Min, 0.0).is_err());
    }

    #[test]
    fn clamp_and_contains() {
        let mut r = Region::new(2, 1, None);
        r.set_bound(0, 1, BoundKind::WeightMin, -2.0).unwrap();
        r.set_bound(0, 1, BoundKind::WeightMax, 3.0).unwrap();
        let c = r.constraint(0).unwrap();
        assert_eq!(c.clamp_weight(10.0), 3.0);
        assert_eq!(c.clamp_weight(-10.0), -2.0);
        assert_eq!(c.clamp_weight(0.5), 0.5);
        assert!(c.contains(1e300));
    }

    #[test]
    fn bound_kind_parses_kebab_case() {
        assert_eq!(BoundKind::from_str("weight-min").unwrap(), BoundKind::WeightMin);
        assert_eq!(BoundKind::from_str("Epsilon").unwrap(), BoundKind::Epsilon);
        assert_eq!(BoundKind::Max.to_string(), "max");
    }

    #[test]
    fn prepare_restores_output_pin() {
        let mut r = Region::new(2, 1, None);
        r.constraints[1].weight_min = 4.0;
        r.prepare(1);
        assert_eq!(r.constraint(1).unwrap().weight_min(), -1.0);
    }
}
