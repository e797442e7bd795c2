use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::aln::adapter::StarvationRule;
use crate::aln::decay::WeightDecay;
use crate::aln::evaluator::EvalOptions;
use crate::aln::split::SplitConfig;
use crate::core::error::{AlnError, AlnResult};
use crate::training::notification::NotifyMask;

const DEFAULT_SEED: u64 = 42;
fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_max_epochs() -> usize {
    10
}

fn default_learn_rate() -> f64 {
    0.3
}

fn default_split_interval() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TrainConfig {
    #[serde(default = "default_max_epochs")]
    #[schemars(
        title = "Max Epochs",
        description = "Passes over the buffer in one training call",
        range(min = 1)
    )]
    pub max_epochs: usize,

    #[serde(default)]
    #[schemars(
        title = "Min RMS Error",
        description = "Stop once the epoch RMS error is at or below this value"
    )]
    pub min_rms_error: f64,

    #[serde(default = "default_learn_rate")]
    #[schemars(
        title = "Learning Rate",
        description = "Step size for centroid and weight updates",
        range(min = 0.0)
    )]
    pub learn_rate: f64,

    #[serde(default)]
    #[schemars(
        title = "Jitter",
        description = "Perturb inputs by up to one epsilon per axis while adapting"
    )]
    pub jitter: bool,

    #[serde(default)]
    #[schemars(title = "Notify", description = "Bit mask of events sent to the observer")]
    pub notify: NotifyMask,

    #[serde(default = "default_split_interval")]
    #[schemars(
        title = "Split Interval",
        description = "Run the split check every N epochs",
        range(min = 1)
    )]
    pub split_interval: usize,

    #[serde(default)]
    #[schemars(
        title = "Max Splits",
        description = "Lifetime cap on leaf splits (None = unbounded)"
    )]
    pub max_splits: Option<usize>,

    #[serde(default)]
    #[schemars(title = "Classify", description = "Split leaves as soon as they have two hits")]
    pub classify: bool,

    #[serde(default)]
    #[schemars(
        title = "Convex",
        description = "With classify, always split into MIN nodes"
    )]
    pub convex: bool,

    #[serde(default)]
    #[schemars(
        title = "Weight Decay",
        description = "With classify, steepen every piece about its 0 crossing after each epoch"
    )]
    pub weight_decay: Option<WeightDecay>,

    #[serde(default)]
    pub eval: EvalOptions,

    #[serde(default)]
    pub starvation: StarvationRule,

    #[serde(default = "default_seed")]
    #[schemars(title = "Seed", description = "PRNG seed for shuffling, jitter and leaf init")]
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            max_epochs: default_max_epochs(),
            min_rms_error: 0.0,
            learn_rate: default_learn_rate(),
            jitter: false,
            notify: NotifyMask::default(),
            split_interval: default_split_interval(),
            max_splits: None,
            classify: false,
            convex: false,
            weight_decay: None,
            eval: EvalOptions::default(),
            starvation: StarvationRule::default(),
            seed: DEFAULT_SEED,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> AlnResult<()> {
        if self.max_epochs == 0 {
            return Err(AlnError::invalid("max_epochs must be > 0"));
        }
        if !(self.learn_rate > 0.0 && self.learn_rate.is_finite()) {
            return Err(AlnError::invalid(format!(
                "learn_rate must be positive and finite, got {}",
                self.learn_rate
            )));
        }
        if self.split_interval == 0 {
            return Err(AlnError::invalid("split_interval must be > 0"));
        }
        if self.min_rms_error.is_nan() || self.min_rms_error < 0.0 {
            return Err(AlnError::invalid(format!(
                "min_rms_error must be non-negative, got {}",
                self.min_rms_error
            )));
        }
        let StarvationRule {
            threshold,
            forced_responsibility,
            ..
        } = self.starvation;
        if threshold.is_nan() || !(0.0..=1.0).contains(&forced_responsibility) {
            return Err(AlnError::invalid(
                "starvation responsibility must lie in [0, 1]",
            ));
        }
        if let Some(decay) = &self.weight_decay {
            if !self.classify {
                return Err(AlnError::invalid("weight_decay only applies with classify"));
            }
            decay.validate()?;
        }
        Ok(())
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            classify: self.classify,
            convex: self.convex,
            max_splits: self.max_splits,
            eval: self.eval,
        }
    }
}
