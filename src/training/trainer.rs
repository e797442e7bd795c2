use cpu_time::ThreadTime;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use strum_macros::Display;

use crate::aln::adapter::{AdaptContext, adapt};
use crate::aln::decay::decay_weights;
use crate::aln::evaluator::{Cutoff, evaluate_for_adapt};
use crate::aln::model::Aln;
use crate::aln::split::SplitController;
use crate::aln::tree::Tree;
use crate::buffer::NoiseVarianceBuffer;
use crate::core::error::{AlnError, AlnResult};
use crate::training::config::TrainConfig;
use crate::training::learning_curve::LearningCurve;
use crate::training::notification::{
    AdaptInfo, EpochInfo, TrainEvent, TrainInfo, TrainObserver,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TrainStatus {
    /// A split check found no leaf needing a split.
    Converged,
    MinErrorReached,
    EpochLimit,
    /// The observer asked to stop; the model keeps its last complete update.
    Aborted,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrainReport {
    pub status: TrainStatus,
    pub epochs: usize,
    pub rms_error: f64,
    pub leaf_count: usize,
    /// splits made during this call
    pub splits: usize,
    pub cpu_seconds: f64,
    pub curve: LearningCurve,
}

/// Runs epochs of shuffled adaptation over the buffer with periodic split
/// checks.
pub struct Trainer {
    config: TrainConfig,
    rng: StdRng,
    epochs: usize,
    curve: LearningCurve,
}

impl Trainer {
    pub fn new(config: &TrainConfig) -> AlnResult<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            rng: StdRng::seed_from_u64(config.seed),
            epochs: 0,
            curve: LearningCurve::default(),
        })
    }

    pub fn run(
        &mut self,
        aln: &mut Aln,
        observer: &mut dyn TrainObserver,
    ) -> AlnResult<TrainReport> {
        let start = ThreadTime::now();
        self.epochs = 0;
        self.curve = LearningCurve::default();

        let controller = {
            let buffer = filled_buffer(aln.buffer.as_ref())?;
            let controller = SplitController::new(buffer.mode(), self.config.split_config())?;
            let first = buffer
                .sample(0)
                .ok_or_else(|| AlnError::invalid("training buffer is empty"))?;
            aln.tree.initialize_leaves(first, &mut self.rng);
            controller
        };
        let splits_before = aln.total_splits;

        let start_info = TrainInfo {
            epochs: 0,
            rms_error: aln.rms_error()?,
            leaf_count: aln.leaf_count(),
            total_splits: aln.total_splits,
        };
        info!(
            "training: {} samples, {} leaves, rms {:.6e}",
            aln.buffer().map_or(0, NoiseVarianceBuffer::len),
            start_info.leaf_count,
            start_info.rms_error
        );

        let status = match self
            .emit(observer, TrainEvent::TrainStart(&start_info))
            .and_then(|_| self.train_epochs(aln, &controller, observer, &start))
        {
            Ok(status) => status,
            Err(AlnError::UserAbort) => TrainStatus::Aborted,
            Err(e) => return Err(e),
        };

        let end_info = TrainInfo {
            epochs: self.epochs,
            rms_error: aln.rms_error()?,
            leaf_count: aln.leaf_count(),
            total_splits: aln.total_splits,
        };
        if status != TrainStatus::Aborted
            && self.emit(observer, TrainEvent::TrainEnd(&end_info)).is_err()
        {
            debug!("observer returned false on train end");
        }
        info!(
            "training {status} after {} epochs: rms {:.6e}, {} leaves",
            end_info.epochs, end_info.rms_error, end_info.leaf_count
        );

        Ok(TrainReport {
            status,
            epochs: end_info.epochs,
            rms_error: end_info.rms_error,
            leaf_count: end_info.leaf_count,
            splits: aln.total_splits - splits_before,
            cpu_seconds: start.elapsed().as_secs_f64(),
            curve: std::mem::take(&mut self.curve),
        })
    }

    fn train_epochs(
        &mut self,
        aln: &mut Aln,
        controller: &SplitController,
        observer: &mut dyn TrainObserver,
        start: &ThreadTime,
    ) -> AlnResult<TrainStatus> {
        let Aln {
            tree,
            buffer,
            total_splits,
        } = aln;
        let buffer = filled_buffer(buffer.as_ref())?;
        let n = buffer.len();
        let mut order: Vec<usize> = (0..n).collect();
        let mut x = vec![0.0; tree.dimension()];

        for epoch in 0..self.config.max_epochs {
            tree.begin_epoch();
            let start_info = EpochInfo {
                epoch,
                rms_error: f64::NAN,
                leaf_count: tree.leaf_count(),
                active_leaves: 0,
                splits: 0,
                needing_split: None,
                cpu_seconds: start.elapsed().as_secs_f64(),
            };
            self.emit(observer, TrainEvent::EpochStart(&start_info))?;

            order.shuffle(&mut self.rng);
            let mut sq_sum = 0.0;
            for &i in &order {
                let Some(sample) = buffer.sample(i) else {
                    continue;
                };
                x.copy_from_slice(sample);
                if self.config.jitter {
                    self.jitter(tree, &mut x);
                }
                self.emit(
                    observer,
                    TrainEvent::VectorFetch {
                        epoch,
                        sample: i,
                        input: &x,
                    },
                )?;
                sq_sum += self.adapt_sample(tree, &x, epoch, i, observer)?;
            }
            let rms_error = (sq_sum / n as f64).sqrt();
            let active_leaves = tree
                .leaf_ids()
                .into_iter()
                .filter_map(|id| tree.leaf(id))
                .filter(|l| l.split_stats().adapt_hits > 0)
                .count();

            let mut splits = 0;
            let mut needing_split = None;
            if (epoch + 1) % self.config.split_interval == 0 {
                let report = controller.run(tree, buffer, *total_splits);
                splits = report.split.len();
                *total_splits += splits;
                needing_split = Some(report.needing_split);
            }
            if let Some(decay) = self.config.weight_decay {
                decay_weights(tree, decay);
            }

            let end_info = EpochInfo {
                epoch,
                rms_error,
                leaf_count: tree.leaf_count(),
                active_leaves,
                splits,
                needing_split,
                cpu_seconds: start.elapsed().as_secs_f64(),
            };
            debug!("{end_info}");
            self.curve.push(end_info.clone());
            self.epochs = epoch + 1;
            self.emit(observer, TrainEvent::EpochEnd(&end_info))?;

            if rms_error <= self.config.min_rms_error {
                return Ok(TrainStatus::MinErrorReached);
            }
            if needing_split == Some(0) {
                return Ok(TrainStatus::Converged);
            }
        }
        Ok(TrainStatus::EpochLimit)
    }

    /// Adapts to one sample; returns the squared error before the update.
    fn adapt_sample(
        &mut self,
        tree: &mut Tree,
        x: &[f64],
        epoch: usize,
        sample: usize,
        observer: &mut dyn TrainObserver,
    ) -> AlnResult<f64> {
        let output = tree.output_index();
        let root = tree.root();
        let eval = evaluate_for_adapt(tree, root, x, Cutoff::default(), self.config.eval);
        let error = eval.value;
        let useful = error.is_finite()
            && tree
                .constraint(tree.node_ref(root).region, output)
                .is_some_and(|c| c.contains(x[output]));

        let info = AdaptInfo {
            epoch,
            sample,
            input: x,
            error,
            leaf: eval.leaf,
            useful,
        };
        self.emit(observer, TrainEvent::AdaptStart(info))?;
        let ctx = AdaptContext {
            error,
            learn_rate: self.config.learn_rate,
            useful,
            starvation: self.config.starvation,
            eval: self.config.eval,
        };
        adapt(tree, x, &ctx);
        self.emit(observer, TrainEvent::AdaptEnd(info))?;
        Ok(error * error)
    }

    /// Moves every input by up to its epsilon.
    fn jitter(&mut self, tree: &Tree, x: &mut [f64]) {
        let output = tree.output_index();
        let region = tree.node_ref(tree.root()).region;
        for (i, xi) in x.iter_mut().enumerate() {
            if i == output {
                continue;
            }
            if let Some(c) = tree.constraint(region, i) {
                let eps = c.epsilon();
                *xi += self.rng.random_range(-eps..=eps);
            }
        }
    }

    fn emit(&self, observer: &mut dyn TrainObserver, event: TrainEvent<'_>) -> AlnResult<()> {
        if self.config.notify.contains(event.kind()) && !observer.notify(&event) {
            return Err(AlnError::UserAbort);
        }
        Ok(())
    }
}

fn filled_buffer(buffer: Option<&NoiseVarianceBuffer>) -> AlnResult<&NoiseVarianceBuffer> {
    buffer
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AlnError::invalid("training needs a buffer with at least one sample"))
}
