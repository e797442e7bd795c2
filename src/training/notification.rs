use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, IntoStaticStr};

use crate::aln::node::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    TrainStart,
    TrainEnd,
    EpochStart,
    EpochEnd,
    AdaptStart,
    AdaptEnd,
    VectorFetch,
}

impl EventKind {
    #[inline]
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Selects which events reach the observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct NotifyMask(u8);

impl Default for NotifyMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl NotifyMask {
    pub const NONE: NotifyMask = NotifyMask(0);
    pub const ALL: NotifyMask = NotifyMask(0x7f);

    pub fn only(kinds: &[EventKind]) -> Self {
        kinds.iter().fold(Self::NONE, |m, k| m.with(*k))
    }

    pub fn with(self, kind: EventKind) -> Self {
        NotifyMask(self.0 | kind.bit())
    }

    pub fn without(self, kind: EventKind) -> Self {
        NotifyMask(self.0 & !kind.bit())
    }

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn kinds(self) -> impl Iterator<Item = EventKind> {
        EventKind::iter().filter(move |k| self.contains(*k))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainInfo {
    pub epochs: usize,
    pub rms_error: f64,
    pub leaf_count: usize,
    pub total_splits: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochInfo {
    /// zero-based epoch within this training call
    pub epoch: usize,
    /// NaN at epoch start
    pub rms_error: f64,
    pub leaf_count: usize,
    /// leaves adapted by at least one useful sample this epoch
    pub active_leaves: usize,
    pub splits: usize,
    /// present only when a split check ran this epoch
    pub needing_split: Option<usize>,
    pub cpu_seconds: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdaptInfo<'a> {
    pub epoch: usize,
    /// buffer row
    pub sample: usize,
    pub input: &'a [f64],
    /// tree value minus desired output before the update
    pub error: f64,
    pub leaf: NodeId,
    pub useful: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrainEvent<'a> {
    TrainStart(&'a TrainInfo),
    TrainEnd(&'a TrainInfo),
    EpochStart(&'a EpochInfo),
    EpochEnd(&'a EpochInfo),
    AdaptStart(AdaptInfo<'a>),
    AdaptEnd(AdaptInfo<'a>),
    VectorFetch {
        epoch: usize,
        sample: usize,
        input: &'a [f64],
    },
}

impl TrainEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            TrainEvent::TrainStart(_) => EventKind::TrainStart,
            TrainEvent::TrainEnd(_) => EventKind::TrainEnd,
            TrainEvent::EpochStart(_) => EventKind::EpochStart,
            TrainEvent::EpochEnd(_) => EventKind::EpochEnd,
            TrainEvent::AdaptStart(_) => EventKind::AdaptStart,
            TrainEvent::AdaptEnd(_) => EventKind::AdaptEnd,
            TrainEvent::VectorFetch { .. } => EventKind::VectorFetch,
        }
    }
}

/// Receives training progress. Returning `false` stops training at the next
/// sample or epoch boundary.
pub trait TrainObserver {
    fn notify(&mut self, event: &TrainEvent<'_>) -> bool;
}

impl<F> TrainObserver for F
where
    F: FnMut(&TrainEvent<'_>) -> bool,
{
    fn notify(&mut self, event: &TrainEvent<'_>) -> bool {
        self(event)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl TrainObserver for NoopObserver {
    fn notify(&mut self, _event: &TrainEvent<'_>) -> bool {
        true
    }
}
