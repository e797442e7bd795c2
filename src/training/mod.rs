pub mod config;
pub mod learning_curve;
pub mod notification;
mod trainer;

pub use config::TrainConfig;
pub use learning_curve::{CurveFormat, LearningCurve};
pub use notification::{
    AdaptInfo, EpochInfo, EventKind, NoopObserver, NotifyMask, TrainEvent, TrainInfo,
    TrainObserver,
};
pub use trainer::{TrainReport, TrainStatus, Trainer};
