pub mod aln;
pub mod buffer;
pub mod core;
pub mod persist;
pub mod streams;
pub mod training;
pub mod ui;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use aln::{Aln, MinMaxKind, NodeId};
pub use buffer::ErrorMode;
pub use crate::core::{AlnError, AlnResult, BoundKind};
pub use training::{TrainConfig, TrainReport, TrainStatus};
