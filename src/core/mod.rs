pub mod constraint;
pub mod error;

pub use constraint::{BoundKind, Region, VarConstraint};
pub use error::{AlnError, AlnResult};
