pub mod f_table;
mod split_controller;

pub use f_table::FTable;
pub use split_controller::{SplitConfig, SplitController, SplitReport};
