pub mod error;
pub mod reader;
pub mod structs;

pub use reader::{GtfsData, GtfsDataSet};
