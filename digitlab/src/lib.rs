#[macro_use]
extern crate log;

mod error;
pub use error::LabError;

pub mod config;
pub use config::{LabConfig, TrainOptions};

pub mod controller;
pub use controller::*;

pub mod dataset;
pub mod explain;

pub mod preprocess;
pub use preprocess::Sample;

pub mod neuralnetworks {
    pub use ::neuralnetworks::*;
}
pub mod numbers {
    pub use ::numbers::*;
}

pub mod prelude;
