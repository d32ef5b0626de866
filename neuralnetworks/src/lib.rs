#[macro_use]
extern crate log;

mod types;
pub use types::*;

mod error;
pub use error::NetworkError;

#[cfg(feature = "neuralnetwork")]
mod model;
#[cfg(feature = "neuralnetwork")]
pub use model::*;
#[cfg(feature = "neuralnetwork")]
pub mod trainers;

pub mod af;
#[cfg(feature = "neuralnetwork")]
pub mod layers;
pub mod metrics;
pub mod optimizer;

pub(crate) mod profiling;

pub use numbers::{Device, Tensor};
