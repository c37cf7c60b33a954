mod accumulator;
mod error;
mod store;

pub use accumulator::{Applied, GradientAccumulator, Phase, global_norm};
pub use error::{Result, StorageErr};
pub use store::{ParameterStore, Store};
