pub mod optimization;
pub mod storage;

pub use storage::{Applied, GradientAccumulator, ParameterStore, Phase, StorageErr, Store};
