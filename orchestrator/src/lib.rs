pub mod config;
pub mod error;
pub mod summary;
mod updater;

pub use config::{ConfigErr, OptimizerConfig, UpdaterConfig};
pub use error::UpdateErr;
pub use summary::{JsonLinesSink, LogSink, SummarySink};
pub use updater::ModelUpdater;
