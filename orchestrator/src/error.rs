use std::{error::Error, fmt};

use machine_learning::MlErr;
use parameter_server::StorageErr;
use worker::WorkerErr;

use crate::config::ConfigErr;

/// All errors that can occur while updating the model.
#[derive(Debug)]
pub enum UpdateErr {
    /// Invalid configuration, caught before any computation.
    Config(ConfigErr),
    /// The minibatch couldn't be split or weighted.
    Ml(MlErr),
    /// The accumulator or the parameter store rejected the update.
    Storage(StorageErr),
    /// A worker failed mid round, the whole update was aborted.
    Worker { worker_id: usize, source: WorkerErr },
    /// A summary was requested but no sink was configured.
    MissingSummarySink,
}

impl fmt::Display for UpdateErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Ml(e) => write!(f, "can't prepare the minibatch: {e}"),
            Self::Storage(e) => write!(f, "can't apply the update: {e}"),
            Self::Worker { worker_id, source } => write!(f, "worker {worker_id} error: {source}"),
            Self::MissingSummarySink => write!(f, "a summary was requested without a summary sink"),
        }
    }
}

impl Error for UpdateErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Ml(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Worker { source, .. } => Some(source),
            Self::MissingSummarySink => None,
        }
    }
}

impl From<ConfigErr> for UpdateErr {
    fn from(e: ConfigErr) -> Self {
        Self::Config(e)
    }
}

impl From<MlErr> for UpdateErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<StorageErr> for UpdateErr {
    fn from(e: StorageErr) -> Self {
        Self::Storage(e)
    }
}
