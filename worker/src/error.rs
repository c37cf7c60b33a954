use std::{error::Error, fmt};

use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Sub-batch evaluation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerErr {
    Ml(MlErr),
    /// The model replica failed to compute the loss or its gradient.
    Replica(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Ml(e) => write!(f, "ml error: {e}"),
            WorkerErr::Replica(e) => write!(f, "replica error: {e}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}
