use std::{
    error::Error,
    fmt::{self, Display},
};

use machine_learning::MlErr;

use super::Phase;

/// The result type used across the storage module.
pub type Result<T> = std::result::Result<T, StorageErr>;

/// Error returned by the accumulator, the parameter store and the optimizers.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageErr {
    /// A buffer doesn't match the size of the thing it's being applied to.
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// An accumulator operation was called out of the `reset → accumulate → apply` cycle.
    OutOfOrder { op: &'static str, phase: Phase },
    Ml(MlErr),
}

impl From<MlErr> for StorageErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl Display for StorageErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "The size of {what} is {got} but {expected} was expected"
            ),
            StorageErr::OutOfOrder { op, phase } => write!(
                f,
                "Can't {op} while the accumulator is {phase}, the cycle is reset → accumulate → apply"
            ),
            StorageErr::Ml(e) => write!(f, "{e}"),
        }
    }
}

impl Error for StorageErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}
