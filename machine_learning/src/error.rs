use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    EmptyMinibatch,
    InvalidMask {
        which: &'static str,
        example: usize,
    },
    CapacityLimits {
        max_examples: usize,
        max_tokens: usize,
    },
    ZeroTotalWeight,
    UnknownParam {
        id: usize,
        len: usize,
    },
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "The shape of {what} is {got:?} but {expected:?} was expected"
            ),
            MlErr::EmptyMinibatch => write!(f, "The minibatch doesn't contain any example"),
            MlErr::InvalidMask { which, example } => write!(
                f,
                "The {which} mask of example {example} must be made of 1s followed by 0s"
            ),
            MlErr::CapacityLimits {
                max_examples,
                max_tokens,
            } => write!(
                f,
                "Exactly one capacity limit must be set, got max_examples={max_examples} and max_tokens={max_tokens}"
            ),
            MlErr::ZeroTotalWeight => write!(
                f,
                "The sub-batch weights add up to zero, they can't be normalized"
            ),
            MlErr::UnknownParam { id, len } => write!(
                f,
                "There's no parameter with id {id}, the arena holds {len} parameters"
            ),
        }
    }
}

impl Error for MlErr {}
