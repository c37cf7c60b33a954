pub mod batching;
pub mod error;
pub mod loss;
pub mod params;
pub mod regularization;
mod test;

pub use error::{MlErr, Result};
