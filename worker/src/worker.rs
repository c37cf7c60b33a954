use machine_learning::{
    batching::SubBatch,
    params::{Evaluation, ParamArena},
};

use crate::error::Result;

/// A compute unit that evaluates one sub-batch at a time.
pub trait Worker {
    /// Evaluates the loss of a sub-batch and its gradient.
    ///
    /// # Arguments
    /// * `params` - The current model parameters.
    /// * `batch` - The sub-batch assigned to this worker for the round, possibly a dummy.
    /// * `weight` - The normalized weight the evaluation will be combined with.
    ///
    /// # Returns
    /// The loss and one gradient entry per parameter slot.
    fn evaluate(&mut self, params: &ParamArena, batch: &SubBatch, weight: f32) -> Result<Evaluation>;
}
