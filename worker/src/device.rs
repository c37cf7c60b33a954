use std::sync::Arc;

use log::trace;
use machine_learning::{
    MlErr,
    batching::SubBatch,
    loss::LossMode,
    params::{Evaluation, ParamArena},
    regularization::Regularizer,
};

use crate::{
    error::Result,
    replica::Replica,
    worker::Worker,
};

/// A worker driving a single model replica.
///
/// Reduces the replica's summed loss according to the loss mode and adds the
/// regularization penalties before handing the evaluation back.
pub struct DeviceWorker<R: Replica> {
    worker_id: usize,
    replica: R,
    loss_mode: LossMode,
    regularizer: Arc<Regularizer>,
}

impl<R: Replica> DeviceWorker<R> {
    /// Creates a new `DeviceWorker`.
    ///
    /// # Arguments
    /// * `worker_id` - Identifier used for observability.
    /// * `replica` - The model replica.
    /// * `loss_mode` - How the per sentence losses are reduced.
    /// * `regularizer` - The penalties shared by every worker.
    ///
    /// # Returns
    /// A new `DeviceWorker` instance.
    pub fn new(
        worker_id: usize,
        replica: R,
        loss_mode: LossMode,
        regularizer: Arc<Regularizer>,
    ) -> Self {
        Self {
            worker_id,
            replica,
            loss_mode,
            regularizer,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn replica(&self) -> &R {
        &self.replica
    }
}

impl<R: Replica> Worker for DeviceWorker<R> {
    fn evaluate(&mut self, params: &ParamArena, batch: &SubBatch, weight: f32) -> Result<Evaluation> {
        // a sub-batch without target tokens keeps its summed loss as is.
        let denominator = self.loss_mode.denominator(batch).max(1);

        let mut eval = self.replica.forward_backward(params, batch)?;

        if eval.grads.len() != params.len() {
            return Err(MlErr::SizeMismatch {
                a: "gradient map",
                b: "parameters",
                got: eval.grads.len(),
                expected: params.len(),
            }
            .into());
        }

        let scale = 1. / denominator as f32;
        eval.loss *= scale;
        eval.grads.scale(scale);

        if self.regularizer.is_active() {
            self.regularizer.apply(params, &mut eval)?;
        }

        trace!(
            worker_id = self.worker_id,
            examples = batch.len(),
            dummy = batch.is_dummy(),
            weight = weight,
            loss = eval.loss;
            "evaluated sub-batch"
        );

        Ok(eval)
    }
}
