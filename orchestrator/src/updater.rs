use std::{num::NonZeroUsize, sync::Arc};

use log::{debug, info, warn};
use machine_learning::{
    batching::{
        Capacity, Minibatch, SplitPoints, SubBatch, materialize, normalized_weights, split_into_n,
        split_to_capacity,
    },
    params::{Evaluation, ParamArena},
};
use parameter_server::{
    Applied, GradientAccumulator, ParameterStore, optimization::Optimizer,
};
use rayon::prelude::*;
use worker::Worker;

use crate::{
    config::{ConfigErr, UpdaterConfig},
    error::UpdateErr,
    summary::SummarySink,
};

type Result<T> = std::result::Result<T, UpdateErr>;

/// Drives whole model updates: splits each minibatch among the workers, runs
/// the rounds, and applies the combined gradient to the parameter store.
pub struct ModelUpdater<W: Worker, O: Optimizer> {
    config: UpdaterConfig,
    capacity: Option<Capacity>,
    workers: Vec<W>,
    store: Arc<ParameterStore<O>>,
    accumulator: GradientAccumulator,
    summary: Option<Box<dyn SummarySink>>,
}

impl<W, O> ModelUpdater<W, O>
where
    W: Worker + Send,
    O: Optimizer + Send,
{
    /// Creates a new `ModelUpdater`.
    ///
    /// # Arguments
    /// * `config` - How to split minibatches and combine gradients.
    /// * `workers` - The workers, one sub-batch is dispatched to each of them per round.
    /// * `store` - The store holding the parameters the workers evaluate.
    ///
    /// # Returns
    /// A new `ModelUpdater` or an error if the config is invalid or there are no workers.
    pub fn new(config: UpdaterConfig, workers: Vec<W>, store: Arc<ParameterStore<O>>) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity()?;

        if workers.is_empty() {
            return Err(ConfigErr::Invalid("at least one worker is required".to_string()).into());
        }

        let accumulator = GradientAccumulator::new(&store.read(), config.clip_norm);

        Ok(Self {
            config,
            capacity,
            workers,
            store,
            accumulator,
            summary: None,
        })
    }

    /// Sets where the summaries are written when an update requests them.
    pub fn with_summary_sink(mut self, sink: impl SummarySink + 'static) -> Self {
        self.summary = Some(Box::new(sink));
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn workers(&self) -> &[W] {
        &self.workers
    }

    pub fn store(&self) -> &Arc<ParameterStore<O>> {
        &self.store
    }

    pub fn accumulator(&self) -> &GradientAccumulator {
        &self.accumulator
    }

    /// Runs one full update over `minibatch`.
    ///
    /// # Arguments
    /// * `minibatch` - The examples to train on.
    /// * `write_summary` - Whether to write the loss and the new global step to the summary sink.
    ///
    /// # Returns
    /// The sum of the per sentence losses of the minibatch, or an error if the
    /// update was aborted before reaching the store. The accumulator is always
    /// left reset. A failing summary write doesn't undo an applied update, it's
    /// only logged.
    pub fn update(&mut self, minibatch: &Minibatch, write_summary: bool) -> Result<f32> {
        if write_summary && self.summary.is_none() {
            return Err(UpdateErr::MissingSummarySink);
        }

        let applied = match self.run_cycle(minibatch) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(
                    "aborted update while {}, resetting accumulator: {e}",
                    self.accumulator.phase()
                );
                self.accumulator.reset();
                return Err(e);
            }
        };

        self.accumulator.reset();

        if write_summary && let Some(sink) = self.summary.as_mut() {
            let scalars = [
                ("mean_cost", applied.loss as f64),
                ("t", applied.global_step as f64),
            ];

            if let Err(e) = sink.write_scalars(applied.global_step, &scalars) {
                warn!("can't write the summary of step {}: {e}", applied.global_step);
            }
        }

        Ok(applied.loss * minibatch.examples() as f32)
    }

    fn run_cycle(&mut self, minibatch: &Minibatch) -> Result<Applied> {
        let worker_count = self.worker_count();
        let split_points = self.split_points(minibatch, worker_count)?;
        let sub_batches = materialize(minibatch, &split_points, worker_count);

        assert!(
            sub_batches.len() % worker_count.get() == 0,
            "{} sub-batches can't be dispatched in rounds of {worker_count}",
            sub_batches.len()
        );

        let weights = normalized_weights(&sub_batches)?;

        for (round, (batches, weights)) in sub_batches
            .chunks(worker_count.get())
            .zip(weights.chunks(worker_count.get()))
            .enumerate()
        {
            debug!(round = round, sub_batches = batches.len(); "dispatching round");
            let evaluations = self.run_round(batches, weights)?;
            self.accumulator.accumulate(&evaluations, weights)?;
        }

        let applied = self
            .accumulator
            .apply(self.store.as_ref(), self.store.global_step())?;

        info!(
            global_step = applied.global_step,
            loss = applied.loss,
            grad_norm = applied.grad_norm;
            "applied update"
        );

        Ok(applied)
    }

    /// Evaluates one sub-batch per worker in parallel, returning once every
    /// worker is done.
    fn run_round(
        &mut self,
        batches: &[SubBatch],
        weights: &[f32],
    ) -> Result<Vec<Evaluation>> {
        let guard = self.store.read();
        let params: &ParamArena = &guard;

        self.workers
            .par_iter_mut()
            .zip(batches)
            .zip(weights)
            .enumerate()
            .map(|(worker_id, ((worker, batch), &weight))| {
                worker
                    .evaluate(params, batch, weight)
                    .map_err(|source| UpdateErr::Worker { worker_id, source })
            })
            .collect()
    }

    fn split_points(&self, minibatch: &Minibatch, worker_count: NonZeroUsize) -> Result<SplitPoints> {
        let source_lengths = minibatch.source_lengths();
        let target_lengths = minibatch.target_lengths();

        let split_points = match self.capacity {
            Some(capacity) => {
                debug!("splitting by capacity: {capacity:?}");
                split_to_capacity(&source_lengths, &target_lengths, capacity)?
            }
            None => {
                let n = worker_count.saturating_mul(self.config.aggregation_steps);
                debug!(n = n.get(); "splitting by count");
                split_into_n(&source_lengths, &target_lengths, n)?
            }
        };

        Ok(split_points)
    }

    fn worker_count(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.workers.len()).unwrap_or(NonZeroUsize::MIN)
    }
}
