use std::{env, io, sync::Arc};

use anyhow::{Context, Result};
use log::info;
use machine_learning::params::ParamArena;
use model_updater::{BagOfTokens, SyntheticCorpus};
use orchestrator::{JsonLinesSink, ModelUpdater, OptimizerConfig, UpdaterConfig};
use parameter_server::{
    ParameterStore,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
};
use rand::{SeedableRng, rngs::StdRng};
use worker::DeviceWorker;

const DEFAULT_WORKERS: usize = 2;
const DEFAULT_UPDATES: usize = 20;

const SEED: u64 = 42;
const VOCAB: usize = 64;
const EMBEDDING_DIM: usize = 16;
const INIT_STD_DEV: f32 = 0.1;
const MAX_SENTENCE_LEN: usize = 12;
const BATCH_SIZE: usize = 32;

/// Usage: `model-updater [config.json] [workers] [updates]`
fn main() -> Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => UpdaterConfig::from_path(&path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => UpdaterConfig::default(),
    };
    let workers = parse_arg(args.next(), "workers", DEFAULT_WORKERS)?;
    let updates = parse_arg(args.next(), "updates", DEFAULT_UPDATES)?;

    info!("running {updates} updates over {workers} workers with {config:?}");

    let optimizer = config.optimizer;
    match optimizer {
        OptimizerConfig::Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } => run(config, workers, updates, |shape| {
            Adam::new(shape, learning_rate, beta1, beta2, epsilon)
        }),
        OptimizerConfig::GradientDescent { learning_rate } => {
            run(config, workers, updates, |_| GradientDescent::new(learning_rate))
        }
        OptimizerConfig::GradientDescentWithMomentum {
            learning_rate,
            momentum,
        } => run(config, workers, updates, |shape| {
            GradientDescentWithMomentum::new(shape, learning_rate, momentum)
        }),
    }
}

fn parse_arg(arg: Option<String>, name: &str, default: usize) -> Result<usize> {
    match arg {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("{name} must be a non negative integer, got {arg}")),
        None => Ok(default),
    }
}

fn run<O, F>(config: UpdaterConfig, workers: usize, updates: usize, factory: F) -> Result<()>
where
    O: Optimizer + Send,
    F: FnMut(&[usize]) -> O,
{
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut params = ParamArena::new();
    let replica = BagOfTokens::init(&mut params, VOCAB, EMBEDDING_DIM, INIT_STD_DEV, &mut rng)?;
    info!(slots = params.len(), size = params.size(); "built model");

    let regularizer = Arc::new(config.regularizer(&params));
    let loss_mode = config.loss_mode;
    let store = Arc::new(ParameterStore::new(params, factory));

    let workers = (0..workers)
        .map(|worker_id| DeviceWorker::new(worker_id, replica, loss_mode, Arc::clone(&regularizer)))
        .collect();

    let mut updater =
        ModelUpdater::new(config, workers, store)?.with_summary_sink(JsonLinesSink::new(io::stdout()));
    let mut corpus = SyntheticCorpus::new(SEED, VOCAB as u32, MAX_SENTENCE_LEN, BATCH_SIZE);

    for update in 0..updates {
        let minibatch = corpus.next_minibatch()?;
        let cost = updater.update(&minibatch, true)?;
        info!(update = update, cost = cost; "update done");
    }

    Ok(())
}
