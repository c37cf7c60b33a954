use std::{error::Error, fmt, fs, io, num::NonZeroUsize, path::Path};

use machine_learning::{
    batching::Capacity, loss::LossMode, params::ParamArena, regularization::Regularizer,
};
use serde::{Deserialize, Serialize};

/// Errors loading or validating an `UpdaterConfig`.
#[derive(Debug)]
pub enum ConfigErr {
    Io(io::Error),
    Json(serde_json::Error),
    /// The values parse but can't be used together.
    Invalid(String),
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "can't read config: {e}"),
            Self::Json(e) => write!(f, "malformed config: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for ConfigErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// The update rule applied to every parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            learning_rate: 1e-4,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<(), ConfigErr> {
        let (learning_rate, others) = match *self {
            Self::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => (learning_rate, vec![("beta1", beta1), ("beta2", beta2), ("epsilon", epsilon)]),
            Self::GradientDescent { learning_rate } => (learning_rate, vec![]),
            Self::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => (learning_rate, vec![("momentum", momentum)]),
        };

        if !(learning_rate.is_finite() && learning_rate > 0.) {
            return Err(ConfigErr::Invalid(format!(
                "learning_rate must be positive, got {learning_rate}"
            )));
        }

        for (name, value) in others {
            non_negative(name, value)?;
        }

        Ok(())
    }
}

/// Controls how a minibatch is split among the workers and how the resulting
/// gradients are combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdaterConfig {
    /// At most this many examples per sub-batch, `0` disables the limit.
    pub max_examples_per_worker: usize,
    /// At most this many padded tokens per sub-batch, `0` disables the limit.
    pub max_tokens_per_worker: usize,
    /// Sub-batches per worker and update when no capacity limit is set.
    pub aggregation_steps: NonZeroUsize,
    pub loss_mode: LossMode,
    pub l2_decay: f32,
    pub prior_l2_decay: f32,
    /// Global gradient norm threshold, `0` disables clipping.
    pub clip_norm: f32,
    pub optimizer: OptimizerConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            max_examples_per_worker: 0,
            max_tokens_per_worker: 0,
            aggregation_steps: NonZeroUsize::MIN,
            loss_mode: LossMode::default(),
            l2_decay: 0.,
            prior_l2_decay: 0.,
            clip_norm: 0.,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl UpdaterConfig {
    /// Parses and validates a JSON config, missing fields take their default.
    pub fn from_json(json: &str) -> Result<Self, ConfigErr> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigErr> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Checks that the values can be used together.
    ///
    /// # Returns
    /// An error if both capacity limits are set, a coefficient is negative or
    /// not finite, or the optimizer is misconfigured.
    pub fn validate(&self) -> Result<(), ConfigErr> {
        self.capacity()?;
        non_negative("l2_decay", self.l2_decay)?;
        non_negative("prior_l2_decay", self.prior_l2_decay)?;
        non_negative("clip_norm", self.clip_norm)?;
        self.optimizer.validate()
    }

    /// Resolves the per worker capacity.
    ///
    /// # Returns
    /// `None` if the minibatch should be split by count instead, or an error if
    /// both limits are set.
    pub fn capacity(&self) -> Result<Option<Capacity>, ConfigErr> {
        Capacity::from_limits(self.max_examples_per_worker, self.max_tokens_per_worker)
            .map_err(|e| ConfigErr::Invalid(e.to_string()))
    }

    /// Builds the regularizer every worker shares, snapshotting `params` as
    /// the prior when the prior term is active.
    pub fn regularizer(&self, params: &ParamArena) -> Regularizer {
        Regularizer::new(self.l2_decay, self.prior_l2_decay, params)
    }
}

fn non_negative(name: &str, value: f32) -> Result<(), ConfigErr> {
    if !value.is_finite() || value < 0. {
        return Err(ConfigErr::Invalid(format!(
            "{name} must be a non negative number, got {value}"
        )));
    }

    Ok(())
}
