use serde::{Deserialize, Serialize};

use crate::batching::SubBatch;

/// How the per-sentence losses of a sub-batch are reduced to a single loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LossMode {
    /// The mean of the per-sentence losses.
    #[default]
    #[serde(alias = "cross-entropy")]
    SentenceMean,
    /// The sum of the per-sentence losses divided by the amount of real target tokens.
    #[serde(alias = "per-token-cross-entropy")]
    PerTokenMean,
}

impl LossMode {
    /// Returns what the summed per-sentence losses of `sub_batch` get divided by.
    ///
    /// # Returns
    /// The amount of examples or of real target tokens, can be `0` for the latter.
    pub fn denominator(self, sub_batch: &SubBatch) -> usize {
        match self {
            LossMode::SentenceMean => sub_batch.len(),
            LossMode::PerTokenMean => sub_batch.target_tokens(),
        }
    }
}
