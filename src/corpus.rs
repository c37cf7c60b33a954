use machine_learning::{MlErr, batching::Minibatch};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Generates synthetic parallel minibatches with ragged sentence lengths.
///
/// Every target sentence is the reversed source sentence with its tokens
/// shifted by one, so the pairs carry a signal a model can fit. A fraction of
/// the source tokens fall outside the vocabulary.
#[derive(Debug)]
pub struct SyntheticCorpus {
    rng: StdRng,
    vocab: u32,
    max_len: usize,
    batch_size: usize,
}

impl SyntheticCorpus {
    /// Creates a new `SyntheticCorpus`.
    ///
    /// # Arguments
    /// * `seed` - Seed of the random source, the same seed yields the same minibatches.
    /// * `vocab` - The vocabulary size.
    /// * `max_len` - The longest possible sentence.
    /// * `batch_size` - The amount of sentence pairs per minibatch.
    pub fn new(seed: u64, vocab: u32, max_len: usize, batch_size: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            vocab,
            max_len: max_len.max(1),
            batch_size,
        }
    }

    /// Draws the next minibatch.
    ///
    /// # Returns
    /// The minibatch or an error if the batch size is zero.
    pub fn next_minibatch(&mut self) -> Result<Minibatch, MlErr> {
        let (sources, targets): (Vec<_>, Vec<_>) =
            (0..self.batch_size).map(|_| self.pair()).unzip();

        Minibatch::from_sequences(&sources, &targets)
    }

    fn pair(&mut self) -> (Vec<u32>, Vec<u32>) {
        let len = self.rng.random_range(1..=self.max_len);
        // 0 is padding and 1 is the unknown token, 1 in 10 tokens is out of vocabulary.
        let source: Vec<u32> = (0..len)
            .map(|_| self.rng.random_range(2..self.vocab + self.vocab / 10 + 1))
            .collect();

        let target = source
            .iter()
            .rev()
            .map(|&token| if token + 1 < self.vocab { token + 1 } else { 2 })
            .collect();

        (source, target)
    }
}
