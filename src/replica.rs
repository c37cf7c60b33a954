use machine_learning::{
    batching::SubBatch,
    params::{Evaluation, GradientMap, ParamArena, ParamId},
};
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use worker::{Replica, WorkerErr, error::Result};

/// The target class every out of vocabulary target token is predicted as.
pub const UNK: u32 = 1;

/// A bag of tokens translation model.
///
/// Every source sentence is encoded as the mean of its token embeddings and
/// each target token is predicted independently from that encoding with a
/// softmax over the vocabulary. Out of vocabulary source tokens share the
/// `unk_embedding`, so that parameter is only reached by sub-batches that
/// contain one.
#[derive(Debug, Clone, Copy)]
pub struct BagOfTokens {
    vocab: usize,
    source_embedding: ParamId,
    target_embedding: ParamId,
    unk_embedding: ParamId,
}

impl BagOfTokens {
    /// Registers the model parameters in `params`, drawn from `N(0, std_dev)`.
    ///
    /// # Arguments
    /// * `params` - The arena to register the parameters in.
    /// * `vocab` - The vocabulary size, must be bigger than `UNK`.
    /// * `dim` - The embedding size.
    /// * `std_dev` - The standard deviation of the initial values.
    /// * `rng` - The random source.
    ///
    /// # Returns
    /// The model, or an error if `std_dev` isn't a valid standard deviation
    /// or the vocabulary is too small.
    pub fn init<R: Rng>(
        params: &mut ParamArena,
        vocab: usize,
        dim: usize,
        std_dev: f32,
        rng: &mut R,
    ) -> Result<Self> {
        if vocab <= UNK as usize {
            return Err(WorkerErr::Replica(format!(
                "vocabulary of {vocab} tokens has no room for the unknown token"
            )));
        }

        let normal = Normal::new(0., std_dev).map_err(|e| WorkerErr::Replica(e.to_string()))?;
        let mut sample = |shape: &[usize]| {
            ArrayD::from_shape_simple_fn(IxDyn(shape), || normal.sample(&mut *rng))
        };

        Ok(Self {
            vocab,
            source_embedding: params.register("source_embedding", sample(&[vocab, dim])),
            target_embedding: params.register("target_embedding", sample(&[vocab, dim])),
            unk_embedding: params.register("unk_embedding", sample(&[dim])),
        })
    }

    pub fn vocab(&self) -> usize {
        self.vocab
    }

    pub fn source_embedding(&self) -> ParamId {
        self.source_embedding
    }

    pub fn target_embedding(&self) -> ParamId {
        self.target_embedding
    }

    pub fn unk_embedding(&self) -> ParamId {
        self.unk_embedding
    }

    fn class(&self, token: u32) -> usize {
        if (token as usize) < self.vocab {
            token as usize
        } else {
            UNK as usize
        }
    }
}

impl Replica for BagOfTokens {
    fn forward_backward(&mut self, params: &ParamArena, batch: &SubBatch) -> Result<Evaluation> {
        let source_embedding = matrix(params, self.source_embedding)?;
        let target_embedding = matrix(params, self.target_embedding)?;
        let unk_embedding = params
            .value(self.unk_embedding)?
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|e| WorkerErr::Replica(format!("unk_embedding: {e}")))?;

        let mut d_source = Array2::<f32>::zeros(source_embedding.raw_dim());
        let mut d_target = Array2::<f32>::zeros(target_embedding.raw_dim());
        let mut d_unk = Array1::<f32>::zeros(unk_embedding.raw_dim());
        let mut unk_reached = false;
        let mut loss = 0f32;

        let source = batch.source().index_axis(Axis(0), 0);
        for example in 0..batch.len() {
            let source_tokens =
                real_tokens(source.column(example), batch.source_mask().column(example));
            let target_tokens = real_tokens(
                batch.target().column(example),
                batch.target_mask().column(example),
            );

            if source_tokens.is_empty() || target_tokens.is_empty() {
                continue;
            }

            let scale = 1. / source_tokens.len() as f32;
            let mut hidden = Array1::<f32>::zeros(unk_embedding.raw_dim());
            for &token in &source_tokens {
                if (token as usize) < self.vocab {
                    hidden.scaled_add(scale, &source_embedding.row(token as usize));
                } else {
                    hidden.scaled_add(scale, &unk_embedding);
                }
            }

            let scores = target_embedding.dot(&hidden);
            let max = scores.fold(f32::NEG_INFINITY, |m, &s| m.max(s));
            let exp = scores.mapv(|s| (s - max).exp());
            let sum = exp.sum();
            let log_sum_exp = max + sum.ln();
            let probs = exp / sum;

            // every target token shares the same softmax.
            let mut d_scores = probs * target_tokens.len() as f32;
            for &token in &target_tokens {
                let class = self.class(token);
                loss += log_sum_exp - scores[class];
                d_scores[class] -= 1.;
            }

            for (mut row, &d) in d_target.outer_iter_mut().zip(&d_scores) {
                row.scaled_add(d, &hidden);
            }

            let d_hidden = target_embedding.t().dot(&d_scores);
            for &token in &source_tokens {
                if (token as usize) < self.vocab {
                    d_source.row_mut(token as usize).scaled_add(scale, &d_hidden);
                } else {
                    d_unk.scaled_add(scale, &d_hidden);
                    unk_reached = true;
                }
            }
        }

        let mut grads = GradientMap::unused(params.len());
        grads.add(self.source_embedding, d_source.into_dyn().view())?;
        grads.add(self.target_embedding, d_target.into_dyn().view())?;
        if unk_reached {
            grads.add(self.unk_embedding, d_unk.into_dyn().view())?;
        }

        Ok(Evaluation::new(loss, grads))
    }
}

fn matrix(params: &ParamArena, id: ParamId) -> Result<ArrayView2<'_, f32>> {
    let value = params.value(id)?;
    value
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| WorkerErr::Replica(format!("{}: {e}", params.name(id).unwrap_or("?"))))
}

fn real_tokens(tokens: ArrayView1<u32>, mask: ArrayView1<f32>) -> Vec<u32> {
    tokens
        .iter()
        .zip(mask)
        .take_while(|&(_, &m)| m > 0.)
        .map(|(&token, _)| token)
        .collect()
}
