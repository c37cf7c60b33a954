mod materialize;
mod minibatch;
mod partition;

pub use materialize::{
    SubBatch, materialize, normalized_weights, pad_to_multiple, split, trim, weight,
};
pub use minibatch::Minibatch;
pub use partition::{Capacity, SplitPoints, split_for_capacity, split_into_n, split_to_capacity};
