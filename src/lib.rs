pub mod corpus;
pub mod replica;

pub use corpus::SyntheticCorpus;
pub use replica::BagOfTokens;
