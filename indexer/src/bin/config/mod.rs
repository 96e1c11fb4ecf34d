mod indexer;

pub use indexer::IndexerConfig;
