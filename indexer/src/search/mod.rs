use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::Error;

pub mod opensearch;

/// Document submission against a search engine.
///
/// Implementations are shared by every worker slot of a consumer and must be
/// safe to call concurrently without external locking.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Stores `body` verbatim as a new document of `doc_type` in `index`.
    async fn index(&self, index: &str, doc_type: &str, body: Bytes) -> Result<(), Error>;
}
