use std::time::Duration;

use tokio::task;

use crate::errors::Error;

pub mod catalog;
pub mod offsets;
pub mod source;

pub mod config {
    pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
    pub const GROUP_ID: &str = "group.id";
    pub const CLIENT_ID: &str = "client.id";
    pub const API_VERSION_REQUEST: &str = "api.version.request";
    pub const ENABLE_AUTO_COMMIT: &str = "enable.auto.commit";
    pub const ENABLE_AUTO_OFFSET_STORE: &str = "enable.auto.offset.store";
}

/// Timeout for fetching metadata.
pub const FETCH_METADATA_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Runs a blocking librdkafka call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
