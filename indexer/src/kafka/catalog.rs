use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::ClientConfig;

use crate::discovery::TopicCatalog;
use crate::errors::Error;
use crate::version;

use super::{blocking, config, FETCH_METADATA_TIMEOUT};

/// Lists topics from the cluster metadata of the lookup brokers.
pub struct KafkaTopicCatalog {
    inner: Arc<BaseConsumer>,
}

impl KafkaTopicCatalog {
    pub fn create(lookup_addrs: &[String]) -> Result<Self, Error> {
        if lookup_addrs.is_empty() {
            return Err(Error::Config("no lookup address given".into()));
        }

        debug!("Topic catalog bootstrap: {:?}", lookup_addrs);

        let consumer = ClientConfig::new()
            .set(config::BOOTSTRAP_SERVERS, lookup_addrs.join(","))
            .set(config::CLIENT_ID, version::user_agent())
            .set(config::API_VERSION_REQUEST, "true")
            .create::<BaseConsumer>()?;

        Ok(Self {
            inner: Arc::new(consumer),
        })
    }
}

#[async_trait]
impl TopicCatalog for KafkaTopicCatalog {
    async fn topics(&self) -> Result<Vec<String>, Error> {
        let inner = self.inner.clone();

        blocking(move || {
            let metadata = inner.fetch_metadata(None, FETCH_METADATA_TIMEOUT)?;
            let names = metadata
                .topics()
                .iter()
                .filter(|t| {
                    if let Some(e) = t.error() {
                        trace!("Skipping topic {} with metadata error {:?}", t.name(), e);
                        return false;
                    }
                    true
                })
                .map(|t| t.name().to_owned())
                .collect::<Vec<_>>();
            Ok(user_topics(names))
        })
        .await
    }
}

/// Drops broker-internal topics and sorts the rest.
fn user_topics(names: Vec<String>) -> Vec<String> {
    let mut names = names
        .into_iter()
        .filter(|n| !n.starts_with("__"))
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();
    names
}
