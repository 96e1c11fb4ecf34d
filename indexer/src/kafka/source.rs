use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::stream_consumer::StreamConsumer;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};

use crate::consumer::{Delivery, MessageSource};
use crate::errors::Error;
use crate::registry::SourceSettings;

use super::offsets::OffsetTracker;
use super::{blocking, config, FETCH_METADATA_TIMEOUT};

/// Kafka subscription where the channel is the consumer group.
///
/// A partition's position is stored only up to its lowest unacknowledged
/// offset and committed in the background, so unacknowledged messages are
/// delivered again after a rebalance or restart.
pub struct KafkaMessageSource {
    topic: String,
    inner: Arc<StreamConsumer>,
    progress: Mutex<OffsetTracker>,
}

impl KafkaMessageSource {
    /// Subscribes to `topic` and waits until its metadata can be fetched.
    pub async fn connect(
        bootstrap: &[String],
        topic: &str,
        settings: &SourceSettings,
    ) -> Result<Self, Error> {
        let servers = bootstrap.join(",");
        let consumer = client_config(&servers, settings)
            .create::<StreamConsumer>()
            .map_err(invalid_options)?;
        consumer.subscribe(&[topic])?;

        let inner = Arc::new(consumer);
        let probe = inner.clone();
        let name = topic.to_owned();
        blocking(move || {
            probe
                .fetch_metadata(Some(&name), FETCH_METADATA_TIMEOUT)
                .map(|_| ())
                .map_err(|e| Error::connect(servers, e))
        })
        .await?;

        debug!("Subscribed to {} as {}", topic, settings.channel);

        Ok(Self {
            topic: topic.to_owned(),
            inner,
            progress: Mutex::new(OffsetTracker::default()),
        })
    }
}

/// Builds a throwaway client so unknown or malformed options are reported
/// before any topic is registered.
pub fn check_options(bootstrap: &[String], settings: &SourceSettings) -> Result<(), Error> {
    client_config(&bootstrap.join(","), settings)
        .create::<BaseConsumer>()
        .map(|_| ())
        .map_err(invalid_options)
}

fn invalid_options(e: KafkaError) -> Error {
    match e {
        KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) => {
            Error::Config(format!("invalid consumer options: {}", e))
        }
        e => Error::Kafka(e),
    }
}

fn client_config(servers: &str, settings: &SourceSettings) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set(config::CLIENT_ID, &settings.user_agent);

    for (key, value) in &settings.options {
        client.set(key, value);
    }

    client
        .set(config::BOOTSTRAP_SERVERS, servers)
        .set(config::GROUP_ID, &settings.channel)
        .set(config::API_VERSION_REQUEST, "true")
        .set(config::ENABLE_AUTO_COMMIT, "true")
        .set(config::ENABLE_AUTO_OFFSET_STORE, "false");
    client
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn recv(&self) -> Result<Delivery, Error> {
        let delivery = {
            let m = self.inner.recv().await?;
            Delivery {
                topic: m.topic().to_owned(),
                partition: m.partition(),
                offset: m.offset(),
                payload: m.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
            }
        };

        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .received(delivery.partition, delivery.offset);
        Ok(delivery)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), Error> {
        let position = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completed(delivery.partition, delivery.offset);

        let Some(position) = position else {
            return Ok(());
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&delivery.topic, delivery.partition, Offset::Offset(position))?;
        self.inner.store_offsets(&tpl)?;
        trace!(
            "Stored position {} for {}:{}",
            position,
            delivery.topic,
            delivery.partition
        );
        Ok(())
    }

    fn close(&self) {
        if let Err(e) = self.inner.commit_consumer_state(CommitMode::Async) {
            debug!("Final commit for {} skipped: {}", self.topic, e);
        }
        self.inner.unsubscribe();
        debug!("Unsubscribed from {}", self.topic);
    }
}
