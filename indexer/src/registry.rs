use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::consumer::{Consumer, ConsumerConfig, ConsumerHandle, MessageSource};
use crate::discovery::TopicHandler;
use crate::errors::Error;
use crate::kafka::source::KafkaMessageSource;
use crate::metrics::TimerMetrics;
use crate::publisher::{IndexName, Publisher};
use crate::search::opensearch::OpenSearchEngine;
use crate::search::SearchEngine;
use crate::shutdown::Shutdown;

/// Broker-agnostic subscription settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub channel: String,
    pub user_agent: String,
    /// Options passed through to the broker client as-is.
    pub options: Vec<(String, String)>,
}

/// Opens the network clients a topic registration needs.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_engine(&self) -> Result<Arc<dyn SearchEngine>, Error>;

    async fn connect_source(
        &self,
        topic: &str,
        settings: &SourceSettings,
    ) -> Result<Arc<dyn MessageSource>, Error>;
}

/// Connects to Kafka and an Elasticsearch compatible search engine.
pub struct ClusterConnector {
    bootstrap: Vec<String>,
    search_addrs: Vec<String>,
    timeout: Duration,
}

impl ClusterConnector {
    pub fn new(bootstrap: Vec<String>, search_addrs: Vec<String>, timeout: Duration) -> Self {
        Self {
            bootstrap,
            search_addrs,
            timeout,
        }
    }
}

#[async_trait]
impl Connector for ClusterConnector {
    async fn connect_engine(&self) -> Result<Arc<dyn SearchEngine>, Error> {
        let engine = OpenSearchEngine::connect(&self.search_addrs, self.timeout).await?;
        Ok(Arc::new(engine))
    }

    async fn connect_source(
        &self,
        topic: &str,
        settings: &SourceSettings,
    ) -> Result<Arc<dyn MessageSource>, Error> {
        let source = KafkaMessageSource::connect(&self.bootstrap, topic, settings).await?;
        Ok(Arc::new(source))
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub channel: String,
    pub user_agent: String,
    pub options: Vec<(String, String)>,
    pub index_name: IndexName,
    pub index_type: String,
    /// Samples between metrics status lines, 0 disables them.
    pub status_every: usize,
    /// Worker slots per topic.
    pub concurrency: usize,
    pub consumer: ConsumerConfig,
}

impl RegistryConfig {
    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            channel: self.channel.clone(),
            user_agent: self.user_agent.clone(),
            options: self.options.clone(),
        }
    }
}

struct State {
    topics: HashSet<String>,
    consumers: Vec<ConsumerHandle>,
}

/// Owns one consumer per registered topic and stops them together.
pub struct ConsumerRegistry {
    config: RegistryConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<State>,
    sd: Shutdown,
}

impl ConsumerRegistry {
    pub fn new(config: RegistryConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            state: Mutex::new(State {
                topics: HashSet::new(),
                consumers: Vec::new(),
            }),
            sd: Shutdown::new(),
        }
    }

    /// Subscribes to `name` and starts indexing its messages.
    ///
    /// Registering a topic twice is a no-op. Once `stop` has been called
    /// every registration fails with `Error::ShuttingDown`.
    pub async fn register_topic(&self, name: &str) -> Result<(), Error> {
        {
            let mut state = self.state.lock().await;
            if self.sd.is_shutdown() {
                return Err(Error::ShuttingDown(name.to_owned()));
            }
            if !state.topics.insert(name.to_owned()) {
                warn!("Consumer is already registered for topic: {}", name);
                return Ok(());
            }
        }

        info!("Registering topic {}", name);

        // Connecting may block for a while, only bookkeeping holds the lock.
        let consumer = match self.build(name).await {
            Ok(c) => c,
            Err(e) => {
                self.state.lock().await.topics.remove(name);
                return Err(e);
            }
        };

        let mut state = self.state.lock().await;
        if self.sd.is_shutdown() {
            state.topics.remove(name);
            drop(state);
            consumer.discard();
            return Err(Error::ShuttingDown(name.to_owned()));
        }

        match consumer.start() {
            Ok(handle) => {
                state.consumers.push(handle);
                Ok(())
            }
            Err(e) => {
                state.topics.remove(name);
                Err(e)
            }
        }
    }

    async fn build(&self, name: &str) -> Result<Consumer, Error> {
        let engine = self.connector.connect_engine().await?;
        let metrics = TimerMetrics::new(self.config.status_every, format!("[metrics:{}]", name));
        let publisher = Publisher::new(
            engine,
            self.config.index_name.clone(),
            self.config.index_type.clone(),
            metrics,
        );

        let settings = self.config.source_settings();
        let source = self.connector.connect_source(name, &settings).await?;

        let mut consumer = Consumer::new(
            name,
            self.config.channel.clone(),
            self.config.consumer.clone(),
            source,
        )?;
        consumer.add_concurrent_handlers(Arc::new(publisher), self.config.concurrency);
        Ok(consumer)
    }

    /// Stops every consumer and waits for all of them to drain.
    ///
    /// Safe to call more than once; later calls wait for the first to finish.
    pub async fn stop(&self) {
        let consumers = {
            let mut state = self.state.lock().await;
            if !self.sd.begin() {
                None
            } else {
                let consumers = std::mem::take(&mut state.consumers);
                for c in &consumers {
                    c.stop();
                }
                Some(consumers)
            }
        };

        let Some(consumers) = consumers else {
            self.sd.wait_complete().await;
            return;
        };

        info!("Waiting for {} consumers to stop...", consumers.len());
        join_all(consumers.into_iter().map(ConsumerHandle::stopped)).await;

        self.sd.complete();
        info!("All consumers stopped");
    }

    /// Reacts to a termination signal.
    pub async fn signal(&self) {
        self.stop().await
    }

    /// Names of the registered topics, sorted.
    pub async fn topics(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut topics = state.topics.iter().cloned().collect::<Vec<_>>();
        topics.sort();
        topics
    }

    /// Number of consumers still running.
    pub async fn active(&self) -> usize {
        let state = self.state.lock().await;
        state.consumers.iter().filter(|c| !c.is_stopped()).count()
    }
}

#[async_trait]
impl TopicHandler for ConsumerRegistry {
    async fn register_topic(&self, name: &str) -> Result<(), Error> {
        ConsumerRegistry::register_topic(self, name).await
    }
}
