use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinError;

use crate::consumer::ConsumerConfig;
use crate::discovery::{DiscovererConfig, TopicDiscoverer};
use crate::errors::Error;
use crate::kafka::catalog::KafkaTopicCatalog;
use crate::kafka::source;
use crate::publisher::IndexName;
use crate::registry::{ClusterConnector, ConsumerRegistry, RegistryConfig};
use crate::{logger, version, BANNER};

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub log: logger::Level,
    /// Bootstrap addresses of the brokers queried for topic metadata.
    pub lookup_addresses: Vec<String>,
    /// Additional brokers consumers bootstrap from.
    pub broker_addresses: Vec<String>,
    /// Pattern topic names are matched against.
    pub topic: String,
    /// Consumer group shared by every subscription.
    pub channel: String,
    pub max_in_flight: usize,
    /// Worker slots per topic.
    pub concurrency: usize,
    pub max_attempts: u32,
    pub refresh_interval: Duration,
    pub status_every: usize,
    /// strftime template of the target index.
    pub index_name: String,
    pub index_type: String,
    /// `key=value` options passed through to every consumer.
    pub consumer_opts: Vec<String>,
    pub search_addresses: Vec<String>,
    pub http_timeout: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            log: logger::Level::Info,
            lookup_addresses: Vec::new(),
            broker_addresses: Vec::new(),
            topic: ".*".to_owned(),
            channel: "seekr-indexer".to_owned(),
            max_in_flight: 200,
            concurrency: 10,
            max_attempts: 5,
            refresh_interval: Duration::from_secs(60),
            status_every: 250,
            index_name: "logstash-%Y.%m.%d".to_owned(),
            index_type: "logstash".to_owned(),
            consumer_opts: Vec::new(),
            search_addresses: Vec::new(),
            http_timeout: Duration::from_secs(20),
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.topic.is_empty() || self.channel.is_empty() {
            return Err(Error::Config("--topic and --channel are required".into()));
        }
        if self.lookup_addresses.is_empty() {
            return Err(Error::Config("missing --lookup-address".into()));
        }
        if self.search_addresses.is_empty() {
            return Err(Error::Config("missing --elasticsearch addresses".into()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("--concurrency must be greater than 0".into()));
        }
        if self.max_in_flight == 0 {
            return Err(Error::Config("--max-in-flight must be greater than 0".into()));
        }
        self.consumer_options()?;
        IndexName::new(self.index_name.as_str())?;
        Ok(())
    }

    /// Brokers a consumer connects to: explicit brokers then lookup brokers.
    pub fn bootstrap(&self) -> Vec<String> {
        let mut addrs: Vec<String> = Vec::new();
        for addr in self.broker_addresses.iter().chain(&self.lookup_addresses) {
            if !addrs.contains(addr) {
                addrs.push(addr.clone());
            }
        }
        addrs
    }

    pub fn consumer_options(&self) -> Result<Vec<(String, String)>, Error> {
        self.consumer_opts
            .iter()
            .map(|opt| match opt.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_owned(), value.trim().to_owned()))
                }
                _ => Err(Error::Config(format!(
                    "consumer option '{}' is not of the form key=value",
                    opt
                ))),
            })
            .collect()
    }

    pub fn registry_config(&self) -> Result<RegistryConfig, Error> {
        Ok(RegistryConfig {
            channel: self.channel.clone(),
            user_agent: version::user_agent(),
            options: self.consumer_options()?,
            index_name: IndexName::new(self.index_name.as_str())?,
            index_type: self.index_type.clone(),
            status_every: self.status_every,
            concurrency: self.concurrency,
            consumer: ConsumerConfig {
                max_in_flight: self.max_in_flight,
                max_attempts: self.max_attempts,
                ..Default::default()
            },
        })
    }

    pub fn discoverer_config(&self) -> DiscovererConfig {
        DiscovererConfig {
            pattern: self.topic.clone(),
            refresh: self.refresh_interval,
        }
    }
}

pub async fn run(config: IndexerConfig) -> Result<(), Error> {
    // Set the default log level
    logger::init(&config.log);

    // Output seekr banner
    info!("{}", BANNER);
    info!("Starting indexer...");

    config.validate()?;
    let registry_config = config.registry_config()?;
    source::check_options(&config.bootstrap(), &registry_config.source_settings())?;

    let catalog = Arc::new(KafkaTopicCatalog::create(&config.lookup_addresses)?);
    let connector = Arc::new(ClusterConnector::new(
        config.bootstrap(),
        config.search_addresses.clone(),
        config.http_timeout,
    ));
    let registry = Arc::new(ConsumerRegistry::new(registry_config, connector));
    let discoverer = Arc::new(TopicDiscoverer::new(
        config.discoverer_config(),
        catalog,
        registry.clone(),
    )?);

    serve(discoverer, registry, shutdown_signal()).await
}

/// Discovers topics until `signal` resolves or discovery fails, then stops
/// discovery first and the consumers second.
pub async fn serve<S>(
    discoverer: Arc<TopicDiscoverer>,
    registry: Arc<ConsumerRegistry>,
    signal: S,
) -> Result<(), Error>
where
    S: Future<Output = ()>,
{
    let mut discovery = {
        let discoverer = discoverer.clone();
        tokio::spawn(async move { discoverer.start().await })
    };

    let ended = tokio::select! {
        _ = signal => None,
        joined = &mut discovery => Some(flatten(joined)),
    };

    let outcome = match ended {
        Some(outcome) => outcome,
        None => {
            info!("Termination signal received, shutting down...");
            discoverer.signal();
            flatten(discovery.await)
        }
    };

    registry.signal().await;

    info!("Indexer stopped");
    outcome
}

fn flatten(joined: Result<Result<(), Error>, JoinError>) -> Result<(), Error> {
    joined.map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Unable to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
