use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};

use crate::errors::Error;
use crate::shutdown::Shutdown;

/// Source of the topic names available on the broker.
#[async_trait]
pub trait TopicCatalog: Send + Sync {
    async fn topics(&self) -> Result<Vec<String>, Error>;
}

/// Receives every newly discovered topic.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn register_topic(&self, name: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct DiscovererConfig {
    /// Regular expression a topic name must contain a match for.
    pub pattern: String,
    pub refresh: Duration,
}

impl Default for DiscovererConfig {
    fn default() -> Self {
        Self {
            pattern: ".*".to_owned(),
            refresh: Duration::from_secs(60),
        }
    }
}

/// Outcome of a single discovery pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Discovered {
    pub registered: Vec<String>,
    pub deferred: Vec<String>,
}

/// Polls the catalog and registers matching topics exactly once.
pub struct TopicDiscoverer {
    pattern: Regex,
    refresh: Duration,
    catalog: Arc<dyn TopicCatalog>,
    handler: Arc<dyn TopicHandler>,
    known: Mutex<HashSet<String>>,
    sd: Shutdown,
}

impl TopicDiscoverer {
    pub fn new(
        config: DiscovererConfig,
        catalog: Arc<dyn TopicCatalog>,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<Self, Error> {
        let pattern = Regex::new(&config.pattern)
            .map_err(|e| Error::Config(format!("invalid topic pattern '{}': {}", config.pattern, e)))?;

        if config.refresh.is_zero() {
            return Err(Error::Config("refresh interval must be greater than 0".into()));
        }

        Ok(Self {
            pattern,
            refresh: config.refresh,
            catalog,
            handler,
            known: Mutex::new(HashSet::new()),
            sd: Shutdown::new(),
        })
    }

    /// Polls until `signal` is called. Returns an error only when a topic
    /// registration fails in a way retrying can't fix.
    pub async fn start(&self) -> Result<(), Error> {
        info!(
            "Discovering topics matching '{}' every {:?}",
            self.pattern, self.refresh
        );

        let mut ticker = interval(self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = self.sd.wait_begin() => break Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.discover().await {
                        break Err(e);
                    }
                }
            }
        };

        self.sd.complete();
        debug!("Topic discovery stopped");
        result
    }

    /// Requests the poll loop to stop.
    pub fn signal(&self) {
        if self.sd.begin() {
            info!("Stopping topic discovery...");
        }
    }

    pub async fn wait_stopped(&self) {
        self.sd.wait_complete().await
    }

    /// Runs one discovery pass. Catalog failures are logged and treated as
    /// an empty pass.
    pub async fn discover(&self) -> Result<Discovered, Error> {
        trace!("Polling topic catalog...");

        let topics = match self.catalog.topics().await {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to list topics, retrying next interval: {}", e);
                return Ok(Discovered::default());
            }
        };

        let mut candidates = {
            let known = self.known.lock().await;
            topics
                .into_iter()
                .filter(|t| self.pattern.is_match(t) && !known.contains(t))
                .collect::<Vec<_>>()
        };
        candidates.sort();
        candidates.dedup();

        let mut outcome = Discovered::default();
        for topic in candidates {
            if self.sd.is_shutdown() {
                debug!("Abandoning discovery pass, shutdown in progress");
                break;
            }

            match self.handler.register_topic(&topic).await {
                Ok(()) => {
                    self.known.lock().await.insert(topic.clone());
                    outcome.registered.push(topic);
                }
                Err(Error::ShuttingDown(_)) => {
                    debug!("Registry is shutting down, stopping discovery");
                    self.signal();
                    break;
                }
                Err(e) if e.is_retryable() => {
                    warn!("Failed to register topic {}, retrying next interval: {}", topic, e);
                    outcome.deferred.push(topic);
                }
                Err(e) => {
                    error!("Failed to register topic {}: {}", topic, e);
                    return Err(e);
                }
            }
        }

        Ok(outcome)
    }

    /// Topics registered so far.
    pub async fn known(&self) -> Vec<String> {
        let mut known = self.known.lock().await.iter().cloned().collect::<Vec<_>>();
        known.sort();
        known
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio::time::{sleep, timeout};

    use super::*;

    struct StaticCatalog {
        topics: StdMutex<Result<Vec<String>, String>>,
        polls: StdMutex<usize>,
    }

    impl StaticCatalog {
        fn new(topics: &[&str]) -> Arc<Self> {
            let catalog = Self {
                topics: StdMutex::new(Ok(Vec::new())),
                polls: StdMutex::new(0),
            };
            catalog.set(topics);
            Arc::new(catalog)
        }

        fn set(&self, topics: &[&str]) {
            *self.topics.lock().unwrap() = Ok(topics.iter().map(|t| t.to_string()).collect());
        }

        fn fail(&self) {
            *self.topics.lock().unwrap() = Err("lookup unreachable".into());
        }

        fn polls(&self) -> usize {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl TopicCatalog for StaticCatalog {
        async fn topics(&self) -> Result<Vec<String>, Error> {
            *self.polls.lock().unwrap() += 1;
            self.topics
                .lock()
                .unwrap()
                .clone()
                .map_err(|e| Error::connect("lookup", e))
        }
    }

    /// Records registrations, optionally failing the first few.
    #[derive(Default)]
    struct RecordingHandler {
        calls: StdMutex<Vec<String>>,
        failures: StdMutex<Vec<Error>>,
    }

    #[async_trait]
    impl TopicHandler for RecordingHandler {
        async fn register_topic(&self, name: &str) -> Result<(), Error> {
            self.calls.lock().unwrap().push(name.to_owned());
            match self.failures.lock().unwrap().pop() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn discoverer(
        pattern: &str,
        catalog: Arc<StaticCatalog>,
        handler: Arc<RecordingHandler>,
    ) -> TopicDiscoverer {
        let config = DiscovererConfig {
            pattern: pattern.to_owned(),
            refresh: Duration::from_millis(10),
        };
        TopicDiscoverer::new(config, catalog, handler).unwrap()
    }

    #[test]
    fn rejects_invalid_pattern() {
        let config = DiscovererConfig {
            pattern: "events-(".to_owned(),
            ..Default::default()
        };
        let result = TopicDiscoverer::new(
            config,
            StaticCatalog::new(&[]),
            Arc::new(RecordingHandler::default()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn registers_each_match_once() {
        let catalog = StaticCatalog::new(&["events", "orders", "events-archive"]);
        let handler = Arc::new(RecordingHandler::default());
        let d = discoverer("^events", catalog.clone(), handler.clone());

        let first = d.discover().await.unwrap();
        assert_eq!(first.registered, vec!["events", "events-archive"]);

        catalog.set(&["events", "orders", "events-archive", "events-new"]);
        let second = d.discover().await.unwrap();
        assert_eq!(second.registered, vec!["events-new"]);

        assert_eq!(
            *handler.calls.lock().unwrap(),
            vec!["events", "events-archive", "events-new"]
        );
    }

    #[tokio::test]
    async fn never_registers_non_matching_topics() {
        let catalog = StaticCatalog::new(&["metrics", "audit"]);
        let handler = Arc::new(RecordingHandler::default());
        let d = discoverer("^logs\\.", catalog, handler.clone());

        for _ in 0..3 {
            d.discover().await.unwrap();
        }
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn vanished_topics_stay_registered() {
        let catalog = StaticCatalog::new(&["events"]);
        let handler = Arc::new(RecordingHandler::default());
        let d = discoverer(".*", catalog.clone(), handler.clone());

        d.discover().await.unwrap();
        catalog.set(&[]);
        d.discover().await.unwrap();
        catalog.set(&["events"]);
        d.discover().await.unwrap();

        assert_eq!(d.known().await, vec!["events"]);
        assert_eq!(handler.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn catalog_errors_are_transient() {
        let catalog = StaticCatalog::new(&["events"]);
        catalog.fail();
        let handler = Arc::new(RecordingHandler::default());
        let d = discoverer(".*", catalog.clone(), handler.clone());

        assert_eq!(d.discover().await.unwrap(), Discovered::default());

        catalog.set(&["events"]);
        assert_eq!(d.discover().await.unwrap().registered, vec!["events"]);
    }

    #[tokio::test]
    async fn retryable_registration_errors_are_deferred() {
        let catalog = StaticCatalog::new(&["events"]);
        let handler = Arc::new(RecordingHandler::default());
        handler
            .failures
            .lock()
            .unwrap()
            .push(Error::connect("localhost:9092", "refused"));
        let d = discoverer(".*", catalog, handler.clone());

        let first = d.discover().await.unwrap();
        assert_eq!(first.deferred, vec!["events"]);
        assert!(d.known().await.is_empty());

        let second = d.discover().await.unwrap();
        assert_eq!(second.registered, vec!["events"]);
    }

    #[tokio::test]
    async fn fatal_registration_errors_end_discovery() {
        let catalog = StaticCatalog::new(&["events"]);
        let handler = Arc::new(RecordingHandler::default());
        handler
            .failures
            .lock()
            .unwrap()
            .push(Error::Config("bad template".into()));
        let d = discoverer(".*", catalog, handler);

        let result = timeout(Duration::from_secs(5), d.start()).await.unwrap();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn signal_stops_polling() {
        let catalog = StaticCatalog::new(&["events"]);
        let handler = Arc::new(RecordingHandler::default());
        let d = Arc::new(discoverer(".*", catalog.clone(), handler));

        let task = {
            let d = d.clone();
            tokio::spawn(async move { d.start().await })
        };

        timeout(Duration::from_secs(5), async {
            while catalog.polls() < 2 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        d.signal();
        timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let polls = catalog.polls();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(catalog.polls(), polls);
    }
}
