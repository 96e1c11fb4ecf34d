use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};

use crate::errors::Error;
use crate::metrics::TimerMetrics;
use crate::search::SearchEngine;

/// Callback invoked by every worker slot of a consumer.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, payload: &Bytes) -> Result<(), Error>;
}

/// Characters the search engine refuses in index names. `/` would also split
/// the request path.
const INVALID_INDEX_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ' ', ',', '#'];

/// A strftime template naming the target index, e.g. `logstash-%Y.%m.%d`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexName {
    template: String,
}

impl IndexName {
    pub fn new(template: impl Into<String>) -> Result<Self, Error> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err(Error::Config("index name template is empty".into()));
        }
        if StrftimeItems::new(&template).any(|i| matches!(i, Item::Error)) {
            return Err(Error::Config(format!(
                "index name template '{}' is not a valid strftime format",
                template
            )));
        }

        let sample = Utc::now().format(&template).to_string();
        if let Some(c) = sample.chars().find(|c| INVALID_INDEX_CHARS.contains(c)) {
            return Err(Error::Config(format!(
                "index name template '{}' produces '{}', which can't appear in an index name",
                template, c
            )));
        }
        Ok(Self { template })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// The index a document stored at `at` belongs to.
    pub fn resolve(&self, at: &DateTime<Utc>) -> String {
        at.format(&self.template).to_string()
    }
}

/// Indexes every message of a topic as one document.
pub struct Publisher {
    engine: Arc<dyn SearchEngine>,
    index_name: IndexName,
    index_type: String,
    metrics: TimerMetrics,
}

impl Publisher {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        index_name: IndexName,
        index_type: impl Into<String>,
        metrics: TimerMetrics,
    ) -> Self {
        Self {
            engine,
            index_name,
            index_type: index_type.into(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &TimerMetrics {
        &self.metrics
    }

    /// Submits `payload` to the index resolved for `at`.
    pub async fn publish_at(&self, payload: &Bytes, at: DateTime<Utc>) -> Result<(), Error> {
        let start = Instant::now();
        let index = self.index_name.resolve(&at);

        let result = self
            .engine
            .index(&index, &self.index_type, payload.clone())
            .await;

        self.metrics.status(start);
        result
    }
}

#[async_trait]
impl MessageHandler for Publisher {
    async fn handle_message(&self, payload: &Bytes) -> Result<(), Error> {
        self.publish_at(payload, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;

    #[derive(Default)]
    struct RecordingEngine {
        docs: Mutex<Vec<(String, String, Bytes)>>,
        fail: bool,
    }

    #[async_trait]
    impl SearchEngine for RecordingEngine {
        async fn index(&self, index: &str, doc_type: &str, body: Bytes) -> Result<(), Error> {
            self.docs
                .lock()
                .unwrap()
                .push((index.to_owned(), doc_type.to_owned(), body));
            if self.fail {
                return Err(Error::Search("cluster_block_exception".into()));
            }
            Ok(())
        }
    }

    fn publisher(engine: Arc<RecordingEngine>) -> Publisher {
        Publisher::new(
            engine,
            IndexName::new("logs-%Y.%m.%d").unwrap(),
            "logstash",
            TimerMetrics::new(0, "[metrics]:"),
        )
    }

    #[test]
    fn rejects_bad_templates() {
        assert!(IndexName::new("").is_err());
        assert!(IndexName::new("logs-%Q").is_err());
        assert!(IndexName::new("static-index").is_ok());
    }

    #[test]
    fn rejects_templates_that_break_the_path() {
        assert!(matches!(IndexName::new("logs-%D"), Err(Error::Config(_))));
        assert!(IndexName::new("logs/%Y").is_err());
        assert!(IndexName::new("logs-%c").is_err());
        assert!(IndexName::new("logs-%Y.%m.%d-%H").is_ok());
    }

    #[test]
    fn index_rolls_over_at_midnight() {
        let name = IndexName::new("logstash-%Y.%m.%d").unwrap();
        let before = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();

        assert_eq!(name.resolve(&before), "logstash-2024.03.09");
        assert_eq!(name.resolve(&after), "logstash-2024.03.10");
    }

    #[tokio::test]
    async fn submits_payload_verbatim() {
        let engine = Arc::new(RecordingEngine::default());
        let publisher = publisher(engine.clone());
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let payload = Bytes::from_static(b"{\"msg\": \"hello\",  \"n\":1}");

        publisher.publish_at(&payload, at).await.unwrap();

        let docs = engine.docs.lock().unwrap();
        assert_eq!(
            *docs,
            vec![("logs-2024.03.09".to_owned(), "logstash".to_owned(), payload)]
        );
        assert_eq!(publisher.metrics().count(), 1);
    }

    #[tokio::test]
    async fn failures_are_returned_and_still_timed() {
        let engine = Arc::new(RecordingEngine {
            fail: true,
            ..Default::default()
        });
        let publisher = publisher(engine);

        let result = publisher.handle_message(&Bytes::from_static(b"x")).await;

        assert!(matches!(result, Err(Error::Search(_))));
        assert_eq!(publisher.metrics().count(), 1);
    }

    #[tokio::test]
    async fn concurrent_calls_record_every_sample() {
        let engine = Arc::new(RecordingEngine::default());
        let publisher = Arc::new(publisher(engine.clone()));

        let tasks = (0..10)
            .map(|_| {
                let publisher = publisher.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        publisher
                            .handle_message(&Bytes::from_static(b"{}"))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(publisher.metrics().count(), 500);
        assert_eq!(engine.docs.lock().unwrap().len(), 500);
    }
}
