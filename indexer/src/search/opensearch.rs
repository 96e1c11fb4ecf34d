//! Elasticsearch/OpenSearch compatible engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use opensearch::http::headers::HeaderMap;
use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use opensearch::http::Method;
use opensearch::OpenSearch;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::errors::Error;

use super::SearchEngine;

/// Acknowledgement returned by the document API.
#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    result: Option<String>,
}

/// One client per configured node, used round-robin.
pub struct OpenSearchEngine {
    nodes: Vec<Node>,
    next: AtomicUsize,
}

struct Node {
    url: Url,
    client: OpenSearch,
}

impl OpenSearchEngine {
    /// Builds clients for every address, each bounded by `timeout` per request.
    pub fn create(addrs: &[String], timeout: Duration) -> Result<Self, Error> {
        if addrs.is_empty() {
            return Err(Error::Config("no search engine address given".into()));
        }

        let nodes = addrs
            .iter()
            .map(|addr| {
                let url = parse_address(addr)?;
                let transport = TransportBuilder::new(SingleNodeConnectionPool::new(url.clone()))
                    .disable_proxy()
                    .timeout(timeout)
                    .build()
                    .map_err(|e| Error::connect(url.as_str(), e))?;
                Ok(Node {
                    url,
                    client: OpenSearch::new(transport),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            nodes,
            next: AtomicUsize::new(0),
        })
    }

    /// Builds the clients and checks that at least one node answers.
    pub async fn connect(addrs: &[String], timeout: Duration) -> Result<Self, Error> {
        let engine = Self::create(addrs, timeout)?;
        engine.ping().await?;
        Ok(engine)
    }

    async fn ping(&self) -> Result<(), Error> {
        let mut last = None;
        for node in &self.nodes {
            match node.client.ping().send().await {
                Ok(r) if r.status_code().is_success() => {
                    debug!("Search engine {} is reachable", node.url);
                    return Ok(());
                }
                Ok(r) => last = Some(Error::connect(node.url.as_str(), r.status_code())),
                Err(e) => last = Some(Error::connect(node.url.as_str(), e)),
            }
        }
        Err(last.unwrap_or_else(|| Error::Config("no search engine address given".into())))
    }

    fn node(&self) -> &Node {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        &self.nodes[i % self.nodes.len()]
    }
}

#[async_trait]
impl SearchEngine for OpenSearchEngine {
    async fn index(&self, index: &str, doc_type: &str, body: Bytes) -> Result<(), Error> {
        let node = self.node();
        let path = document_path(index, doc_type);

        let response = node
            .client
            .send(
                Method::Post,
                &path,
                HeaderMap::new(),
                Option::<&()>::None,
                Some(body.to_vec()),
                None,
            )
            .await
            .map_err(|e| Error::Search(format!("{} {}: {}", node.url, path, e)))?;

        let status = response.status_code();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!(
                "{} {} failed with status {}: {}",
                node.url,
                path,
                status,
                error_reason(&text)
            )));
        }

        match response.json::<IndexResponse>().await {
            Ok(ack) => trace!(
                "Indexed document {} into {} ({})",
                ack.id,
                ack.index,
                ack.result.as_deref().unwrap_or("unknown")
            ),
            Err(e) => trace!("Indexed document into {}, unreadable ack: {}", index, e),
        }

        Ok(())
    }
}

fn parse_address(addr: &str) -> Result<Url, Error> {
    let addr = addr.trim();
    let full = if addr.contains("://") {
        addr.to_owned()
    } else {
        format!("http://{}", addr)
    };
    Url::parse(&full).map_err(|e| Error::Config(format!("invalid search engine address '{}': {}", addr, e)))
}

fn document_path(index: &str, doc_type: &str) -> String {
    format!("/{}/{}", index, doc_type)
}

/// Pulls `error.reason` out of an error body, falling back to the raw text.
fn error_reason(body: &str) -> String {
    let reason = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        let error = v.get("error")?;
        match error.get("reason").and_then(Value::as_str) {
            Some(r) => Some(r.to_owned()),
            None => error.as_str().map(str::to_owned),
        }
    });
    reason.unwrap_or_else(|| body.to_owned())
}
