use std::io::Error as IoError;

use rdkafka::error::KafkaError;
use thiserror::Error;

pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    /// The supplied configuration can't be used
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An endpoint could not be reached while setting up a client
    #[error("Couldn't connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// There was an error talking to the broker
    #[error("Broker error: {0}")]
    Kafka(#[from] KafkaError),

    /// The search engine rejected or failed a request
    #[error("Search engine error: {0}")]
    Search(String),

    /// Registration was attempted after shutdown began
    #[error("Shutdown in progress, topic '{0}' was not registered")]
    ShuttingDown(String),

    /// There was a error processing io
    #[error("Couldn't process the specified stream: {0}")]
    Io(#[from] IoError),
}

impl Error {
    pub fn connect(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Error::Connect {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kafka(KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_)) => false,
            Error::Connect { .. } | Error::Kafka(_) | Error::Search(_) | Error::Io(_) => true,
            Error::Config(_) | Error::ShuttingDown(_) => false,
        }
    }
}

impl From<Error> for String {
    fn from(e: Error) -> String {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(Error::connect("localhost:9200", "refused").is_retryable());
        assert!(Error::Search("503".into()).is_retryable());
        assert!(!Error::Config("bad pattern".into()).is_retryable());
        assert!(!Error::ShuttingDown("events".into()).is_retryable());
    }

    #[test]
    fn client_creation_is_not_retried() {
        let e = Error::Kafka(KafkaError::ClientCreation("No such configuration property".into()));
        assert!(!e.is_retryable());
        assert!(Error::Kafka(KafkaError::NoMessageReceived).is_retryable());
    }

    #[test]
    fn renders_connect_error() {
        let e = Error::connect("localhost:9092", "timed out");
        let msg: String = e.into();
        assert_eq!(msg, "Couldn't connect to localhost:9092: timed out");
    }
}
