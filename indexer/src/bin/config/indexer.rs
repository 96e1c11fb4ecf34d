use std::time::Duration;

use clap::Args;

use seekr_indexer::logger::Level;

#[derive(Args, Debug)]
pub struct IndexerConfig {
    #[clap(
        short,
        long,
        env = "SEEKER_LOG",
        default_value = "info",
        forbid_empty_values = true,
        help = "The logging level",
        value_enum
    )]
    /// The logging level
    pub log: Level,

    #[clap(
        long = "lookup-address",
        env = "SEEKER_LOOKUP_ADDRESSES",
        required = true,
        value_delimiter = ',',
        help = "Kafka address queried for topics (may be given multiple times)"
    )]
    pub lookup_addresses: Vec<String>,

    #[clap(
        long = "broker-address",
        env = "SEEKER_BROKER_ADDRESSES",
        value_delimiter = ',',
        help = "Kafka address consumers bootstrap from (may be given multiple times)"
    )]
    pub broker_addresses: Vec<String>,

    #[clap(
        long = "topic",
        env = "SEEKER_TOPIC",
        default_value = ".*",
        forbid_empty_values = true,
        help = "Pattern of the topics to index"
    )]
    pub topic: String,

    #[clap(
        long = "channel",
        env = "SEEKER_CHANNEL",
        default_value = "seekr-indexer",
        forbid_empty_values = true,
        help = "Consumer group used for every topic"
    )]
    pub channel: String,

    #[clap(
        long = "max-in-flight",
        env = "SEEKER_MAX_IN_FLIGHT",
        default_value = "200",
        help = "Max number of messages to allow in flight per topic"
    )]
    pub max_in_flight: usize,

    #[clap(
        short = 'n',
        long = "concurrency",
        env = "SEEKER_CONCURRENCY",
        default_value = "10",
        help = "Number of concurrent publishers per topic"
    )]
    pub concurrency: usize,

    #[clap(
        long = "max-attempts",
        env = "SEEKER_MAX_ATTEMPTS",
        default_value = "5",
        help = "Attempts per message before giving up, 0 retries forever"
    )]
    pub max_attempts: u32,

    #[clap(
        long = "refresh-interval",
        env = "SEEKER_REFRESH_INTERVAL",
        default_value = "60",
        help = "Topic discovery refresh interval in seconds"
    )]
    pub refresh_interval: u64,

    #[clap(
        long = "status-every",
        env = "SEEKER_STATUS_EVERY",
        default_value = "250",
        help = "The # of requests between logging status (per topic), 0 disables"
    )]
    pub status_every: usize,

    #[clap(
        long = "index-name",
        env = "SEEKER_INDEX_NAME",
        default_value = "logstash-%Y.%m.%d",
        forbid_empty_values = true,
        help = "Elasticsearch index name (strftime format, UTC)"
    )]
    pub index_name: String,

    #[clap(
        long = "index-type",
        env = "SEEKER_INDEX_TYPE",
        default_value = "logstash",
        forbid_empty_values = true,
        help = "Elasticsearch document type"
    )]
    pub index_type: String,

    #[clap(
        long = "consumer-opt",
        help = "key=value option passed through to the Kafka consumer (may be given multiple times)"
    )]
    pub consumer_opts: Vec<String>,

    #[clap(
        long = "elasticsearch",
        env = "SEEKER_ELASTICSEARCH",
        required = true,
        value_delimiter = ',',
        help = "Elasticsearch HTTP address (may be given multiple times)"
    )]
    pub search_addresses: Vec<String>,

    #[clap(
        long = "http-timeout",
        env = "SEEKER_HTTP_TIMEOUT",
        default_value = "20",
        help = "Timeout in seconds for each Elasticsearch request"
    )]
    pub http_timeout: u64,
}

impl From<IndexerConfig> for seekr_indexer::indexer::IndexerConfig {
    fn from(c: IndexerConfig) -> Self {
        Self {
            log: c.log,
            lookup_addresses: c.lookup_addresses,
            broker_addresses: c.broker_addresses,
            topic: c.topic,
            channel: c.channel,
            max_in_flight: c.max_in_flight,
            concurrency: c.concurrency,
            max_attempts: c.max_attempts,
            refresh_interval: Duration::from_secs(c.refresh_interval),
            status_every: c.status_every,
            index_name: c.index_name,
            index_type: c.index_type,
            consumer_opts: c.consumer_opts,
            search_addresses: c.search_addresses,
            http_timeout: Duration::from_secs(c.http_timeout),
        }
    }
}
