mod config;

use clap::Parser;
use clap::Subcommand;
use log::error;

use seekr_indexer::version;
use seekr_indexer::BANNER;

use config::IndexerConfig;

pub const LOG: &str = "seekr-indexer";

const INFO: &str = "
Seekr indexer discovers Kafka topics matching a pattern and indexes
every message into time-bucketed Elasticsearch indices.";

#[derive(Debug, Parser)]
#[clap(name = "Seekr indexer command-line interface")]
#[clap(about = INFO, before_help = BANNER, disable_version_flag = true, arg_required_else_help = true)]
struct AppOptions {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start indexing discovered topics
    Indexer(IndexerConfig),
    Version,
}

#[tokio::main]
async fn main() {
    let app = AppOptions::parse();

    let output = match app.command {
        Commands::Indexer(c) => seekr_indexer::indexer::run(c.into())
            .await
            .map_err(String::from),
        Commands::Version => version::init().map_err(|e| e.to_string()),
    };

    if let Err(e) = output {
        error!(target: LOG, "{}", e);
        log::Log::flush(log::logger());
        std::process::exit(1);
    }
}
