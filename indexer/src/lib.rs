#[macro_use]
extern crate log;

pub mod consumer;
pub mod discovery;
pub mod errors;
pub mod indexer;
pub mod kafka;
pub mod logger;
pub mod metrics;
pub mod publisher;
pub mod registry;
pub mod search;
pub mod shutdown;
pub mod version;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERS: &str = env!("CARGO_PKG_VERSION");

pub const BANNER: &str = r"
                 __
   ________  ___/ /__ ____
  (_-< -_) -_)  '_/ __/
 /___|__/\__/_/\_\_/   indexer
";
