use std::io;

use chrono::Local;
use clap::ValueEnum;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Verbosity accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<&Level> for LevelFilter {
    fn from(l: &Level) -> Self {
        match l {
            Level::Error => LevelFilter::Error,
            Level::Warn => LevelFilter::Warn,
            Level::Info => LevelFilter::Info,
            Level::Debug => LevelFilter::Debug,
            Level::Trace => LevelFilter::Trace,
        }
    }
}

/// Installs the global logger. Calling it again is a no-op.
pub fn init(level: &Level) {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let filter: LevelFilter = level.into();

    let result = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} {:<5} [{}] {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(filter)
        // librdkafka and the http stack are chatty below warn
        .level_for("rdkafka", filter.min(LevelFilter::Warn))
        .level_for("hyper", filter.min(LevelFilter::Warn))
        .level_for("reqwest", filter.min(LevelFilter::Warn))
        .chain(io::stdout())
        .apply();

    if result.is_err() {
        debug!("Logger already initialized");
    }
}
