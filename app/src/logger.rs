use std::io::Write;

use lazy_static::lazy_static;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond digits:3]");

lazy_static! {
    static ref LOGGER: Logger = Logger::default();
}

/// Writes log records to stderr
#[derive(Debug)]
pub struct Logger {
    offset: UtcOffset,
}

impl Default for Logger {
    fn default() -> Self {
        // local offset can be determined only while process is single threaded
        Self {
            offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }
}

/// Installs global logger, must be called before any thread is spawned
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&*LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = OffsetDateTime::now_utc()
            .to_offset(self.offset)
            .format(TIMESTAMP)
            .unwrap_or_default();

        eprintln!(
            "{} {:<5} [{}] {}",
            timestamp,
            record.level(),
            record.module_path().unwrap_or_default(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
