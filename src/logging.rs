//! Logger setup.
//!
//! One `fern::Dispatch` writing timestamped lines to a log file and echoing
//! to stderr, so a deployment can `tail -f` the file while still seeing
//! output in an attached terminal.

use std::path::Path;

use chrono::Local;
use fern::Dispatch;

pub fn setup_logger<P: AsRef<Path>>(
    level: log::LevelFilter,
    log_file_path: P,
) -> Result<(), fern::InitError> {
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .chain(fern::log_file(log_file_path)?)
        .apply()?;
    Ok(())
}
