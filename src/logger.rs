//! Process logger: timestamped lines to stdout and `verification.log`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use log::{LevelFilter, Metadata, Record};

/// Log file written alongside the reports
pub const LOG_FILE: &str = "verification.log";

struct RunLogger {
    file: Option<Mutex<File>>,
    level: LevelFilter,
}

impl log::Log for RunLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} - {} - {} - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.target().split("::").next().unwrap_or(""),
            record.level(),
            record.args()
        );
        println!("{}", line);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{}", line);
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Install the global logger. Logs go to stdout and, when the file can be
/// opened, to [`LOG_FILE`] as well.
pub fn init(level: LevelFilter) {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(Path::new(LOG_FILE))
        .map_err(|e| eprintln!("warning: could not open {}: {}", LOG_FILE, e))
        .ok()
        .map(Mutex::new);

    let logger = RunLogger { file, level };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
}
