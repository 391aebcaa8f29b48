//! Process-wide logger for the vigil binaries.
//!
//! Records are rendered as `[timestamp] [LEVEL] message` lines through a
//! buffered stdout writer. Info and below stay buffered; warnings and
//! errors flush immediately, so a fatal registration outcome or a transport
//! give-up is visible even when the process exits right after logging it.

use chrono::Local;
use log::{Level, Log, Metadata, Record, SetLoggerError, set_boxed_logger, set_max_level};
use std::io::{BufWriter, Stdout, Write, stdout};
use std::sync::Mutex;

pub struct VigilLogger {
    max_level: Level,
    writer: Mutex<BufWriter<Stdout>>,
}

impl VigilLogger {
    /// Installs the logger as the global `log` sink.
    pub fn init(max_level: Level) -> Result<(), SetLoggerError> {
        let logger = VigilLogger {
            max_level,
            writer: Mutex::new(BufWriter::new(stdout())),
        };
        set_boxed_logger(Box::new(logger))?;
        set_max_level(max_level.to_level_filter());
        Ok(())
    }
}

impl Log for VigilLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = render(&Local::now().format("%Y-%m-%d %H:%M:%S").to_string(), record);
        let mut writer = self.writer.lock().unwrap();
        if writer.write_all(line.as_bytes()).is_err() {
            return;
        }
        if record.level() <= Level::Warn {
            let _ = writer.flush();
        }
    }

    fn flush(&self) {
        let _ = self.writer.lock().unwrap().flush();
    }
}

fn render(timestamp: &str, record: &Record) -> String {
    format!("[{}] [{}] {}\n", timestamp, record.level(), record.args())
}
