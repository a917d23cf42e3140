//! Logging pipeline for the controller.
//!
//! ```text
//! log::info!() / warn!() / ...
//!     |
//! [LogCollector] (log::Log, never blocks the caller)
//!     | (crossbeam unbounded channel)
//!     v
//! [writer thread] -> stderr
//!                 -> optional log file (append)
//! ```
//!
//! Every line reads `[HH:MM:SS.mmm] [PinnedPanel] [LEVEL] message`.
//! The writer runs on a plain OS thread, so it keeps draining whatever tokio
//! runtime (paused, current-thread or none) the callers live on.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const PREFIX: &str = "PinnedPanel";

enum LogMessage {
    Line(String),
    /// Flush marker; acknowledged once every earlier line is written.
    Flush(std::sync::mpsc::Sender<()>),
}

/// Render one log line (without trailing newline).
pub fn format_line(level: Level, message: &str) -> String {
    format!(
        "[{}] [{}] [{}] {}",
        Local::now().format("%H:%M:%S%.3f"),
        PREFIX,
        level,
        message
    )
}

/// `log::Log` implementation with a background writer.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    level: LevelFilter,
    log_file: Option<PathBuf>,
}

impl LogCollector {
    /// Start the writer thread. `log_file` is created (with parents) if given.
    pub fn new(level: LevelFilter, log_file: Option<PathBuf>, echo_stderr: bool) -> Result<Self, String> {
        let mut file = match &log_file {
            Some(path) => Some(open_log_file(path)?),
            None => None,
        };
        let (tx, rx) = unbounded::<LogMessage>();

        std::thread::Builder::new()
            .name("pinned-panel-log".to_string())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LogMessage::Line(line) => {
                            if echo_stderr {
                                eprintln!("{}", line);
                            }
                            if let Some(f) = file.as_mut() {
                                if let Err(e) = writeln!(f, "{}", line) {
                                    eprintln!("[{}] [Log] write failed, disabling file output: {}", PREFIX, e);
                                    file = None;
                                }
                            }
                        }
                        LogMessage::Flush(ack) => {
                            if let Some(f) = file.as_mut() {
                                let _ = f.flush();
                            }
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .map_err(|e| format!("Failed to spawn log writer: {}", e))?;

        Ok(LogCollector { tx, level, log_file })
    }

    /// Create a collector and register it as the global logger.
    pub fn install(level: LevelFilter, log_file: Option<PathBuf>) -> Result<Self, String> {
        let collector = LogCollector::new(level, log_file, true)?;
        log::set_boxed_logger(Box::new(collector.clone()))
            .map_err(|e| format!("Failed to install logger: {}", e))?;
        log::set_max_level(level);
        Ok(collector)
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Block until every line queued before this call has been written.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        self.tx
            .send(LogMessage::Flush(ack_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        ack_rx
            .recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

fn open_log_file(path: &Path) -> Result<File, String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| format!("Failed to create log dir: {}", e))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = self
                .tx
                .send(LogMessage::Line(format_line(record.level(), &record.args().to_string())));
        }
    }

    fn flush(&self) {
        let _ = self.wait_for_empty();
    }
}
