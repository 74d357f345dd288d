use crate::log::{LogMessage, Severity};
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, PoisonError};

/// Global logger instance
static GLOBAL_LOGGER: OnceLock<Logger> = OnceLock::new();

const LOG_FILE_MAX_SIZE: u64 = 1024 * 1024; // 1MB
const LOG_FILE_MAX_COUNT: usize = 5;
const LOG_FILE_NAME: &str = "tempoclock.log";

/// File-based log writer with rotation
#[derive(Debug)]
pub struct LogFileWriter {
    log_dir: PathBuf,
    current_file: Option<File>,
    current_size: u64,
}

impl LogFileWriter {
    /// Creates a writer in `<config_dir>/tempoclock/logs`.
    pub fn new() -> Result<Self, std::io::Error> {
        let mut log_dir = dirs::config_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        log_dir.push("tempoclock");
        log_dir.push("logs");
        Self::in_directory(log_dir)
    }

    pub fn in_directory(log_dir: PathBuf) -> Result<Self, std::io::Error> {
        create_dir_all(&log_dir)?;
        Ok(LogFileWriter {
            log_dir,
            current_file: None,
            current_size: 0,
        })
    }

    fn current_log_path(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }

    fn archived_log_path(&self, index: usize) -> PathBuf {
        self.log_dir.join(format!("{}.{}", LOG_FILE_NAME, index))
    }

    fn rotate_logs(&mut self) -> Result<(), std::io::Error> {
        self.current_file = None;

        let oldest = self.archived_log_path(LOG_FILE_MAX_COUNT - 1);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for i in (1..LOG_FILE_MAX_COUNT - 1).rev() {
            let old_path = self.archived_log_path(i);
            if old_path.exists() {
                std::fs::rename(&old_path, self.archived_log_path(i + 1))?;
            }
        }

        let current_path = self.current_log_path();
        if current_path.exists() {
            std::fs::rename(&current_path, self.archived_log_path(1))?;
        }

        self.current_size = 0;
        Ok(())
    }

    fn ensure_file_open(&mut self) -> Result<(), std::io::Error> {
        if self.current_file.is_none() {
            let path = self.current_log_path();
            self.current_file = Some(OpenOptions::new().create(true).append(true).open(&path)?);
            if let Ok(metadata) = std::fs::metadata(&path) {
                self.current_size = metadata.len();
            }
        }
        Ok(())
    }

    pub fn write_log(&mut self, log_msg: &LogMessage) -> Result<(), std::io::Error> {
        self.ensure_file_open()?;

        let formatted_log = format!("{}\n", log_msg);
        let log_bytes = formatted_log.as_bytes();

        if self.current_size + log_bytes.len() as u64 > LOG_FILE_MAX_SIZE {
            self.rotate_logs()?;
            self.ensure_file_open()?;
        }

        if let Some(ref mut file) = self.current_file {
            file.write_all(log_bytes)?;
            file.flush()?;
            self.current_size += log_bytes.len() as u64;
        }

        Ok(())
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.current_log_path()
    }
}

/// Logger operating mode
#[derive(Debug, Clone)]
pub enum LoggerMode {
    /// Logs directly to the terminal.
    Standalone,
    /// Forwards every message to a host application over a channel.
    Embedded(Sender<LogMessage>),
    /// Logs to the rotating log file only.
    File,
    /// Logs to the log file and the terminal.
    Full,
    /// Drops everything.
    Silent,
}

/// Logging mode as it appears in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingMode {
    Standalone,
    File,
    Full,
    Silent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_logging_mode")]
    pub mode: LoggingMode,

    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            mode: default_logging_mode(),
            min_severity: default_min_severity(),
        }
    }
}

fn default_logging_mode() -> LoggingMode {
    LoggingMode::Standalone
}

fn default_min_severity() -> Severity {
    Severity::Info
}

pub struct Logger {
    mode: Mutex<LoggerMode>,
    file_writer: Mutex<Option<LogFileWriter>>,
    min_severity: Mutex<Severity>,
}

fn open_file_writer() -> Option<LogFileWriter> {
    match LogFileWriter::new() {
        Ok(writer) => Some(writer),
        Err(e) => {
            eprintln!("Failed to create log file writer: {}", e);
            None
        }
    }
}

fn print_to_terminal(log_msg: &LogMessage) {
    match log_msg.level {
        Severity::Fatal | Severity::Error => {
            eprintln!("{}", log_msg);
            let _ = std::io::stderr().flush();
        }
        _ => {
            println!("{}", log_msg);
            let _ = std::io::stdout().flush();
        }
    }
}

impl Logger {
    fn with_mode(mode: LoggerMode, file_writer: Option<LogFileWriter>) -> Self {
        Logger {
            mode: Mutex::new(mode),
            file_writer: Mutex::new(file_writer),
            min_severity: Mutex::new(default_min_severity()),
        }
    }

    pub fn new_standalone() -> Self {
        Self::with_mode(LoggerMode::Standalone, None)
    }

    pub fn new_embedded(sender: Sender<LogMessage>) -> Self {
        Self::with_mode(LoggerMode::Embedded(sender), None)
    }

    fn set_mode(&self, mode: LoggerMode) {
        let needs_file = matches!(mode, LoggerMode::File | LoggerMode::Full);
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
        if needs_file {
            let mut file_writer = self
                .file_writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if file_writer.is_none() {
                *file_writer = open_file_writer();
            }
        }
    }

    pub fn set_standalone_mode(&self) {
        self.set_mode(LoggerMode::Standalone);
    }

    pub fn set_file_mode(&self) {
        self.set_mode(LoggerMode::File);
    }

    pub fn set_full_mode(&self) {
        self.set_mode(LoggerMode::Full);
    }

    pub fn set_silent_mode(&self) {
        self.set_mode(LoggerMode::Silent);
    }

    pub fn set_min_severity(&self, level: Severity) {
        *self
            .min_severity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = level;
    }

    pub fn min_severity(&self) -> Severity {
        *self
            .min_severity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a logging section from the configuration file.
    pub fn configure(&self, config: &LoggingConfig) {
        match config.mode {
            LoggingMode::Standalone => self.set_standalone_mode(),
            LoggingMode::File => self.set_file_mode(),
            LoggingMode::Full => self.set_full_mode(),
            LoggingMode::Silent => self.set_silent_mode(),
        }
        self.set_min_severity(config.min_severity);
    }

    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.file_writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|w| w.log_file_path())
    }

    fn write_to_file(&self, log_msg: &LogMessage) {
        let mut file_writer = self
            .file_writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = file_writer.as_mut() {
            if let Err(e) = writer.write_log(log_msg) {
                eprintln!("Failed to write to log file: {}", e);
            }
        }
    }

    pub fn log_message(&self, log_msg: LogMessage) {
        if !log_msg.passes(self.min_severity()) {
            return;
        }
        let mode = self
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match mode {
            LoggerMode::Standalone => print_to_terminal(&log_msg),
            LoggerMode::Embedded(sender) => {
                if sender.try_send(log_msg.clone()).is_err() {
                    // Host went away, the terminal is the fallback
                    eprintln!("Logger channel error: {}", log_msg);
                }
            }
            LoggerMode::File => self.write_to_file(&log_msg),
            LoggerMode::Full => {
                self.write_to_file(&log_msg);
                print_to_terminal(&log_msg);
            }
            LoggerMode::Silent => (),
        }
    }

    pub fn log(&self, level: Severity, msg: String) {
        self.log_message(LogMessage::new(level, msg));
    }

    pub fn debug(&self, msg: String) {
        self.log(Severity::Debug, msg);
    }

    pub fn info(&self, msg: String) {
        self.log(Severity::Info, msg);
    }

    pub fn warn(&self, msg: String) {
        self.log(Severity::Warn, msg);
    }

    pub fn error(&self, msg: String) {
        self.log(Severity::Error, msg);
    }

    pub fn fatal(&self, msg: String) {
        self.log(Severity::Fatal, msg);
    }
}

pub fn init_standalone() {
    let _ = GLOBAL_LOGGER.set(Logger::new_standalone());
}

/// Creates a logging channel pair for embedded mode.
pub fn create_log_channel() -> (Sender<LogMessage>, Receiver<LogMessage>) {
    unbounded()
}

/// Get the global logger instance, standalone unless initialized otherwise.
pub fn get_logger() -> &'static Logger {
    GLOBAL_LOGGER.get_or_init(Logger::new_standalone)
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().debug(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().warn(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().error(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_fatal {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().fatal(format!($($arg)*))
    };
}

/// Logs a message tied to a beat of the timeline.
#[macro_export]
macro_rules! log_at_beat {
    ($level:expr, $beat:expr, $($arg:tt)*) => {
        $crate::logger::get_logger().log_message(
            $crate::log::LogMessage::new($level, format!($($arg)*)).at_beat($beat)
        )
    };
}
