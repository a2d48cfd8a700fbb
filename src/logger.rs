//! Structured console logging for the daemon.
//!
//! Output uses box-drawing prefixes so a running daemon's log reads as one
//! continuous tree:
//!
//! ```text
//! ┏ shd v0.3.0 ━━╸
//! ┃
//! ┣ Loading configuration
//! ┃   serial_device: /dev/ttyUSB0
//! ┣[INFO] Modem connection open
//! ╹
//! ```
//!
//! ## Conventions
//!
//! - `log_block_start!` opens a new conceptual block (adds a spacer pipe).
//! - `log_decorated!` continues the current block.
//! - `log_indented!` prints nested details under the previous line.
//! - `log_pipe!` inserts a spacer, mostly before a level macro that starts a block.
//! - `log_version!` / `log_end!` bracket the process lifetime.
//! - `log_info!`, `log_warning!`, `log_error!`, `log_debug!`, `log_critical!`
//!   carry a colored `[LEVEL]` tag.
//!
//! The I/O core does not call the macros directly. It receives a [`Logger`]
//! trait object so tests can silence it with [`NullLogger`] instead of flipping
//! a process-wide switch.

use std::io::Write;
use std::sync::OnceLock;
use std::sync::mpsc::{Sender, channel};

// Set once when `--log FILE` is active.
static LOG_CHANNEL: OnceLock<Sender<LogMessage>> = OnceLock::new();

enum LogMessage {
    Formatted(String),
    Shutdown,
}

/// Entry point for output routing used by the logging macros.
pub struct Log;

impl Log {
    /// Route all further output to `file_path` through a background writer.
    ///
    /// The returned guard flushes and joins the writer when dropped.
    pub fn start_file_logging(file_path: String) -> anyhow::Result<LoggerGuard> {
        let (tx, rx) = channel();

        LOG_CHANNEL
            .set(tx.clone())
            .map_err(|_| anyhow::anyhow!("Logger channel already initialized"))?;

        let handle = std::thread::spawn(move || {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)?;

            loop {
                match rx.recv() {
                    Ok(LogMessage::Formatted(text)) => {
                        file.write_all(text.as_bytes())?;
                        file.flush()?;
                    }
                    Ok(LogMessage::Shutdown) | Err(_) => {
                        file.flush()?;
                        break;
                    }
                }
            }

            Ok::<(), anyhow::Error>(())
        });

        Ok(LoggerGuard {
            tx,
            handle: Some(handle),
        })
    }

    /// Whether output currently goes to a log file.
    pub fn is_file_logging() -> bool {
        LOG_CHANNEL.get().is_some()
    }

    /// Timestamp prefix used by every macro.
    ///
    /// Console output is read live and stays bare. File output is read after
    /// the fact, so each line carries the local wall-clock time.
    pub fn get_timestamp_prefix() -> String {
        if Self::is_file_logging() {
            format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
        } else {
            String::new()
        }
    }
}

/// Guard for file logging that ensures clean shutdown.
pub struct LoggerGuard {
    tx: Sender<LogMessage>,
    handle: Option<std::thread::JoinHandle<anyhow::Result<()>>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(LogMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == 'm' {
                    break;
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

// Public so the exported macros can reach it.
pub fn write_output(text: &str) {
    if let Some(tx) = LOG_CHANNEL.get() {
        let _ = tx.send(LogMessage::Formatted(strip_ansi_codes(text)));
    } else {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

/// Logging capability handed to the I/O core.
///
/// Messages are plain text; the implementation decides on decoration.
pub trait Logger {
    fn error(&self, message: &str);
    fn info(&self, message: &str);
    fn debug(&self, message: &str);
}

/// Logger that forwards to the structured console macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleLogger {
    debug_enabled: bool,
}

impl ConsoleLogger {
    pub fn new(debug_enabled: bool) -> Self {
        Self { debug_enabled }
    }
}

impl Logger for ConsoleLogger {
    fn error(&self, message: &str) {
        crate::log_error!("{message}");
    }

    fn info(&self, message: &str) {
        crate::log_info!("{message}");
    }

    fn debug(&self, message: &str) {
        if self.debug_enabled {
            crate::log_debug!("{message}");
        }
    }
}

/// Logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn error(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
}

// # Logging Macros

/// Format one line with the timestamp prefix and a leading decoration.
#[doc(hidden)]
#[macro_export]
macro_rules! __log_line {
    ($decoration:expr, $($arg:tt)*) => {{
        let prefix = $crate::logger::Log::get_timestamp_prefix();
        let message = format!($($arg)*);
        let formatted = format!("{prefix}{}{message}\n", $decoration);
        $crate::logger::write_output(&formatted);
    }};
}

/// Log a decorated message as part of the current block.
#[macro_export]
macro_rules! log_decorated {
    ($fmt:literal $($arg:tt)*) => {
        $crate::__log_line!("┣ ", $fmt $($arg)*)
    };
    ($expr:expr) => {
        $crate::__log_line!("┣ ", "{}", $expr)
    };
}

/// Log an indented detail line.
#[macro_export]
macro_rules! log_indented {
    ($fmt:literal $($arg:tt)*) => {
        $crate::__log_line!("┃   ", $fmt $($arg)*)
    };
    ($expr:expr) => {
        $crate::__log_line!("┃   ", "{}", $expr)
    };
}

/// Log a visual pipe separator for vertical spacing.
#[macro_export]
macro_rules! log_pipe {
    () => {
        $crate::__log_line!("┃", "")
    };
}

/// Start a new conceptual block of output.
#[macro_export]
macro_rules! log_block_start {
    ($fmt:literal $($arg:tt)*) => {{
        $crate::log_pipe!();
        $crate::__log_line!("┣ ", $fmt $($arg)*)
    }};
    ($expr:expr) => {{
        $crate::log_pipe!();
        $crate::__log_line!("┣ ", "{}", $expr)
    }};
}

/// Log the application version header.
#[macro_export]
macro_rules! log_version {
    () => {
        $crate::__log_line!("┏ ", "shd v{} ━━╸", env!("CARGO_PKG_VERSION"))
    };
}

/// Log the final termination marker.
#[macro_export]
macro_rules! log_end {
    () => {
        $crate::__log_line!("╹", "")
    };
}

/// Log a warning with a yellow tag.
#[macro_export]
macro_rules! log_warning {
    ($fmt:literal $($arg:tt)*) => {
        $crate::__log_line!("┣[\x1b[33mWARNING\x1b[0m] ", $fmt $($arg)*)
    };
    ($expr:expr) => {
        $crate::__log_line!("┣[\x1b[33mWARNING\x1b[0m] ", "{}", $expr)
    };
}

/// Log an error with a red tag.
#[macro_export]
macro_rules! log_error {
    ($fmt:literal $($arg:tt)*) => {
        $crate::__log_line!("┣[\x1b[31mERROR\x1b[0m] ", $fmt $($arg)*)
    };
    ($expr:expr) => {
        $crate::__log_line!("┣[\x1b[31mERROR\x1b[0m] ", "{}", $expr)
    };
}

/// Log an error that terminates the current flow.
#[macro_export]
macro_rules! log_error_exit {
    ($fmt:literal $($arg:tt)*) => {{
        $crate::log_pipe!();
        $crate::__log_line!("┗[\x1b[31mERROR\x1b[0m] ", $fmt $($arg)*)
    }};
    ($expr:expr) => {{
        $crate::log_pipe!();
        $crate::__log_line!("┗[\x1b[31mERROR\x1b[0m] ", "{}", $expr)
    }};
}

/// Log an informational message with a green tag.
#[macro_export]
macro_rules! log_info {
    ($fmt:literal $($arg:tt)*) => {
        $crate::__log_line!("┣[\x1b[32mINFO\x1b[0m] ", $fmt $($arg)*)
    };
    ($expr:expr) => {
        $crate::__log_line!("┣[\x1b[32mINFO\x1b[0m] ", "{}", $expr)
    };
}

/// Log a debug message with a cyan tag.
#[macro_export]
macro_rules! log_debug {
    ($fmt:literal $($arg:tt)*) => {
        $crate::__log_line!("┣[\x1b[36mDEBUG\x1b[0m] ", $fmt $($arg)*)
    };
    ($expr:expr) => {
        $crate::__log_line!("┣[\x1b[36mDEBUG\x1b[0m] ", "{}", $expr)
    };
}

/// Log a critical message with a red tag.
#[macro_export]
macro_rules! log_critical {
    ($fmt:literal $($arg:tt)*) => {
        $crate::__log_line!("┣[\x1b[31mCRITICAL\x1b[0m] ", $fmt $($arg)*)
    };
    ($expr:expr) => {
        $crate::__log_line!("┣[\x1b[31mCRITICAL\x1b[0m] ", "{}", $expr)
    };
}
