//! Centralized logging configuration for the interpreter.
//!
//! This module provides a unified logging system configured by the frontend
//! rather than scattered environment variables.
//!
//! # Architecture
//!
//! - **LogConfig**: Thread-safe global configuration using atomic operations
//! - **LogLevel**: Hierarchical log levels (Off < Error < Warn < Info < Debug < Trace)
//! - **LogCategory**: Different logging categories (Cpu, Memory, Syscall)
//! - **log()**: Common logging function for all output with async file I/O
//!
//! Logging is non-blocking: file output goes through a channel to a
//! background writer thread, and disabled categories cost nothing because
//! messages are built lazily.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Mutex;
use std::thread;

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Log category for different interpreter components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// CPU execution (per-instruction tracing, decode diagnostics)
    Cpu,
    /// Memory and image loading
    Memory,
    /// Syscall dispatch
    Syscall,
}

/// Global logging configuration
pub struct LogConfig {
    /// Global log level (applies to all categories unless overridden)
    global_level: AtomicU8,
    /// CPU-specific log level
    cpu_level: AtomicU8,
    /// Memory-specific log level
    memory_level: AtomicU8,
    /// Syscall-specific log level
    syscall_level: AtomicU8,
    /// Channel for sending log messages to background thread
    log_sender: Mutex<Option<Sender<String>>>,
    /// Flag indicating if logging to file is enabled
    file_logging_enabled: AtomicBool,
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            cpu_level: AtomicU8::new(LogLevel::Off as u8),
            memory_level: AtomicU8::new(LogLevel::Off as u8),
            syscall_level: AtomicU8::new(LogLevel::Off as u8),
            log_sender: Mutex::new(None),
            file_logging_enabled: AtomicBool::new(false),
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        use std::sync::OnceLock;
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    /// Set the global log level (applies to all categories unless overridden)
    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level.to_u8(), Ordering::Relaxed);
    }

    /// Get the global log level
    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    fn level_atomic(&self, category: LogCategory) -> &AtomicU8 {
        match category {
            LogCategory::Cpu => &self.cpu_level,
            LogCategory::Memory => &self.memory_level,
            LogCategory::Syscall => &self.syscall_level,
        }
    }

    /// Set log level for a specific category
    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.level_atomic(category)
            .store(level.to_u8(), Ordering::Relaxed);
    }

    /// Get log level for a specific category
    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.level_atomic(category).load(Ordering::Relaxed))
    }

    /// Check if a message should be logged for the given category and level
    ///
    /// Returns true if:
    /// 1. The category-specific level is set and >= the message level, OR
    /// 2. The category-specific level is Off AND the global level >= the message level
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Reset all logging to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        self.set_level(LogCategory::Cpu, LogLevel::Off);
        self.set_level(LogCategory::Memory, LogLevel::Off);
        self.set_level(LogCategory::Syscall, LogLevel::Off);
    }

    /// Set the log file path
    ///
    /// Starts a background thread for async file I/O so file output never
    /// stalls the interpreter loop. If a logging thread is already running
    /// it is replaced.
    pub fn set_log_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let (sender, receiver) = channel::<String>();

        thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                let mut file = file;
                while let Ok(message) = receiver.recv() {
                    // Logging must never crash the interpreter
                    let _ = writeln!(file, "{}", message);
                    let _ = file.flush();
                }
                let _ = file.flush();
            })?;

        let mut log_sender = self.log_sender.lock().unwrap();
        *log_sender = Some(sender);
        self.file_logging_enabled.store(true, Ordering::Relaxed);

        Ok(())
    }

    /// Close the log file and return to stderr output
    pub fn clear_log_file(&self) {
        let mut log_sender = self.log_sender.lock().unwrap();
        *log_sender = None;
        self.file_logging_enabled.store(false, Ordering::Relaxed);
        // Thread stops when the sender is dropped
    }

    fn write_message(&self, message: &str) {
        if self.file_logging_enabled.load(Ordering::Relaxed) {
            let log_sender = self.log_sender.lock().unwrap();
            if let Some(ref sender) = *log_sender {
                if sender.send(message.to_string()).is_err() {
                    eprintln!("{}", message);
                }
            } else {
                eprintln!("{}", message);
            }
        } else {
            eprintln!("{}", message);
        }
    }
}

/// Log a message with the specified category and level
///
/// The message is lazily evaluated via a closure, so formatting only
/// happens when logging is actually enabled for the given category and
/// level.
///
/// # Examples
///
/// ```rust
/// use mips_core::logging::{log, LogCategory, LogLevel};
///
/// log(LogCategory::Cpu, LogLevel::Trace, || {
///     format!("pc={:#010X}", 0x40)
/// });
/// ```
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if config.should_log(category, level) {
        let message = message_fn();
        config.write_message(&message);
    }
}
