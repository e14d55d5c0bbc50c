//! Leveled logging for the `amalgam` runtime.
//!
//! A tiny, dependency-free logger with module path capture and colored
//! level tags. Messages go to stderr so that hosts embedding the runtime keep
//! their stdout clean.
//!
//! The level is global and atomic. It starts at [`Level::Warn`]; hosts raise
//! it with [`set_level`] or by exporting `AMALGAM_LOG` and calling
//! [`init_from_env`].
//!
//! # Example
//!
//! ```
//! use amalgam_log::{debug, info, warn, Level};
//!
//! amalgam_log::set_level(Level::Debug);
//!
//! let mixins = 3;
//! info!("object mutated, {} mixins attached", mixins);
//! debug!("call table: {:?}", [0, 2, 1]);
//! warn!("late registration of {}", "physics");
//! ```

use std::fmt::Arguments;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Environment variable read by [`init_from_env`].
pub const ENV_VAR: &str = "AMALGAM_LOG";

/// Severity of a log message. Lower values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Returns the upper-case tag printed in front of messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

impl FromStr for Level {
    type Err = String;

    /// Parses a level name, case-insensitively.
    ///
    /// ```
    /// use amalgam_log::Level;
    ///
    /// assert_eq!("debug".parse::<Level>(), Ok(Level::Debug));
    /// assert!("loud".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("invalid log level: {s}")),
        }
    }
}

/// Global logger state.
pub struct Logger {
    level: AtomicU8,
    enabled: AtomicBool,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            enabled: AtomicBool::new(true),
        }
    }

    /// Sets the minimum level and turns output back on.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Silences every level, including errors.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Returns the current minimum level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Returns `true` if a message at `level` would be printed.
    pub fn enabled(&self, level: Level) -> bool {
        self.enabled.load(Ordering::Relaxed)
            && level as u8 <= self.level.load(Ordering::Relaxed)
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the global logger, creating it at [`Level::Warn`] on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Warn))
}

/// Sets the minimum level of the global logger.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Applies a filter string: a level name, or `off` to silence output.
///
/// # Errors
///
/// Returns a description of the problem when `filter` is neither a level
/// name nor `off`.
pub fn set_filter(filter: &str) -> Result<(), String> {
    if filter.trim().eq_ignore_ascii_case("off") {
        get_logger().disable();
        return Ok(());
    }
    set_level(filter.parse()?);
    Ok(())
}

/// Configures the global logger from `AMALGAM_LOG`.
///
/// Returns `true` when the variable was present and valid. An invalid value
/// leaves the level unchanged.
pub fn init_from_env() -> bool {
    match std::env::var(ENV_VAR) {
        Ok(value) => set_filter(&value).is_ok(),
        Err(_) => false,
    }
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments) {
    const RESET: &str = "\x1b[0m";

    if !get_logger().enabled(level) {
        return;
    }

    eprintln!("{}[{}]{RESET} {target}: {args}", level.color_code(), level.as_str());
}

/// Logs at an explicit level, capturing the caller's module path.
///
/// ```
/// use amalgam_log::{log, Level};
///
/// log!(level: Level::Info, "{} objects alive", 12);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::get_logger().enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}
