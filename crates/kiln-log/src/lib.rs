//! Leveled logging for the `kiln` workspace.
//!
//! A small, dependency-free logger: one global filter held in an atomic, a
//! set of macros that capture the calling module path, and plain-text lines
//! written to stderr.
//!
//! The filter starts at [`Level::Warn`]. It can be changed at runtime with
//! [`set_level`] / [`disable`], or read from the environment once at startup
//! with [`init_from_env`]:
//!
//! - `KILN_LOG` - one of `off`, `error`, `warn`, `info`, `debug`, `trace`
//! - `NO_COLOR` - when set (to anything), ANSI colors are not emitted
//!
//! # Example
//!
//! ```
//! use kiln_log::{debug, warn, Level};
//!
//! kiln_log::set_level(Level::Debug);
//!
//! let blocks = 3;
//! debug!("arena grew to {} blocks", blocks);
//! warn!("marker stack is full");
//! ```

use std::fmt::{self, Arguments};
use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Environment variable holding the initial level filter.
pub const LEVEL_ENV: &str = "KILN_LOG";

/// Environment variable that disables colored output when present.
pub const NO_COLOR_ENV: &str = "NO_COLOR";

/// Severity of a log record, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Failures the caller has to handle.
    Error = 0,
    /// Refused operations and suspicious state.
    Warn = 1,
    /// Lifecycle events.
    Info = 2,
    /// Allocator decisions (region restore, pool reuse).
    Debug = 3,
    /// Per-block detail.
    Trace = 4,
}

impl Level {
    /// All levels, most severe first.
    pub const ALL: [Level; 5] = [
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];

    /// Upper-case name used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn color(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError {
    input: String,
}

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log level: {:?}", self.input)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseLevelError {
                input: s.to_owned(),
            })
    }
}

/// Parses a filter string: a level name, or `off`.
///
/// Returns `Ok(None)` for `off`.
///
/// ```
/// use kiln_log::{parse_filter, Level};
///
/// assert_eq!(parse_filter("debug"), Ok(Some(Level::Debug)));
/// assert_eq!(parse_filter("OFF"), Ok(None));
/// assert!(parse_filter("loud").is_err());
/// ```
pub fn parse_filter(s: &str) -> Result<Option<Level>, ParseLevelError> {
    if s.trim().eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    s.parse().map(Some)
}

/// Global filter and output settings.
///
/// The filter is stored as the number of enabled levels: 0 means logging is
/// off, 5 means everything up to [`Level::Trace`] is emitted.
pub struct Logger {
    enabled_levels: AtomicU8,
    color: AtomicBool,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            enabled_levels: AtomicU8::new(level as u8 + 1),
            color: AtomicBool::new(true),
        }
    }

    /// Emits records at `level` and every more severe level.
    pub fn set_level(&self, level: Level) {
        self.enabled_levels.store(level as u8 + 1, Ordering::Relaxed);
    }

    /// Suppresses every record.
    pub fn disable(&self) {
        self.enabled_levels.store(0, Ordering::Relaxed);
    }

    /// The least severe level still emitted, `None` when disabled.
    pub fn level(&self) -> Option<Level> {
        let enabled = self.enabled_levels.load(Ordering::Relaxed) as usize;
        enabled.checked_sub(1).and_then(|i| Level::ALL.get(i).copied())
    }

    /// Whether a record at `level` would be written.
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        (level as u8) < self.enabled_levels.load(Ordering::Relaxed)
    }

    /// Turns ANSI colors on or off.
    pub fn set_color(&self, color: bool) {
        self.color.store(color, Ordering::Relaxed);
    }

    fn color(&self) -> bool {
        self.color.load(Ordering::Relaxed)
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// The global logger, created on first use with [`Level::Warn`].
pub fn logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Warn))
}

/// Sets the global filter.
pub fn set_level(level: Level) {
    logger().set_level(level);
}

/// Turns global logging off.
pub fn disable() {
    logger().disable();
}

/// Current global filter, `None` when logging is off.
pub fn level() -> Option<Level> {
    logger().level()
}

/// Configures the global logger from `KILN_LOG` and `NO_COLOR`.
///
/// A missing `KILN_LOG` leaves the filter untouched. An unparsable value is
/// reported and also leaves the filter untouched.
///
/// # Errors
///
/// Returns [`ParseLevelError`] when `KILN_LOG` holds an unknown level.
pub fn init_from_env() -> Result<(), ParseLevelError> {
    let logger = logger();
    if std::env::var_os(NO_COLOR_ENV).is_some() {
        logger.set_color(false);
    }
    if let Ok(value) = std::env::var(LEVEL_ENV) {
        match parse_filter(&value)? {
            Some(level) => logger.set_level(level),
            None => logger.disable(),
        }
    }
    Ok(())
}

/// Writes one record. Called by the macros after the level check.
#[doc(hidden)]
pub fn __emit(level: Level, target: &str, args: Arguments<'_>) {
    let logger = logger();
    if !logger.enabled(level) {
        return;
    }

    let mut stderr = std::io::stderr().lock();
    // A failing stderr is not worth panicking over.
    let _ = if logger.color() {
        writeln!(
            stderr,
            "{}[{:<5}]\x1b[0m {target}: {args}",
            level.color(),
            level.as_str()
        )
    } else {
        writeln!(stderr, "[{:<5}] {target}: {args}", level.as_str())
    };
}

/// Logs at an explicit level.
///
/// ```
/// use kiln_log::{log, Level};
///
/// log!(level: Level::Info, "context {} created", 7);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {{
        let level = $level;
        if $crate::logger().enabled(level) {
            $crate::__emit(level, module_path!(), format_args!($($arg)*));
        }
    }};
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Error, $($arg)*) };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Warn, $($arg)*) };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Info, $($arg)*) };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Debug, $($arg)*) };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Trace, $($arg)*) };
}
