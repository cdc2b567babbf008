//! Shared helpers for the stdio protocol surface: the helper's verbosity
//! levels and the stderr tracing used for the conversation with git.
//!
//! Developer-facing diagnostics go through `tracing`; the functions here
//! produce the `error:` / `info:` / `debug:` lines and progress meters that
//! git users see on stderr, gated by the `option verbosity` value the host
//! git process sends.

use std::io::Write;

/// Severity levels of the helper's stderr conversation, ordered so that
/// `level <= verbosity` means "visible".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Error,
    Info,
    Debug,
}

impl Verbosity {
    /// Map the numeric value of `option verbosity N` onto a level.
    /// Values above 2 clamp to `Debug`.
    pub fn from_level(level: u8) -> Verbosity {
        match level {
            0 => Verbosity::Error,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Info
    }
}

/// Write a prefixed message line to stderr when `level` is visible at the
/// current `verbosity`.
pub fn trace(verbosity: Verbosity, level: Verbosity, message: &str) {
    if level > verbosity {
        return;
    }
    let prefix = match level {
        Verbosity::Error => "error",
        Verbosity::Info => "info",
        Verbosity::Debug => "debug",
    };
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{prefix}: {message}");
    let _ = err.flush();
}

/// Write `message` to stderr exactly as given (no prefix, no newline).
/// Used for `\r`-style progress rendering.
pub fn trace_raw(message: &str) {
    let mut err = std::io::stderr().lock();
    let _ = err.write_all(message.as_bytes());
    let _ = err.flush();
}
