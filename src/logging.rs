//! Pluggable sink for engine output.
//!
//! The crate itself logs through the `log` facade. Lines emitted by the
//! engine process on stdout/stderr go to a [`LogSink`] so a host can route
//! them somewhere other than its own log stream.

use log::Level;

/// Log target used by [`ConsoleSink`].
pub const ENGINE_TARGET: &str = "fhir_validator::engine";

/// Receives engine output lines.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// Default sink: forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: ENGINE_TARGET, level, "{}", message);
    }
}

impl<F> LogSink for F
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn log(&self, level: Level, message: &str) {
        self(level, message)
    }
}
