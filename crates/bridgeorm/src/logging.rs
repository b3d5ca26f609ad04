//! `tracing` events for every command sent to a backend.
//!
//! Events use the target `bridgeorm.command` and are emitted **before** the
//! command reaches the driver, so failed commands are logged too. Install any
//! `tracing` subscriber to see them.

use crate::compile::CompiledCommand;
use tracing::Level;

/// Target used for all command events.
pub const COMMAND_TARGET: &str = "bridgeorm.command";

/// Command logging settings carried by every executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLog {
    pub enabled: bool,
    /// Tracing event level to emit at.
    pub level: Level,
    /// Truncate long commands (in bytes, on a char boundary). `None` means no truncation.
    pub max_command_length: Option<usize>,
}

impl Default for CommandLog {
    fn default() -> Self {
        Self {
            enabled: true,
            level: Level::DEBUG,
            max_command_length: Some(200),
        }
    }
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that never emits.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn max_command_length(mut self, len: usize) -> Self {
        self.max_command_length = Some(len);
        self
    }

    pub fn no_truncate(mut self) -> Self {
        self.max_command_length = None;
        self
    }

    pub(crate) fn truncate(&self, text: &str) -> String {
        match self.max_command_length {
            Some(max) if text.len() > max => format!("{}...", truncate_bytes(text, max)),
            _ => text.to_string(),
        }
    }

    /// Log a compiled command about to be sent.
    pub fn command(&self, backend: &'static str, command: &CompiledCommand) {
        if !self.enabled {
            return;
        }
        let bind_count = command.as_sql().map_or(0, |sql| sql.values.len());
        self.emit(backend, &command.operation().to_string(), &command.to_string(), bind_count);
    }

    /// Log a backend statement that did not come from a builder (`BEGIN`, sequence bumps, ...).
    pub fn statement(&self, backend: &'static str, operation: &str, text: &str) {
        if self.enabled {
            self.emit(backend, operation, text, 0);
        }
    }

    fn emit(&self, backend: &'static str, operation: &str, text: &str, bind_count: usize) {
        macro_rules! emit_at_level {
            ($level:expr, $($field:tt)*) => {
                match $level {
                    Level::ERROR => tracing::error!($($field)*),
                    Level::WARN  => tracing::warn!($($field)*),
                    Level::INFO  => tracing::info!($($field)*),
                    Level::DEBUG => tracing::debug!($($field)*),
                    Level::TRACE => tracing::trace!($($field)*),
                }
            };
        }

        let command = self.truncate(text);
        emit_at_level!(
            self.level,
            target: COMMAND_TARGET,
            backend,
            operation,
            bind_count,
            command = %command,
        );
    }
}

/// Strip credentials from a connection URL before it appears in a message.
pub(crate) fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(None);
            let _ = parsed.set_username("");
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

fn truncate_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
