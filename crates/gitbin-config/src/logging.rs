//! Structured logging for git-bin components.
//!
//! Every event carries a `component` field so filter runs can be told apart
//! when git invokes several of them in one checkout.
//!
//! # Usage
//!
//! ```ignore
//! use gitbin_config::log_clean_info;
//!
//! log_clean_info!("chunk stored", id = id.as_str(), bytes = 4096);
//! ```
//!
//! Output always goes to STDERR. STDOUT belongs to git: it carries the
//! manifest or the restored file.

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const CLEAN: &'static str = "CLEAN";
    pub const SMUDGE: &'static str = "SMUDGE";
    pub const PUSH: &'static str = "PUSH";
    pub const CACHE: &'static str = "CACHE";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === CLEAN logging macros ===

#[macro_export]
macro_rules! log_clean_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CLEAN, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_clean_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CLEAN, $($key = $value,)* $msg)
    };
}

// === SMUDGE logging macros ===

#[macro_export]
macro_rules! log_smudge_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::SMUDGE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_smudge_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::SMUDGE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_smudge_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::SMUDGE, $($key = $value,)* $msg)
    };
}

// === PUSH logging macros ===

#[macro_export]
macro_rules! log_push_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::PUSH, $($key = $value,)* $msg)
    };
}

// === CACHE logging macros ===

#[macro_export]
macro_rules! log_cache_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CACHE, $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given default level.
///
/// `GITBIN_LOG` wins over `RUST_LOG`; either overrides `level`. Call once at
/// startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("GITBIN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // try_init: a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
