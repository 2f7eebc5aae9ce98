//! Error types for probe cycles and configuration loading

use std::fmt;
use std::path::PathBuf;

/// Result type alias for broker and probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors that can occur while talking to a broker during a probe cycle
///
/// None of these ever escape a cycle: the engine counts them, logs them with
/// the probe's name and moves on to teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Handshake was refused, the URL is unusable, or the connect deadline elapsed
    Connect(String),

    /// Subscription was rejected or not acknowledged in time
    Subscribe(String),

    /// A publish could not be handed to the broker
    Publish(String),

    /// Unsubscribe or disconnect failed
    Teardown(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Connect(msg) => write!(f, "failed to connect client: {}", msg),
            ProbeError::Subscribe(msg) => write!(f, "failed to subscribe: {}", msg),
            ProbeError::Publish(msg) => write!(f, "failed to publish: {}", msg),
            ProbeError::Teardown(msg) => write!(f, "failed to tear down session: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Errors that can occur while loading the exporter configuration
///
/// These are the only fatal errors of the exporter.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file could not be parsed
    Parse { path: PathBuf, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "error reading config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, message } => {
                write!(f, "error parsing config file {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { .. } => None,
        }
    }
}
