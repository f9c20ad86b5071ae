//! Configuration error taxonomy.
//!
//! Every handler failure carries the document line of the node it rejected,
//! so one load failure reads as a single human-actionable message. Loading
//! is not transactional: the first error aborts the walk and the caller is
//! expected to discard the whole server instance.

use thiserror::Error;

use crate::config::configurator::Scope;

/// Error type for configuration loading and listener provisioning.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The raw document could not be turned into a node tree.
    #[error("failed to parse configuration document: {0}")]
    Parse(String),

    /// Wrong node shape, missing mandatory key, or similar structural fault.
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    /// A mapping key that no registered directive claims.
    #[error("line {line}: unknown configuration directive: {name}")]
    UnknownDirective { line: usize, name: String },

    /// A directive used at a scope its registration does not allow.
    #[error("line {line}: directive `{name}` cannot be used at the {scope} level")]
    ScopeViolation {
        line: usize,
        name: String,
        scope: Scope,
    },

    /// A knob value outside its domain.
    #[error("line {line}: {message}")]
    ValueRange { line: usize, message: String },

    /// Conflicting reuse of a resource (duplicate address with an
    /// incompatible proxy-protocol flag, non-socket file at a Unix path).
    #[error("line {line}: {message}")]
    Conflict { line: usize, message: String },

    /// An OS-level socket, filesystem, or resolution failure.
    #[error("line {line}: {context}: {source}")]
    Os {
        line: usize,
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// `owner` named a user the user database does not know.
    #[error("line {line}: failed to obtain uid of user:{user}")]
    UnknownUser { line: usize, user: String },

    /// Scope-exit resolution failure (host scope with no reachable listener).
    #[error("line {line}: {message}")]
    ScopeResolution { line: usize, message: String },
}

impl ConfigError {
    /// Shorthand for a shape/structure complaint anchored at `line`.
    pub fn malformed(line: usize, message: impl Into<String>) -> Self {
        ConfigError::Malformed {
            line,
            message: message.into(),
        }
    }

    /// Wrap an OS error with the failing operation's description.
    pub fn os(line: usize, context: impl Into<String>, source: std::io::Error) -> Self {
        ConfigError::Os {
            line,
            context: context.into(),
            source,
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
