// Error Types
//
// Configuration errors fail fast at registration time. Platform query and
// action failures are logged by the layer that sees them and never abort
// the monitor.

use thiserror::Error;

/// Crate level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("can't parse events '{0}'")]
    InvalidEvent(String),

    #[error("rule '{rule}': required attribute '{attribute}' is missing")]
    MissingAttribute { rule: String, attribute: String },

    #[error("rule '{rule}': invalid value '{value}' for attribute '{attribute}'")]
    InvalidAttribute {
        rule: String,
        attribute: String,
        value: String,
    },

    #[error("session monitor is already active")]
    AlreadyActive,

    #[error("notification channel failed: {0}")]
    Notifier(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure querying session attributes from the platform
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("malformed session record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure running a bound action
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action '{action}' failed: {reason}")]
    Failed { action: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
