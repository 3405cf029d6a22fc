//! Error types for Parlor.

use thiserror::Error;

use crate::store::StoreError;

/// Common error type for Parlor.
///
/// Everything except `Internal`, `Config`, `Io` and `Database` is reported to
/// the acting connection only and never changes shared room state.
#[derive(Error, Debug)]
pub enum ParlorError {
    /// Malformed arguments or input.
    #[error("{0}")]
    Validation(String),

    /// Insufficient admin tier, or the target is protected.
    #[error("{0}")]
    Authorization(String),

    /// Target user, message, mute or ban does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The account store could not serve the request.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The connection has not logged in yet.
    #[error("you must log in first")]
    NotAuthenticated,

    /// The identity or its IP address is banned.
    #[error("banned: {0}")]
    Banned(String),

    /// The identity is muted.
    #[error("you are muted for another {remaining_secs} seconds")]
    Muted {
        /// Seconds until the mute expires (rounded up).
        remaining_secs: i64,
    },

    /// The identity is sending too fast.
    #[error("you are sending messages too fast, try again in {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds until another message is accepted.
        retry_after_secs: u64,
    },

    /// A slash command produced an error result.
    #[error("{0}")]
    Command(String),

    /// Unexpected failure inside a handler. The text is all the client sees.
    #[error("{0}")]
    Internal(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for ParlorError {
    fn from(e: sqlx::Error) -> Self {
        ParlorError::Database(e.to_string())
    }
}

impl From<StoreError> for ParlorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ParlorError::NotFound(format!("{what} not found")),
            StoreError::Forbidden(why) => ParlorError::Authorization(why),
            StoreError::InvalidCredentials => {
                ParlorError::Authorization("invalid username or password".to_string())
            }
            StoreError::Conflict(why) | StoreError::Invalid(why) => ParlorError::Validation(why),
            StoreError::Unavailable(cause) => ParlorError::StorageUnavailable(cause),
        }
    }
}

/// Result type alias for Parlor operations.
pub type Result<T> = std::result::Result<T, ParlorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_muted_display() {
        let err = ParlorError::Muted { remaining_secs: 4 };
        assert_eq!(err.to_string(), "you are muted for another 4 seconds");
    }

    #[test]
    fn test_storage_unavailable_display() {
        let err = ParlorError::StorageUnavailable("pool closed".to_string());
        assert_eq!(err.to_string(), "storage unavailable: pool closed");
    }

    #[test]
    fn test_store_error_mapping() {
        let err: ParlorError = StoreError::NotFound("message".to_string()).into();
        assert!(matches!(err, ParlorError::NotFound(_)));
        assert_eq!(err.to_string(), "message not found");

        let err: ParlorError = StoreError::Forbidden("not your message".to_string()).into();
        assert!(matches!(err, ParlorError::Authorization(_)));

        let err: ParlorError = StoreError::InvalidCredentials.into();
        assert!(matches!(err, ParlorError::Authorization(_)));

        let err: ParlorError = StoreError::Unavailable("down".to_string()).into();
        assert!(matches!(err, ParlorError::StorageUnavailable(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ParlorError = io_err.into();
        assert!(matches!(err, ParlorError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
