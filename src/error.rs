//! Classified Index Errors
//!
//! Failures raised while indexing are sorted into three classes:
//! - **Transient**: the storage layer was momentarily unavailable. The item is retried.
//! - **Structural**: a table or translation is missing. The item is skipped.
//! - **Fatal**: anything else. The build stops and the operator sees a stable code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("storage refused the connection: too many connections ({0})")]
    TooManyConnections(String),

    #[error("lock wait timeout exceeded ({0})")]
    LockWaitTimeout(String),

    #[error("packet bigger than the allowed maximum ({0})")]
    PacketTooLarge(String),

    #[error("table `{table}` does not exist for role {role}")]
    MissingTable { table: String, role: String },

    #[error("no translation of {doc_type} {id} for language `{lang}`")]
    MissingTranslation {
        doc_type: String,
        id: u64,
        lang: String,
    },

    #[error("{doc_type} {id} not found")]
    EntityNotFound { doc_type: String, id: u64 },

    #[error("invalid build state transition: {0}")]
    InvalidTransition(String),

    #[error("another build is already running")]
    BuildInProgress,

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How the pipeline reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Structural,
    Fatal,
}

/// Stable numeric codes shown to operators next to a failed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TooManyConnections,
    LockWaitTimeout,
    PacketTooLarge,
    MissingTable,
    MissingTranslation,
    Conflict,
    Unclassified,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::TooManyConnections => 1040,
            ErrorCode::LockWaitTimeout => 1205,
            ErrorCode::PacketTooLarge => 1153,
            ErrorCode::MissingTable => 404,
            ErrorCode::MissingTranslation => 405,
            ErrorCode::Conflict => 409,
            ErrorCode::Unclassified => 500,
        }
    }

    /// Remediation text for the operator.
    pub fn hint(self) -> &'static str {
        match self {
            ErrorCode::TooManyConnections => {
                "The database ran out of connection slots. Raise max_connections or retry the build when traffic is lower."
            }
            ErrorCode::LockWaitTimeout => {
                "A row lock was held too long. Raise innodb_lock_wait_timeout or retry the build."
            }
            ErrorCode::PacketTooLarge => {
                "A single write exceeded max_allowed_packet. Raise it or lower indexer.item_set_size."
            }
            ErrorCode::MissingTable => {
                "Index tables are missing. Start a new build to recreate them."
            }
            ErrorCode::MissingTranslation => {
                "A document has no translation and no default-language copy."
            }
            ErrorCode::Conflict => "Wait for the running build to finish or cancel it first.",
            ErrorCode::Unclassified => "Check the logs (show-logs) for the failing item.",
        }
    }
}

impl IndexError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IndexError::TooManyConnections(_) | IndexError::LockWaitTimeout(_) => {
                ErrorClass::Transient
            }
            IndexError::MissingTable { .. }
            | IndexError::MissingTranslation { .. }
            | IndexError::EntityNotFound { .. } => ErrorClass::Structural,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            IndexError::TooManyConnections(_) => ErrorCode::TooManyConnections,
            IndexError::LockWaitTimeout(_) => ErrorCode::LockWaitTimeout,
            IndexError::PacketTooLarge(_) => ErrorCode::PacketTooLarge,
            IndexError::MissingTable { .. } => ErrorCode::MissingTable,
            IndexError::MissingTranslation { .. } | IndexError::EntityNotFound { .. } => {
                ErrorCode::MissingTranslation
            }
            IndexError::InvalidTransition(_) | IndexError::BuildInProgress => ErrorCode::Conflict,
            IndexError::Storage(msg) => classify_storage_message(msg),
            IndexError::Other(_) => ErrorCode::Unclassified,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Maps raw storage driver messages onto the stable codes.
fn classify_storage_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    if lower.contains("too many connections") || lower.contains("max_user_connections") {
        ErrorCode::TooManyConnections
    } else if lower.contains("lock wait timeout") {
        ErrorCode::LockWaitTimeout
    } else if lower.contains("max_allowed_packet") || lower.contains("packet bigger") {
        ErrorCode::PacketTooLarge
    } else {
        ErrorCode::Unclassified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(IndexError::LockWaitTimeout("wordlist".into()).is_transient());
        assert!(IndexError::TooManyConnections("pool".into()).is_transient());
        assert!(!IndexError::PacketTooLarge("insert".into()).is_transient());
    }

    #[test]
    fn test_structural_errors_are_skipped() {
        let err = IndexError::MissingTable {
            table: "readable".into(),
            role: "staging".into(),
        };
        assert_eq!(err.class(), ErrorClass::Structural);
    }

    #[test]
    fn test_stable_codes() {
        assert_eq!(
            IndexError::LockWaitTimeout(String::new()).code().as_u32(),
            1205
        );
        assert_eq!(
            IndexError::Storage("ERROR: Too many connections".into())
                .code()
                .as_u32(),
            1040
        );
        assert_eq!(
            IndexError::Storage("Got a packet bigger than 'max_allowed_packet' bytes".into())
                .code(),
            ErrorCode::PacketTooLarge
        );
        assert_eq!(
            IndexError::Other(anyhow::anyhow!("boom")).code(),
            ErrorCode::Unclassified
        );
    }
}
