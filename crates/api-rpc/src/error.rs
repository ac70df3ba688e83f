//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes. Backend failures keep
//! their detail in the server log; the wire gets the code and a short label
//! only, so storage paths and SQL text never reach a client.

use gradekeep_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;
use tracing::error;

/// RPC Error Codes
pub mod code {
    pub const INVALID_PARAMS: i32 = 4000;
    pub const NOT_FOUND: i32 = 4004;
    pub const NOT_FINISHED: i32 = 4009;
    pub const RATE_LIMITED: i32 = 4029;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const STORAGE_ERROR: i32 = 5001;
    pub const QUEUE_ERROR: i32 = 5002;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => {
            ErrorObjectOwned::owned(code::INVALID_PARAMS, msg, None::<()>)
        }
        AppError::Domain(e) => {
            ErrorObjectOwned::owned(code::INVALID_PARAMS, e.to_string(), None::<()>)
        }
        AppError::Serialization(e) => {
            ErrorObjectOwned::owned(code::INVALID_PARAMS, e.to_string(), None::<()>)
        }
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::InvalidState(msg) => {
            ErrorObjectOwned::owned(code::NOT_FINISHED, msg, None::<()>)
        }
        AppError::Conflict(msg) => ErrorObjectOwned::owned(code::QUEUE_ERROR, msg, None::<()>),
        AppError::Database(msg) => {
            error!(error = %msg, "Storage error behind RPC");
            ErrorObjectOwned::owned(code::STORAGE_ERROR, "Storage backend error", None::<()>)
        }
        AppError::Store(e) => {
            error!(error = %e, "Log store error behind RPC");
            ErrorObjectOwned::owned(code::STORAGE_ERROR, "Storage backend error", None::<()>)
        }
        AppError::Io(e) => {
            error!(error = %e, "IO error behind RPC");
            ErrorObjectOwned::owned(code::STORAGE_ERROR, "Storage backend error", None::<()>)
        }
        AppError::Launch(e) => {
            error!(error = %e, "Launch error behind RPC");
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, "Internal server error", None::<()>)
        }
        AppError::Config(msg) => {
            error!(error = %msg, "Config error behind RPC");
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, "Internal server error", None::<()>)
        }
        AppError::Internal(msg) => {
            error!(error = %msg, "Internal error behind RPC");
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, "Internal server error", None::<()>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_passes_through() {
        let err = to_rpc_error(AppError::Validation("path must not be empty".to_string()));
        assert_eq!(err.code(), code::INVALID_PARAMS);
        assert_eq!(err.message(), "path must not be empty");
    }

    #[test]
    fn test_backend_detail_is_sanitized() {
        let err = to_rpc_error(AppError::Database(
            "sqlite /var/lib/gradekeep/queue.db is locked".to_string(),
        ));
        assert_eq!(err.code(), code::STORAGE_ERROR);
        assert_eq!(err.message(), "Storage backend error");

        let err = to_rpc_error(AppError::Internal("panic in handler".to_string()));
        assert_eq!(err.code(), code::INTERNAL_ERROR);
        assert_eq!(err.message(), "Internal server error");
    }
}
