//! Classification of executor errors into retryable and permanent.
//!
//! This table is the single source of truth; both the unary retry helper and
//! the `grpc_task` handler consult it.

use thiserror::Error;
use tonic::Code;

/// An error surfaced by a remote executor call, normalized for retry policy.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    /// Upper-snake code, either a transport code name or an application code
    /// carried in an `error` stream variant.
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl RpcError {
    /// Classify a transport-level status.
    pub fn from_status(status: &tonic::Status) -> Self {
        Self {
            code: code_name(status.code()).to_owned(),
            message: status.message().to_owned(),
            retryable: is_retryable(status.code()),
        }
    }

    /// Wrap an application error reported inside the response stream.
    pub fn application(code: String, message: String, retryable: bool) -> Self {
        Self {
            code,
            message,
            retryable,
        }
    }
}

/// Whether a transport code is worth retrying.
///
/// Unknown and unmapped codes retry conservatively.
pub fn is_retryable(code: Code) -> bool {
    match code {
        Code::Unavailable
        | Code::ResourceExhausted
        | Code::Aborted
        | Code::DeadlineExceeded
        | Code::Internal => true,
        Code::InvalidArgument
        | Code::NotFound
        | Code::AlreadyExists
        | Code::PermissionDenied
        | Code::FailedPrecondition
        | Code::Unimplemented
        | Code::Unauthenticated => false,
        _ => true,
    }
}

fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "CANCELLED",
        Code::Unknown => "UNKNOWN",
        Code::InvalidArgument => "INVALID_ARGUMENT",
        Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
        Code::NotFound => "NOT_FOUND",
        Code::AlreadyExists => "ALREADY_EXISTS",
        Code::PermissionDenied => "PERMISSION_DENIED",
        Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
        Code::FailedPrecondition => "FAILED_PRECONDITION",
        Code::Aborted => "ABORTED",
        Code::OutOfRange => "OUT_OF_RANGE",
        Code::Unimplemented => "UNIMPLEMENTED",
        Code::Internal => "INTERNAL",
        Code::Unavailable => "UNAVAILABLE",
        Code::DataLoss => "DATA_LOSS",
        Code::Unauthenticated => "UNAUTHENTICATED",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retryable_codes() {
        for code in [
            Code::Unavailable,
            Code::ResourceExhausted,
            Code::Aborted,
            Code::DeadlineExceeded,
            Code::Internal,
        ] {
            assert!(is_retryable(code), "{code:?} should retry");
        }
    }

    #[test]
    fn permanent_codes() {
        for code in [
            Code::InvalidArgument,
            Code::NotFound,
            Code::AlreadyExists,
            Code::PermissionDenied,
            Code::FailedPrecondition,
            Code::Unimplemented,
            Code::Unauthenticated,
        ] {
            assert!(!is_retryable(code), "{code:?} should not retry");
        }
    }

    #[test]
    fn unknown_codes_retry_conservatively() {
        assert!(is_retryable(Code::Unknown));
        assert!(is_retryable(Code::DataLoss));
        assert!(is_retryable(Code::Cancelled));
    }

    #[test]
    fn status_conversion_keeps_message() {
        let status = tonic::Status::unavailable("backend down");
        let err = RpcError::from_status(&status);
        assert_eq!(err.code, "UNAVAILABLE");
        assert_eq!(err.message, "backend down");
        assert!(err.retryable);
    }
}
