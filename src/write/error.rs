//! Session error taxonomy.
//!
//! Every variant except `RowTooLarge` leaves the session unusable; the
//! caller is expected to `abort()` and fail its enclosing unit of work.

use crate::write::client::RpcStatus;
use crate::write::config::ConfigError;
use crate::write::retry::RetryError;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Committed,
    Aborted,
    /// A flush or finalize failed; only `abort` is allowed
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Open => "open",
            SessionState::Committed => "committed",
            SessionState::Aborted => "aborted",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why an append request was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendFailure {
    /// Response never arrived
    Transport(RpcStatus),
    /// Session cancelled while waiting for the response
    Interrupted,
    /// Server rejected the request
    Server(RpcStatus),
    /// Server acknowledged a different offset than requested
    OffsetMismatch { expected: u64, actual: u64 },
}

impl std::fmt::Display for AppendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppendFailure::Transport(status) => {
                write!(f, "could not retrieve append response: {}", status)
            }
            AppendFailure::Interrupted => write!(f, "interrupted while awaiting append response"),
            AppendFailure::Server(status) => {
                write!(f, "append request failed with error: {}", status.message)
            }
            AppendFailure::OffsetMismatch { expected, actual } => write!(
                f,
                "offset {} did not match expected offset {}",
                actual, expected
            ),
        }
    }
}

/// Why finalization failed
#[derive(Debug, Clone)]
pub enum FinalizationFailure {
    Retry(RetryError),
    /// Cancelled during the pre-finalize quiescence wait
    Interrupted,
    /// Server's row count disagrees with the rows this session appended
    RowCountMismatch { expected: u64, actual: u64 },
}

impl std::fmt::Display for FinalizationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalizationFailure::Retry(e) => write!(f, "{}", e),
            FinalizationFailure::Interrupted => {
                write!(f, "interrupted while waiting before finalization")
            }
            FinalizationFailure::RowCountMismatch { expected, actual } => write!(
                f,
                "expected finalized row count {} but received {}",
                expected, actual
            ),
        }
    }
}

#[derive(Debug)]
pub enum WriteStreamError {
    /// A single row exceeds the per-request ceiling; no batching can fit it
    RowTooLarge { size: usize, max: usize },
    Config(ConfigError),
    StreamCreation {
        table_path: String,
        source: RetryError,
    },
    AppenderSetup {
        stream_name: String,
        source: std::io::Error,
    },
    AppendFailed {
        stream_name: String,
        offset: u64,
        cause: AppendFailure,
    },
    Finalization {
        stream_name: String,
        cause: FinalizationFailure,
    },
    /// Operation called on a session that is no longer open
    SessionClosed { state: SessionState },
}

impl WriteStreamError {
    /// Server-visible row count mismatch, if this is one
    pub fn row_count_mismatch(&self) -> Option<(u64, u64)> {
        match self {
            WriteStreamError::Finalization {
                cause: FinalizationFailure::RowCountMismatch { expected, actual },
                ..
            } => Some((*expected, *actual)),
            _ => None,
        }
    }
}

impl std::fmt::Display for WriteStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteStreamError::RowTooLarge { size, max } => write!(
                f,
                "a single row of size {} bytes exceeded the maximum of {} bytes for an append-rows request",
                size, max
            ),
            WriteStreamError::Config(e) => write!(f, "{}", e),
            WriteStreamError::StreamCreation { table_path, source } => write!(
                f,
                "could not create write-stream for {}: {}",
                table_path, source
            ),
            WriteStreamError::AppenderSetup {
                stream_name,
                source,
            } => write!(
                f,
                "could not build stream appender for {}: {}",
                stream_name, source
            ),
            WriteStreamError::AppendFailed {
                stream_name,
                offset,
                cause,
            } => write!(
                f,
                "on stream {} append at offset {}: {}",
                stream_name, offset, cause
            ),
            WriteStreamError::Finalization { stream_name, cause } => {
                write!(f, "on stream {} finalization: {}", stream_name, cause)
            }
            WriteStreamError::SessionClosed { state } => {
                write!(f, "write-stream session is {}", state)
            }
        }
    }
}

impl std::error::Error for WriteStreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteStreamError::Config(e) => Some(e),
            WriteStreamError::StreamCreation { source, .. } => Some(source),
            WriteStreamError::AppenderSetup { source, .. } => Some(source),
            WriteStreamError::AppendFailed {
                cause: AppendFailure::Transport(status) | AppendFailure::Server(status),
                ..
            } => Some(status),
            WriteStreamError::Finalization {
                cause: FinalizationFailure::Retry(e),
                ..
            } => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for WriteStreamError {
    fn from(e: ConfigError) -> Self {
        WriteStreamError::Config(e)
    }
}
