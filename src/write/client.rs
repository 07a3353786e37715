//! Write Client Abstraction
//!
//! The session talks to the storage service only through these traits.
//! Production bindings (authenticated RPC channels) live outside this crate;
//! `simulated.rs` provides in-memory and fault-injecting implementations.
//!
//! ```text
//! WriteClient ── create_write_stream(parent) ──► WriteStream { name }
//!      │
//!      ├──────── bind_appender(name, schema) ──► StreamAppender
//!      │                                             │
//!      │                  append(rows, offset) ◄─────┘ ──► AppendFuture
//!      │
//!      └──────── finalize_write_stream(name) ──► FinalizeWriteStreamResponse
//! ```

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Canonical RPC status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

/// Failure status returned by the service or the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        RpcStatus {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }
}

impl std::fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcStatus {}

/// Wire schema descriptor the stream's rows are serialized against.
/// Opaque to the session; only the binding layer interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoSchema {
    pub message_name: String,
    pub descriptor: Bytes,
}

impl ProtoSchema {
    pub fn new(message_name: impl Into<String>, descriptor: impl Into<Bytes>) -> Self {
        ProtoSchema {
            message_name: message_name.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// Batch of already-serialized rows sent in one append request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtoRows {
    serialized_rows: Vec<Bytes>,
}

impl ProtoRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: Bytes) {
        self.serialized_rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.serialized_rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serialized_rows.is_empty()
    }

    /// Sum of payload sizes. O(n); callers on hot paths keep a running total.
    pub fn byte_size(&self) -> usize {
        self.serialized_rows.iter().map(Bytes::len).sum()
    }

    pub fn clear(&mut self) {
        self.serialized_rows.clear();
    }

    pub fn rows(&self) -> &[Bytes] {
        &self.serialized_rows
    }

    pub fn into_rows(self) -> Vec<Bytes> {
        self.serialized_rows
    }
}

impl FromIterator<Bytes> for ProtoRows {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        ProtoRows {
            serialized_rows: iter.into_iter().collect(),
        }
    }
}

/// Write-stream commit semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteStreamType {
    /// Rows visible as soon as they are acknowledged
    Committed,
    /// Rows invisible until the stream is finalized and committed
    Pending,
    /// Rows visible after an explicit flush
    Buffered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStream {
    pub name: String,
    pub stream_type: WriteStreamType,
}

/// Server reply to an append request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendRowsResponse {
    /// Rows accepted starting at `offset`
    Appended { offset: u64 },
    /// Request rejected by the server
    Error(RpcStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeWriteStreamResponse {
    pub row_count: u64,
}

/// Pending append response. Resolves to `Err` on transport faults.
pub type AppendFuture = BoxFuture<'static, Result<AppendRowsResponse, RpcStatus>>;

/// Streaming appender bound to one write-stream and one schema
pub trait StreamAppender: Send {
    /// Dispatch `rows` claiming to start at `offset`. The request is in flight
    /// once this returns; the future only carries the reply.
    fn append(&mut self, rows: ProtoRows, offset: u64) -> AppendFuture;

    /// Release the underlying connection.
    fn close(&mut self) -> Result<(), RpcStatus>;
}

/// Authenticated client for the storage write service.
///
/// Must be safe to share between concurrent sessions.
pub trait WriteClient: Send + Sync + 'static {
    type Appender: StreamAppender;

    fn create_write_stream<'a>(
        &'a self,
        parent: &'a str,
        stream_type: WriteStreamType,
    ) -> BoxFuture<'a, Result<WriteStream, RpcStatus>>;

    /// Local setup of a streaming connection; fails with I/O errors only.
    fn bind_appender(
        &self,
        stream_name: &str,
        schema: &ProtoSchema,
    ) -> std::io::Result<Self::Appender>;

    fn finalize_write_stream<'a>(
        &'a self,
        stream_name: &'a str,
    ) -> BoxFuture<'a, Result<FinalizeWriteStreamResponse, RpcStatus>>;
}
