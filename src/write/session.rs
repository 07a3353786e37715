//! Write-Stream Session
//!
//! One session owns one exclusive PENDING write-stream for the lifetime of a
//! single producer. Rows are buffered until admitting the next one would
//! overflow the request ceiling; the buffer is then sent as one append at
//! the session's running offset.
//!
//! ```text
//! open ──► add_row* ──► commit ──► Committed
//!   │         │            │
//!   │      (overflow)   flush + 500ms + finalize (retried) + row-count check
//!   │         ▼
//!   │       flush: append(rows, committed_row_count) ──► ack offset must match
//!   │
//!   └────────────── abort ──► Aborted (no append, no finalize)
//! ```
//!
//! All public operations take `&mut self` and await every network call to
//! completion before touching the buffer again, so buffer mutation and server
//! acknowledgement are strictly sequenced.

use crate::io::production::ProductionRng;
use crate::io::Rng;
use crate::write::client::{
    AppendRowsResponse, ProtoRows, ProtoSchema, RpcStatus, StreamAppender, WriteClient,
    WriteStreamType,
};
use crate::write::clock::{ProductionClock, WriteClock};
use crate::write::config::WriteStreamConfig;
use crate::write::error::{AppendFailure, FinalizationFailure, SessionState, WriteStreamError};
use crate::write::retry::{ExponentialBackoff, RetryingExecutor};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time, randomness and cancellation a session runs with
pub struct SessionContext<K: WriteClock> {
    pub clock: K,
    pub rng: Box<dyn Rng>,
    pub cancel: CancellationToken,
}

impl SessionContext<ProductionClock> {
    pub fn production() -> Self {
        SessionContext::new(ProductionClock::new(), Box::new(ProductionRng::new()))
    }
}

impl<K: WriteClock> SessionContext<K> {
    pub fn new(clock: K, rng: Box<dyn Rng>) -> Self {
        SessionContext {
            clock,
            rng,
            cancel: CancellationToken::new(),
        }
    }

    /// Interrupt waits (append response, backoff, quiescence) when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Counters for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub append_requests: u64,
    pub rows_appended: u64,
    pub bytes_appended: u64,
    /// Flushes triggered by an overflowing `add_row`
    pub flushes_forced: u64,
    pub create_attempts: u32,
    pub finalize_attempts: u32,
}

pub struct WriteStreamSession<C: WriteClient, K: WriteClock = ProductionClock> {
    client: Arc<C>,
    table_path: String,
    writer_schema: ProtoSchema,
    stream_name: Option<String>,
    appender: Option<C::Appender>,
    /// Rows awaiting the next append
    pending_rows: ProtoRows,
    /// Always equals `pending_rows.byte_size()`
    pending_bytes: usize,
    /// Always equals `pending_rows.len()`
    pending_row_count: u64,
    /// Rows acknowledged by the server; offset of the next append
    committed_row_count: u64,
    max_request_bytes: usize,
    finalize_quiescence: Duration,
    retry: RetryingExecutor<K>,
    clock: K,
    cancel: CancellationToken,
    state: SessionState,
    stats: SessionStats,
}

impl<C: WriteClient> WriteStreamSession<C, ProductionClock> {
    /// Open a session with real time and OS randomness
    pub async fn open(
        client: Arc<C>,
        table_path: impl Into<String>,
        writer_schema: ProtoSchema,
        config: &WriteStreamConfig,
    ) -> Result<Self, WriteStreamError> {
        Self::open_with(
            client,
            table_path,
            writer_schema,
            config,
            SessionContext::production(),
        )
        .await
    }
}

impl<C: WriteClient, K: WriteClock> WriteStreamSession<C, K> {
    /// Create a PENDING write-stream under `table_path` (retried) and bind an
    /// appender for `writer_schema`.
    pub async fn open_with(
        client: Arc<C>,
        table_path: impl Into<String>,
        writer_schema: ProtoSchema,
        config: &WriteStreamConfig,
        ctx: SessionContext<K>,
    ) -> Result<Self, WriteStreamError> {
        config.validate()?;
        let table_path = table_path.into();

        let retry = RetryingExecutor::new(
            Arc::new(config.classifier()),
            ExponentialBackoff::new(config.retry.clone()),
            ctx.clock.clone(),
            ctx.rng,
            ctx.cancel.clone(),
        );

        let created = {
            let client = client.as_ref();
            let parent = table_path.as_str();
            retry
                .run("create_write_stream", move || {
                    client.create_write_stream(parent, WriteStreamType::Pending)
                })
                .await
        };
        let created = match created {
            Ok(created) => created,
            Err(source) => {
                error!(table = %table_path, error = %source, "could not create write-stream");
                return Err(WriteStreamError::StreamCreation { table_path, source });
            }
        };
        let stream_name = created.value.name;

        let appender = client
            .bind_appender(&stream_name, &writer_schema)
            .map_err(|source| WriteStreamError::AppenderSetup {
                stream_name: stream_name.clone(),
                source,
            })?;

        info!(
            stream = %stream_name,
            table = %table_path,
            attempts = created.attempts,
            "write-stream created"
        );

        Ok(WriteStreamSession {
            client,
            table_path,
            writer_schema,
            stream_name: Some(stream_name),
            appender: Some(appender),
            pending_rows: ProtoRows::new(),
            pending_bytes: 0,
            pending_row_count: 0,
            committed_row_count: 0,
            max_request_bytes: config.max_request_bytes(),
            finalize_quiescence: config.finalize_quiescence,
            retry,
            clock: ctx.clock,
            cancel: ctx.cancel,
            state: SessionState::Open,
            stats: SessionStats {
                create_attempts: created.attempts,
                ..SessionStats::default()
            },
        })
    }

    /// Buffer one serialized row, flushing first if it would overflow the
    /// request ceiling.
    ///
    /// A row larger than the ceiling on its own fails with `RowTooLarge` and
    /// leaves the session untouched.
    pub async fn add_row(&mut self, row: impl Into<Bytes>) -> Result<(), WriteStreamError> {
        self.ensure_open()?;
        let row = row.into();
        let size = row.len();

        if self.pending_bytes + size > self.max_request_bytes {
            if size > self.max_request_bytes {
                return Err(WriteStreamError::RowTooLarge {
                    size,
                    max: self.max_request_bytes,
                });
            }
            self.flush().await?;
            self.stats.flushes_forced += 1;
        }

        self.pending_rows.push(row);
        self.pending_bytes += size;
        self.pending_row_count += 1;
        Ok(())
    }

    /// Flush remaining rows, wait for the quiescence interval, finalize the
    /// stream and check the server's row count against ours.
    ///
    /// Returns the server's finalized row count.
    pub async fn commit(&mut self) -> Result<u64, WriteStreamError> {
        self.ensure_open()?;

        if !self.pending_rows.is_empty() {
            self.flush().await?;
        }

        let expected = self.committed_row_count;
        let stream_name = self.stream_name.clone().unwrap_or_default();

        let interrupted = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            _ = self.clock.sleep(self.finalize_quiescence) => false,
        };
        if interrupted {
            self.state = SessionState::Failed;
            error!(stream = %stream_name, "interrupted while waiting before finalization");
            return Err(WriteStreamError::Finalization {
                stream_name,
                cause: FinalizationFailure::Interrupted,
            });
        }

        let finalized = {
            let client = self.client.as_ref();
            let name = stream_name.as_str();
            self.retry
                .run("finalize_write_stream", move || {
                    client.finalize_write_stream(name)
                })
                .await
        };
        let finalized = match finalized {
            Ok(finalized) => finalized,
            Err(source) => {
                self.state = SessionState::Failed;
                error!(stream = %stream_name, error = %source, "could not finalize write-stream");
                return Err(WriteStreamError::Finalization {
                    stream_name,
                    cause: FinalizationFailure::Retry(source),
                });
            }
        };
        self.stats.finalize_attempts = finalized.attempts;

        let actual = finalized.value.row_count;
        if actual != expected {
            self.state = SessionState::Failed;
            error!(
                stream = %stream_name,
                expected,
                actual,
                "finalized row count does not match appended rows"
            );
            return Err(WriteStreamError::Finalization {
                stream_name,
                cause: FinalizationFailure::RowCountMismatch { expected, actual },
            });
        }

        self.state = SessionState::Committed;
        self.close_appender();
        debug!(stream = %stream_name, row_count = actual, "write-stream finalized");
        Ok(actual)
    }

    /// Discard buffered rows and release the appender without finalizing.
    /// Best effort; never fails and may be called in any state.
    pub fn abort(&mut self) {
        self.pending_rows.clear();
        self.pending_bytes = 0;
        self.pending_row_count = 0;
        self.close_appender();

        if let Some(name) = self.stream_name.take() {
            info!(
                stream = %name,
                committed_rows = self.committed_row_count,
                previous_state = %self.state,
                "write-stream aborted"
            );
        }
        self.state = SessionState::Aborted;
    }

    /// Send the buffer as one append at `committed_row_count` and validate
    /// the acknowledgement. Counters change only on success.
    async fn flush(&mut self) -> Result<(), WriteStreamError> {
        let offset = self.committed_row_count;
        if self.cancel.is_cancelled() {
            return Err(self.append_failed(offset, AppendFailure::Interrupted));
        }

        let state = self.state;
        let appender = self
            .appender
            .as_mut()
            .ok_or(WriteStreamError::SessionClosed { state })?;

        debug!(
            stream = self.stream_name.as_deref().unwrap_or_default(),
            offset,
            rows = self.pending_row_count,
            bytes = self.pending_bytes,
            "sending append request"
        );
        let response = appender.append(self.pending_rows.clone(), offset);
        self.stats.append_requests += 1;

        // A response that is already available wins over cancellation.
        let validated = tokio::select! {
            biased;
            result = response => validate_append_response(result, offset),
            _ = self.cancel.cancelled() => Err(AppendFailure::Interrupted),
        };

        if let Err(cause) = validated {
            return Err(self.append_failed(offset, cause));
        }

        self.stats.rows_appended += self.pending_row_count;
        self.stats.bytes_appended += self.pending_bytes as u64;
        self.pending_rows.clear();
        self.committed_row_count += self.pending_row_count;
        self.pending_row_count = 0;
        self.pending_bytes = 0;
        Ok(())
    }

    fn append_failed(&mut self, offset: u64, cause: AppendFailure) -> WriteStreamError {
        self.state = SessionState::Failed;
        let stream_name = self.stream_name.clone().unwrap_or_default();
        error!(stream = %stream_name, offset, %cause, "append failed");
        WriteStreamError::AppendFailed {
            stream_name,
            offset,
            cause,
        }
    }

    fn close_appender(&mut self) {
        if let Some(mut appender) = self.appender.take() {
            if let Err(status) = appender.close() {
                warn!(
                    stream = self.stream_name.as_deref().unwrap_or_default(),
                    %status,
                    "failed to close stream appender"
                );
            }
        }
    }

    fn ensure_open(&self) -> Result<(), WriteStreamError> {
        match self.state {
            SessionState::Open => Ok(()),
            state => Err(WriteStreamError::SessionClosed { state }),
        }
    }

    /// Server-assigned stream name; `None` after `abort`
    pub fn stream_name(&self) -> Option<&str> {
        self.stream_name.as_deref()
    }

    pub fn table_path(&self) -> &str {
        &self.table_path
    }

    pub fn writer_schema(&self) -> &ProtoSchema {
        &self.writer_schema
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn committed_row_count(&self) -> u64 {
        self.committed_row_count
    }

    pub fn pending_row_count(&self) -> u64 {
        self.pending_row_count
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

impl<C: WriteClient, K: WriteClock> Drop for WriteStreamSession<C, K> {
    fn drop(&mut self) {
        if self.appender.is_some() {
            warn!(
                stream = self.stream_name.as_deref().unwrap_or_default(),
                state = %self.state,
                "session dropped without commit or abort"
            );
            self.close_appender();
        }
    }
}

fn validate_append_response(
    result: Result<AppendRowsResponse, RpcStatus>,
    expected_offset: u64,
) -> Result<(), AppendFailure> {
    match result {
        Err(status) => Err(AppendFailure::Transport(status)),
        Ok(AppendRowsResponse::Error(status)) => Err(AppendFailure::Server(status)),
        Ok(AppendRowsResponse::Appended { offset }) if offset != expected_offset => {
            Err(AppendFailure::OffsetMismatch {
                expected: expected_offset,
                actual: offset,
            })
        }
        Ok(AppendRowsResponse::Appended { .. }) => Ok(()),
    }
}
