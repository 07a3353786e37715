//! Simulated Write Service with Fault Injection
//!
//! Two layers, composed the same way the DST harness uses them:
//!
//! ```text
//! WriteStreamSession ──► SimulatedWriteClient (buggify faults) ──► InMemoryWriteService
//! ```
//!
//! `InMemoryWriteService` behaves like the real service for PENDING streams:
//! it enforces exclusive offsets, rejects appends after finalization and
//! reports the stored row count on finalize. Tests can also script one-shot
//! faults on it directly and inspect the call log.

use crate::buggify::faults::write_stream as faults;
use crate::buggify::FaultConfig;
use crate::io::Rng;
use crate::write::client::{
    AppendFuture, AppendRowsResponse, FinalizeWriteStreamResponse, ProtoRows, ProtoSchema,
    RpcStatus, StatusCode, StreamAppender, WriteClient, WriteStream, WriteStreamType,
};
use crate::write::registry::ShutdownClient;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Request observed by the in-memory service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    CreateWriteStream { parent: String },
    BindAppender { stream: String },
    Append { stream: String, offset: u64, rows: usize },
    FinalizeWriteStream { stream: String },
    CloseAppender { stream: String },
}

#[derive(Debug)]
struct StreamRecord {
    stream_type: WriteStreamType,
    rows: Vec<Bytes>,
    finalized: bool,
}

/// One-shot faults queued by tests
#[derive(Debug, Default)]
struct ScriptedFaults {
    create_failures: VecDeque<RpcStatus>,
    finalize_failures: VecDeque<RpcStatus>,
    append_error: Option<RpcStatus>,
    drop_append_response: bool,
    ack_skew: Option<u64>,
    finalize_row_count: Option<u64>,
    bind_failure: Option<String>,
    close_failure: Option<RpcStatus>,
}

#[derive(Debug, Default)]
struct ServiceState {
    next_stream_id: u64,
    streams: BTreeMap<String, StreamRecord>,
    calls: Vec<RecordedCall>,
    scripted: ScriptedFaults,
    shut_down: bool,
}

/// In-memory storage write service
#[derive(Clone, Default)]
pub struct InMemoryWriteService {
    state: Arc<Mutex<ServiceState>>,
}

impl InMemoryWriteService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next creates with these statuses, in order
    pub fn fail_next_creates(&self, statuses: Vec<RpcStatus>) {
        self.state.lock().scripted.create_failures.extend(statuses);
    }

    /// Fail the next finalizes with these statuses, in order
    pub fn fail_next_finalizes(&self, statuses: Vec<RpcStatus>) {
        self.state.lock().scripted.finalize_failures.extend(statuses);
    }

    /// Reject the next append with a server error; nothing is stored
    pub fn fail_next_append(&self, status: RpcStatus) {
        self.state.lock().scripted.append_error = Some(status);
    }

    /// Store the next append but never deliver its response
    pub fn drop_next_append_response(&self) {
        self.state.lock().scripted.drop_append_response = true;
    }

    /// Store the next append but acknowledge it `skew` rows past its offset
    pub fn skew_next_ack(&self, skew: u64) {
        self.state.lock().scripted.ack_skew = Some(skew);
    }

    /// Report `row_count` from the next successful finalize
    pub fn override_next_finalize_row_count(&self, row_count: u64) {
        self.state.lock().scripted.finalize_row_count = Some(row_count);
    }

    pub fn fail_next_bind(&self, message: impl Into<String>) {
        self.state.lock().scripted.bind_failure = Some(message.into());
    }

    pub fn fail_close(&self, status: RpcStatus) {
        self.state.lock().scripted.close_failure = Some(status);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Offsets of every append request received, in order
    pub fn append_offsets(&self) -> Vec<u64> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Append { offset, .. } => Some(*offset),
                _ => None,
            })
            .collect()
    }

    pub fn create_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, RecordedCall::CreateWriteStream { .. }))
    }

    pub fn finalize_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, RecordedCall::FinalizeWriteStream { .. }))
    }

    fn count_calls(&self, pred: impl Fn(&RecordedCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn stream_names(&self) -> Vec<String> {
        self.state.lock().streams.keys().cloned().collect()
    }

    pub fn stream_rows(&self, stream: &str) -> Option<Vec<Bytes>> {
        self.state.lock().streams.get(stream).map(|s| s.rows.clone())
    }

    pub fn stream_type(&self, stream: &str) -> Option<WriteStreamType> {
        self.state.lock().streams.get(stream).map(|s| s.stream_type)
    }

    pub fn is_finalized(&self, stream: &str) -> bool {
        self.state
            .lock()
            .streams
            .get(stream)
            .is_some_and(|s| s.finalized)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    fn create_now(&self, parent: &str, stream_type: WriteStreamType) -> Result<WriteStream, RpcStatus> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall::CreateWriteStream {
            parent: parent.to_string(),
        });
        if let Some(status) = state.scripted.create_failures.pop_front() {
            return Err(status);
        }

        state.next_stream_id += 1;
        let name = format!("{}/streams/{}", parent, state.next_stream_id);
        state.streams.insert(
            name.clone(),
            StreamRecord {
                stream_type,
                rows: Vec::new(),
                finalized: false,
            },
        );
        Ok(WriteStream { name, stream_type })
    }

    /// Returns the response, or `None` if it should be lost in transit
    fn append_now(&self, stream: &str, rows: ProtoRows, offset: u64) -> Option<AppendRowsResponse> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall::Append {
            stream: stream.to_string(),
            offset,
            rows: rows.len(),
        });
        if let Some(status) = state.scripted.append_error.take() {
            return Some(AppendRowsResponse::Error(status));
        }
        let drop_response = std::mem::take(&mut state.scripted.drop_append_response);
        let skew = state.scripted.ack_skew.take().unwrap_or(0);

        let response = match state.streams.get_mut(stream) {
            None => AppendRowsResponse::Error(RpcStatus::new(
                StatusCode::NotFound,
                format!("write-stream {} not found", stream),
            )),
            Some(record) if record.finalized => AppendRowsResponse::Error(RpcStatus::new(
                StatusCode::FailedPrecondition,
                format!("write-stream {} is already finalized", stream),
            )),
            Some(record) => {
                let end = record.rows.len() as u64;
                if offset < end {
                    AppendRowsResponse::Error(RpcStatus::new(
                        StatusCode::AlreadyExists,
                        format!("offset {} already written, stream end is {}", offset, end),
                    ))
                } else if offset > end {
                    AppendRowsResponse::Error(RpcStatus::new(
                        StatusCode::OutOfRange,
                        format!("offset {} is beyond stream end {}", offset, end),
                    ))
                } else {
                    record.rows.extend(rows.into_rows());
                    AppendRowsResponse::Appended {
                        offset: offset + skew,
                    }
                }
            }
        };

        if drop_response {
            None
        } else {
            Some(response)
        }
    }

    fn finalize_now(&self, stream: &str) -> Result<FinalizeWriteStreamResponse, RpcStatus> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall::FinalizeWriteStream {
            stream: stream.to_string(),
        });
        if let Some(status) = state.scripted.finalize_failures.pop_front() {
            return Err(status);
        }
        let row_count_override = state.scripted.finalize_row_count.take();

        let record = state.streams.get_mut(stream).ok_or_else(|| {
            RpcStatus::new(StatusCode::NotFound, format!("write-stream {} not found", stream))
        })?;
        record.finalized = true;
        let row_count = row_count_override.unwrap_or(record.rows.len() as u64);
        Ok(FinalizeWriteStreamResponse { row_count })
    }
}

impl WriteClient for InMemoryWriteService {
    type Appender = InMemoryAppender;

    fn create_write_stream<'a>(
        &'a self,
        parent: &'a str,
        stream_type: WriteStreamType,
    ) -> BoxFuture<'a, Result<WriteStream, RpcStatus>> {
        Box::pin(futures::future::ready(self.create_now(parent, stream_type)))
    }

    fn bind_appender(
        &self,
        stream_name: &str,
        _schema: &ProtoSchema,
    ) -> std::io::Result<InMemoryAppender> {
        let mut state = self.state.lock();
        if let Some(message) = state.scripted.bind_failure.take() {
            return Err(std::io::Error::other(message));
        }
        state.calls.push(RecordedCall::BindAppender {
            stream: stream_name.to_string(),
        });
        Ok(InMemoryAppender {
            service: self.clone(),
            stream_name: stream_name.to_string(),
            closed: false,
        })
    }

    fn finalize_write_stream<'a>(
        &'a self,
        stream_name: &'a str,
    ) -> BoxFuture<'a, Result<FinalizeWriteStreamResponse, RpcStatus>> {
        Box::pin(futures::future::ready(self.finalize_now(stream_name)))
    }
}

impl ShutdownClient for InMemoryWriteService {
    fn shutdown(&self) {
        self.state.lock().shut_down = true;
    }
}

/// Appender bound to one in-memory stream
pub struct InMemoryAppender {
    service: InMemoryWriteService,
    stream_name: String,
    closed: bool,
}

impl StreamAppender for InMemoryAppender {
    fn append(&mut self, rows: ProtoRows, offset: u64) -> AppendFuture {
        if self.closed {
            let status = RpcStatus::new(StatusCode::FailedPrecondition, "appender is closed");
            return Box::pin(futures::future::ready(Err(status)));
        }

        let (tx, rx) = oneshot::channel();
        if let Some(response) = self.service.append_now(&self.stream_name, rows, offset) {
            let _ = tx.send(response);
        }
        Box::pin(async move {
            rx.await
                .map_err(|_| RpcStatus::unavailable("append response channel closed"))
        })
    }

    fn close(&mut self) -> Result<(), RpcStatus> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.service.state.lock();
        state.calls.push(RecordedCall::CloseAppender {
            stream: self.stream_name.clone(),
        });
        match state.scripted.close_failure.take() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}

/// Fault probabilities for [`SimulatedWriteClient`]
#[derive(Debug, Clone)]
pub struct SimulatedWriteConfig {
    pub create_unavailable_prob: f64,
    pub create_invalid_argument_prob: f64,
    pub append_server_error_prob: f64,
    pub append_offset_skew_prob: f64,
    pub append_response_dropped_prob: f64,
    pub finalize_unavailable_prob: f64,
    pub finalize_deadline_exceeded_prob: f64,
}

impl Default for SimulatedWriteConfig {
    fn default() -> Self {
        Self::from_faults(&FaultConfig::new())
    }
}

impl SimulatedWriteConfig {
    /// Probabilities taken from a buggify fault table
    pub fn from_faults(faults_config: &FaultConfig) -> Self {
        SimulatedWriteConfig {
            create_unavailable_prob: faults_config.get(faults::CREATE_UNAVAILABLE),
            create_invalid_argument_prob: faults_config.get(faults::CREATE_INVALID_ARGUMENT),
            append_server_error_prob: faults_config.get(faults::APPEND_SERVER_ERROR),
            append_offset_skew_prob: faults_config.get(faults::APPEND_OFFSET_SKEW),
            append_response_dropped_prob: faults_config.get(faults::APPEND_RESPONSE_DROPPED),
            finalize_unavailable_prob: faults_config.get(faults::FINALIZE_UNAVAILABLE),
            finalize_deadline_exceeded_prob: faults_config.get(faults::FINALIZE_DEADLINE_EXCEEDED),
        }
    }

    /// Aggressive faults for stress testing
    pub fn high_chaos() -> Self {
        Self::from_faults(&FaultConfig::chaos())
    }

    pub fn no_faults() -> Self {
        Self::from_faults(&FaultConfig::disabled())
    }
}

/// Faults injected so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulatedWriteStats {
    pub create_attempts: u64,
    pub create_faults: u64,
    pub append_attempts: u64,
    pub append_server_errors: u64,
    pub append_offset_skews: u64,
    pub append_responses_dropped: u64,
    pub finalize_attempts: u64,
    pub finalize_faults: u64,
}

impl SimulatedWriteStats {
    pub fn total_faults(&self) -> u64 {
        self.create_faults
            + self.append_server_errors
            + self.append_offset_skews
            + self.append_responses_dropped
            + self.finalize_faults
    }
}

struct SimulatedInner<R: Rng> {
    rng: R,
    stats: SimulatedWriteStats,
}

enum AppendFault {
    ServerError,
    OffsetSkew,
    ResponseDropped,
}

/// Write client that wraps another and injects faults via buggify
pub struct SimulatedWriteClient<C: WriteClient, R: Rng> {
    inner: C,
    config: SimulatedWriteConfig,
    state: Arc<Mutex<SimulatedInner<R>>>,
}

impl<C: WriteClient, R: Rng> SimulatedWriteClient<C, R> {
    pub fn new(inner: C, rng: R, config: SimulatedWriteConfig) -> Self {
        SimulatedWriteClient {
            inner,
            config,
            state: Arc::new(Mutex::new(SimulatedInner {
                rng,
                stats: SimulatedWriteStats::default(),
            })),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn stats(&self) -> SimulatedWriteStats {
        self.state.lock().stats.clone()
    }

    fn roll_create_fault(&self) -> Option<RpcStatus> {
        let mut s = self.state.lock();
        s.stats.create_attempts += 1;
        let status = if crate::buggify!(
            &mut s.rng,
            faults::CREATE_INVALID_ARGUMENT,
            self.config.create_invalid_argument_prob
        ) {
            Some(RpcStatus::invalid_argument("simulated: table schema rejected"))
        } else if crate::buggify!(
            &mut s.rng,
            faults::CREATE_UNAVAILABLE,
            self.config.create_unavailable_prob
        ) {
            Some(RpcStatus::unavailable("simulated: service unavailable"))
        } else {
            None
        };
        if status.is_some() {
            s.stats.create_faults += 1;
        }
        status
    }

    fn roll_finalize_fault(&self) -> Option<RpcStatus> {
        let mut s = self.state.lock();
        s.stats.finalize_attempts += 1;
        let status = if crate::buggify!(
            &mut s.rng,
            faults::FINALIZE_UNAVAILABLE,
            self.config.finalize_unavailable_prob
        ) {
            Some(RpcStatus::unavailable("simulated: service unavailable"))
        } else if crate::buggify!(
            &mut s.rng,
            faults::FINALIZE_DEADLINE_EXCEEDED,
            self.config.finalize_deadline_exceeded_prob
        ) {
            Some(RpcStatus::new(
                StatusCode::DeadlineExceeded,
                "simulated: deadline exceeded",
            ))
        } else {
            None
        };
        if status.is_some() {
            s.stats.finalize_faults += 1;
        }
        status
    }
}

fn roll_append_fault<R: Rng>(
    state: &Mutex<SimulatedInner<R>>,
    config: &SimulatedWriteConfig,
) -> Option<AppendFault> {
    let mut s = state.lock();
    s.stats.append_attempts += 1;
    if crate::buggify!(&mut s.rng, faults::APPEND_SERVER_ERROR, config.append_server_error_prob) {
        s.stats.append_server_errors += 1;
        Some(AppendFault::ServerError)
    } else if crate::buggify!(&mut s.rng, faults::APPEND_OFFSET_SKEW, config.append_offset_skew_prob) {
        s.stats.append_offset_skews += 1;
        Some(AppendFault::OffsetSkew)
    } else if crate::buggify!(
        &mut s.rng,
        faults::APPEND_RESPONSE_DROPPED,
        config.append_response_dropped_prob
    ) {
        s.stats.append_responses_dropped += 1;
        Some(AppendFault::ResponseDropped)
    } else {
        None
    }
}

impl<C: WriteClient, R: Rng> WriteClient for SimulatedWriteClient<C, R> {
    type Appender = SimulatedAppender<C::Appender, R>;

    fn create_write_stream<'a>(
        &'a self,
        parent: &'a str,
        stream_type: WriteStreamType,
    ) -> BoxFuture<'a, Result<WriteStream, RpcStatus>> {
        Box::pin(async move {
            if let Some(status) = self.roll_create_fault() {
                return Err(status);
            }
            self.inner.create_write_stream(parent, stream_type).await
        })
    }

    fn bind_appender(
        &self,
        stream_name: &str,
        schema: &ProtoSchema,
    ) -> std::io::Result<Self::Appender> {
        let inner = self.inner.bind_appender(stream_name, schema)?;
        Ok(SimulatedAppender {
            inner,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        })
    }

    fn finalize_write_stream<'a>(
        &'a self,
        stream_name: &'a str,
    ) -> BoxFuture<'a, Result<FinalizeWriteStreamResponse, RpcStatus>> {
        Box::pin(async move {
            if let Some(status) = self.roll_finalize_fault() {
                return Err(status);
            }
            self.inner.finalize_write_stream(stream_name).await
        })
    }
}

impl<C: WriteClient + ShutdownClient, R: Rng> ShutdownClient for SimulatedWriteClient<C, R> {
    fn shutdown(&self) {
        self.inner.shutdown();
    }
}

/// Appender wrapper that corrupts responses via buggify
pub struct SimulatedAppender<A: StreamAppender, R: Rng> {
    inner: A,
    config: SimulatedWriteConfig,
    state: Arc<Mutex<SimulatedInner<R>>>,
}

impl<A: StreamAppender, R: Rng> StreamAppender for SimulatedAppender<A, R> {
    fn append(&mut self, rows: ProtoRows, offset: u64) -> AppendFuture {
        match roll_append_fault(&self.state, &self.config) {
            Some(AppendFault::ServerError) => {
                let status = RpcStatus::new(StatusCode::Internal, "simulated: append rejected");
                Box::pin(futures::future::ready(Ok(AppendRowsResponse::Error(status))))
            }
            Some(AppendFault::OffsetSkew) => {
                let response = self.inner.append(rows, offset);
                Box::pin(async move {
                    match response.await? {
                        AppendRowsResponse::Appended { offset } => {
                            Ok(AppendRowsResponse::Appended { offset: offset + 1 })
                        }
                        other => Ok(other),
                    }
                })
            }
            Some(AppendFault::ResponseDropped) => {
                // Request reaches the server; only the reply is lost
                let _ = self.inner.append(rows, offset);
                Box::pin(futures::future::ready(Err(RpcStatus::unavailable(
                    "simulated: connection reset before append response",
                ))))
            }
            None => self.inner.append(rows, offset),
        }
    }

    fn close(&mut self) -> Result<(), RpcStatus> {
        self.inner.close()
    }
}
