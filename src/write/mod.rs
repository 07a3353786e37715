//! Write-Stream Sessions
//!
//! Client-side manager for one exclusive PENDING write-stream on an
//! append-only tabular storage service.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     WriteStreamSession                       │
//! │  pending_rows ──(ceiling)──► append(rows, committed_offset)  │
//! │        │                           │                         │
//! │        │                     ack offset check                │
//! │        ▼                                                     │
//! │  commit: flush ─► quiescence ─► finalize (retried) ─► count  │
//! └──────────────────────┬───────────────────────────────────────┘
//!                        │ Arc<C: WriteClient>
//!          ┌─────────────┴──────────────┐
//!          ▼                            ▼
//!   ClientRegistry (one per key)   RetryingExecutor
//!                                  (classifier + backoff, WriteClock)
//! ```
//!
//! ## Modules
//!
//! - `client`: service traits and wire types
//! - `session`: the session itself
//! - `retry`: classifier, exponential backoff, executor
//! - `config`: TOML/env configuration
//! - `clock`: production and simulated time
//! - `registry`: shared client cache
//! - `simulated`, `dst`: in-memory service, fault injection, DST harness

pub mod client;
pub mod clock;
pub mod config;
pub mod dst;
pub mod error;
pub mod registry;
pub mod retry;
pub mod session;
pub mod simulated;

pub use client::{
    AppendFuture, AppendRowsResponse, FinalizeWriteStreamResponse, ProtoRows, ProtoSchema,
    RpcStatus, StatusCode, StreamAppender, WriteClient, WriteStream, WriteStreamType,
};
pub use clock::{ClockTimestamp, ProductionClock, SimulatedClock, WriteClock};
pub use config::{ConfigError, WriteStreamConfig};
pub use dst::{
    run_dst_batch, summarize_batch, WriteStreamDSTConfig, WriteStreamDSTHarness,
    WriteStreamDSTResult,
};
pub use error::{AppendFailure, FinalizationFailure, SessionState, WriteStreamError};
pub use registry::{ClientKey, ClientRegistry, ShutdownClient};
pub use retry::{
    ExponentialBackoff, ResultClassifier, RetryDecision, RetryError, RetryFailureReason,
    RetrySettings, RetryingExecutor, StatusCodeClassifier,
};
pub use session::{SessionContext, SessionStats, WriteStreamSession};
pub use simulated::{
    InMemoryWriteService, SimulatedWriteClient, SimulatedWriteConfig, SimulatedWriteStats,
};
