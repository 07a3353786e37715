//! Deterministic Simulation Testing for Write-Stream Sessions
//!
//! Shadow-state harness: every session's accepted rows are tracked locally and
//! compared against what the in-memory service actually stored.
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = WriteStreamDSTHarness::new(WriteStreamDSTConfig::moderate(seed));
//!     harness.run(50).await;
//!     harness.check_invariants();
//! }
//! ```
//!
//! Invariants:
//! - a committed session's count equals the rows it accepted and the rows the
//!   service stored, in order, and the stream is finalized
//! - rows a session counts as acknowledged are a prefix of the stored rows
//! - buffered bytes never exceed the request ceiling
//! - aborted or failed streams are never finalized
//! - every failure is a typed error; row counts never silently disagree

use crate::buggify::{self, FaultConfig};
use crate::io::simulation::SimulatedRng;
use crate::io::Rng;
use crate::write::client::ProtoSchema;
use crate::write::clock::SimulatedClock;
use crate::write::config::WriteStreamConfig;
use crate::write::error::{SessionState, WriteStreamError};
use crate::write::retry::RetrySettings;
use crate::write::session::{SessionContext, WriteStreamSession};
use crate::write::simulated::{
    InMemoryWriteService, SimulatedWriteClient, SimulatedWriteConfig, SimulatedWriteStats,
};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Configuration for write-stream DST
#[derive(Debug, Clone)]
pub struct WriteStreamDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Fault probabilities of the simulated client
    pub client_config: SimulatedWriteConfig,
    /// Session configuration (small ceiling so flushes are frequent)
    pub session_config: WriteStreamConfig,
    pub table_path: String,
    pub max_rows_per_session: usize,
    pub max_row_bytes: usize,
    /// Chance a row is larger than the request ceiling
    pub oversized_row_probability: f64,
    /// Chance a session ends in abort instead of commit
    pub abort_probability: f64,
}

impl Default for WriteStreamDSTConfig {
    fn default() -> Self {
        WriteStreamDSTConfig {
            seed: 0,
            client_config: SimulatedWriteConfig::default(),
            session_config: WriteStreamConfig {
                retry: RetrySettings {
                    max_attempts: 6,
                    jittered: true,
                    ..RetrySettings::test()
                },
                ..WriteStreamConfig::with_request_ceiling(256)
            },
            table_path: "projects/dst/datasets/sim/tables/events".to_string(),
            max_rows_per_session: 40,
            max_row_bytes: 64,
            oversized_row_probability: 0.01,
            abort_probability: 0.1,
        }
    }
}

impl WriteStreamDSTConfig {
    pub fn new(seed: u64) -> Self {
        WriteStreamDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// No fault injection
    pub fn calm(seed: u64) -> Self {
        WriteStreamDSTConfig {
            seed,
            client_config: SimulatedWriteConfig::no_faults(),
            ..Default::default()
        }
    }

    pub fn moderate(seed: u64) -> Self {
        WriteStreamDSTConfig {
            seed,
            client_config: SimulatedWriteConfig::default(),
            ..Default::default()
        }
    }

    /// Aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        WriteStreamDSTConfig {
            seed,
            client_config: SimulatedWriteConfig::high_chaos(),
            oversized_row_probability: 0.03,
            abort_probability: 0.15,
            ..Default::default()
        }
    }
}

/// Workload for one session
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub row_sizes: Vec<usize>,
    pub abort: bool,
}

/// Session plan generator
pub struct WriteStreamWorkload {
    rng: SimulatedRng,
    config: WriteStreamDSTConfig,
}

impl WriteStreamWorkload {
    pub fn new(config: WriteStreamDSTConfig) -> Self {
        WriteStreamWorkload {
            rng: SimulatedRng::new(config.seed),
            config,
        }
    }

    pub fn next_session(&mut self) -> SessionPlan {
        let ceiling = self.config.session_config.max_request_bytes();
        let row_count = self.rng.gen_range(0, self.config.max_rows_per_session as u64 + 1);

        let row_sizes = (0..row_count)
            .map(|_| {
                if self.rng.gen_bool(self.config.oversized_row_probability) {
                    ceiling + 1 + self.rng.gen_range(0, 32) as usize
                } else {
                    self.rng.gen_range(1, self.config.max_row_bytes as u64 + 1) as usize
                }
            })
            .collect();

        SessionPlan {
            row_sizes,
            abort: self.rng.gen_bool(self.config.abort_probability),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Committed { stream: String, rows: u64 },
    Aborted { stream: String, rows_added: u64 },
    OpenFailed { error: String },
    Failed {
        stream: String,
        acknowledged_rows: u64,
        error: String,
    },
}

/// Result of a DST run
#[derive(Debug, Clone, Serialize)]
pub struct WriteStreamDSTResult {
    pub seed: u64,
    pub sessions: u64,
    pub committed: u64,
    pub aborted: u64,
    pub failed: u64,
    pub open_failures: u64,
    pub rows_added: u64,
    pub rows_committed: u64,
    pub oversized_rejections: u64,
    pub client_stats: SimulatedWriteStats,
    pub invariant_violations: Vec<String>,
    pub outcomes: Vec<SessionOutcome>,
    /// Buggify trigger counts for the run
    pub buggify_summary: String,
}

impl WriteStreamDSTResult {
    pub fn new(seed: u64) -> Self {
        WriteStreamDSTResult {
            seed,
            sessions: 0,
            committed: 0,
            aborted: 0,
            failed: 0,
            open_failures: 0,
            rows_added: 0,
            rows_committed: 0,
            oversized_rejections: 0,
            client_stats: SimulatedWriteStats::default(),
            invariant_violations: Vec::new(),
            outcomes: Vec::new(),
            buggify_summary: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} sessions ({} committed, {} aborted, {} failed, {} open failures), \
             {} rows committed, {} faults, {} violations",
            self.seed,
            self.sessions,
            self.committed,
            self.aborted,
            self.failed,
            self.open_failures,
            self.rows_committed,
            self.client_stats.total_faults(),
            self.invariant_violations.len()
        )
    }
}

type DSTClient = SimulatedWriteClient<InMemoryWriteService, SimulatedRng>;

/// Main DST harness for write-stream sessions
pub struct WriteStreamDSTHarness {
    config: WriteStreamDSTConfig,
    service: InMemoryWriteService,
    client: Arc<DSTClient>,
    clock: SimulatedClock,
    workload: WriteStreamWorkload,
    committed_streams: HashSet<String>,
    result: WriteStreamDSTResult,
}

impl WriteStreamDSTHarness {
    pub fn new(config: WriteStreamDSTConfig) -> Self {
        buggify::set_config(FaultConfig::new());
        buggify::reset_stats();

        let service = InMemoryWriteService::new();
        // Different seed for the fault stream than for the workload
        let client = Arc::new(SimulatedWriteClient::new(
            service.clone(),
            SimulatedRng::new(config.seed.wrapping_add(1)),
            config.client_config.clone(),
        ));

        WriteStreamDSTHarness {
            workload: WriteStreamWorkload::new(config.clone()),
            result: WriteStreamDSTResult::new(config.seed),
            config,
            service,
            client,
            clock: SimulatedClock::new(0),
            committed_streams: HashSet::new(),
        }
    }

    /// Run `sessions` sessions one after another against the shared client
    pub async fn run(&mut self, sessions: usize) {
        for _ in 0..sessions {
            let plan = self.workload.next_session();
            let outcome = self.run_session(plan).await;

            match &outcome {
                SessionOutcome::Committed { .. } => self.result.committed += 1,
                SessionOutcome::Aborted { .. } => self.result.aborted += 1,
                SessionOutcome::OpenFailed { .. } => self.result.open_failures += 1,
                SessionOutcome::Failed { .. } => self.result.failed += 1,
            }
            self.result.outcomes.push(outcome);
        }
    }

    async fn run_session(&mut self, plan: SessionPlan) -> SessionOutcome {
        self.result.sessions += 1;
        let session_seed = self
            .config
            .seed
            .wrapping_mul(1_000_003)
            .wrapping_add(self.result.sessions);
        let ctx = SessionContext::new(self.clock.clone(), Box::new(SimulatedRng::new(session_seed)));
        let schema = ProtoSchema::new("DstRow", Bytes::from_static(b"dst-descriptor"));

        let opened = WriteStreamSession::open_with(
            Arc::clone(&self.client),
            self.config.table_path.as_str(),
            schema,
            &self.config.session_config,
            ctx,
        )
        .await;
        let mut session = match opened {
            Ok(session) => session,
            Err(e) => {
                if !matches!(e, WriteStreamError::StreamCreation { .. }) {
                    self.violation(format!("open failed with unexpected error: {}", e));
                }
                return SessionOutcome::OpenFailed {
                    error: e.to_string(),
                };
            }
        };

        let stream = session.stream_name().unwrap_or_default().to_string();
        let ceiling = session.max_request_bytes();
        let mut accepted: Vec<Bytes> = Vec::new();
        let mut failure = None;

        for (i, size) in plan.row_sizes.iter().enumerate() {
            let row = Bytes::from(vec![(i % 251) as u8; *size]);
            match session.add_row(row.clone()).await {
                Ok(()) => {
                    accepted.push(row);
                    self.result.rows_added += 1;
                }
                Err(WriteStreamError::RowTooLarge { size, max }) => {
                    self.result.oversized_rejections += 1;
                    if size <= max {
                        self.violation(format!("row of {} bytes rejected under ceiling {}", size, max));
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }

            if session.pending_bytes() > ceiling {
                self.violation(format!(
                    "stream {} buffered {} bytes over ceiling {}",
                    stream,
                    session.pending_bytes(),
                    ceiling
                ));
            }
        }

        if failure.is_none() && plan.abort {
            session.abort();
            if self.service.is_finalized(&stream) {
                self.violation(format!("aborted stream {} was finalized", stream));
            }
            return SessionOutcome::Aborted {
                stream,
                rows_added: accepted.len() as u64,
            };
        }

        let error = match failure {
            Some(e) => e,
            None => match session.commit().await {
                Ok(count) => {
                    self.check_committed(&stream, count, &accepted);
                    self.committed_streams.insert(stream.clone());
                    self.result.rows_committed += count;
                    return SessionOutcome::Committed {
                        stream,
                        rows: count,
                    };
                }
                Err(e) => e,
            },
        };
        let acknowledged_rows = session.committed_row_count();
        self.check_failed(&stream, &error, acknowledged_rows, &accepted, session.state());
        session.abort();

        SessionOutcome::Failed {
            stream,
            acknowledged_rows,
            error: error.to_string(),
        }
    }

    fn check_committed(&mut self, stream: &str, count: u64, accepted: &[Bytes]) {
        if count != accepted.len() as u64 {
            self.violation(format!(
                "stream {} committed {} rows but {} were accepted",
                stream,
                count,
                accepted.len()
            ));
        }
        let stored = self.service.stream_rows(stream).unwrap_or_default();
        if stored != accepted {
            self.violation(format!(
                "stream {} stored {} rows that differ from the {} accepted",
                stream,
                stored.len(),
                accepted.len()
            ));
        }
        if !self.service.is_finalized(stream) {
            self.violation(format!("committed stream {} is not finalized", stream));
        }
    }

    fn check_failed(
        &mut self,
        stream: &str,
        error: &WriteStreamError,
        acknowledged: u64,
        accepted: &[Bytes],
        state: SessionState,
    ) {
        if state != SessionState::Failed {
            self.violation(format!(
                "stream {} failed with '{}' but session is {}",
                stream, error, state
            ));
        }
        if let Some((expected, actual)) = error.row_count_mismatch() {
            self.violation(format!(
                "stream {} finalized {} rows, session expected {}",
                stream, actual, expected
            ));
        }

        let acknowledged = acknowledged as usize;
        let stored = self.service.stream_rows(stream).unwrap_or_default();
        if stored.len() < acknowledged || accepted.len() < acknowledged {
            self.violation(format!(
                "stream {} acknowledged {} rows but stored {} and accepted {}",
                stream,
                acknowledged,
                stored.len(),
                accepted.len()
            ));
        } else if stored[..acknowledged] != accepted[..acknowledged] {
            self.violation(format!(
                "stream {} acknowledged rows differ from stored rows",
                stream
            ));
        }
    }

    fn violation(&mut self, message: String) {
        tracing::error!(seed = self.config.seed, %message, "invariant violation");
        self.result.invariant_violations.push(message);
    }

    /// Whole-run checks on the service state
    pub fn check_invariants(&mut self) {
        for stream in self.service.stream_names() {
            if self.service.is_finalized(&stream) && !self.committed_streams.contains(&stream) {
                self.violation(format!(
                    "stream {} was finalized without a successful commit",
                    stream
                ));
            }
        }

        self.result.client_stats = self.client.stats();
        self.result.buggify_summary = buggify::get_stats().summary();
    }

    pub fn service(&self) -> &InMemoryWriteService {
        &self.service
    }

    pub fn result(&self) -> &WriteStreamDSTResult {
        &self.result
    }

    pub fn into_result(self) -> WriteStreamDSTResult {
        self.result
    }
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    sessions_per_run: usize,
    config_fn: impl Fn(u64) -> WriteStreamDSTConfig,
) -> Vec<WriteStreamDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = WriteStreamDSTHarness::new(config_fn(seed));
        harness.run(sessions_per_run).await;
        harness.check_invariants();
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[WriteStreamDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let sessions: u64 = results.iter().map(|r| r.sessions).sum();
    let committed: u64 = results.iter().map(|r| r.committed).sum();
    let rows: u64 = results.iter().map(|r| r.rows_committed).sum();
    let faults: u64 = results.iter().map(|r| r.client_stats.total_faults()).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} sessions, {} committed, {} rows, {} faults injected",
        passed, total, sessions, committed, rows, faults
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dst_harness_calm() {
        let mut harness = WriteStreamDSTHarness::new(WriteStreamDSTConfig::calm(42));
        harness.run(30).await;
        harness.check_invariants();

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {:?}",
            result.invariant_violations
        );
        assert_eq!(result.sessions, 30);
        assert_eq!(result.failed, 0);
        assert_eq!(result.open_failures, 0);
        assert_eq!(result.committed + result.aborted, 30);
        assert_eq!(result.client_stats.total_faults(), 0);
    }

    #[tokio::test]
    async fn test_dst_harness_with_faults() {
        let mut harness = WriteStreamDSTHarness::new(WriteStreamDSTConfig::chaos(123));
        harness.run(50).await;
        harness.check_invariants();

        let result = harness.result();
        assert!(
            result.is_success(),
            "Invariants must hold under faults: {:?}",
            result.invariant_violations
        );
        assert!(result.client_stats.total_faults() > 0);
        println!("{}", result.summary());
    }

    #[tokio::test]
    async fn test_dst_deterministic() {
        let seed = 12345;

        let mut harness1 = WriteStreamDSTHarness::new(WriteStreamDSTConfig::moderate(seed));
        harness1.run(20).await;
        harness1.check_invariants();

        let mut harness2 = WriteStreamDSTHarness::new(WriteStreamDSTConfig::moderate(seed));
        harness2.run(20).await;
        harness2.check_invariants();

        let (a, b) = (harness1.result(), harness2.result());
        assert_eq!(a.committed, b.committed, "Same seed should produce same results");
        assert_eq!(a.rows_committed, b.rows_committed);
        assert_eq!(a.client_stats, b.client_stats);
        assert_eq!(
            harness1.service().append_offsets(),
            harness2.service().append_offsets()
        );
    }

    #[tokio::test]
    async fn test_dst_batch_moderate() {
        let results = run_dst_batch(2000, 10, 20, WriteStreamDSTConfig::moderate).await;

        let summary = summarize_batch(&results);
        println!("{}", summary);

        assert!(
            results.iter().all(|r| r.is_success()),
            "All moderate runs should pass: {}",
            summary
        );
    }

    #[test]
    fn test_workload_generator() {
        let config = WriteStreamDSTConfig::chaos(42);
        let ceiling = config.session_config.max_request_bytes();
        let mut workload = WriteStreamWorkload::new(config);

        let mut rows = 0;
        let mut oversized = 0;
        let mut aborts = 0;
        for _ in 0..200 {
            let plan = workload.next_session();
            assert!(plan.row_sizes.len() <= 40);
            rows += plan.row_sizes.len();
            oversized += plan.row_sizes.iter().filter(|s| **s > ceiling).count();
            aborts += plan.abort as usize;
        }

        assert!(rows > 1000, "Expected plenty of rows");
        assert!(oversized > 0, "Expected some oversized rows");
        assert!(aborts > 0, "Expected some aborts");
    }

    #[test]
    fn test_result_serializes() {
        let mut result = WriteStreamDSTResult::new(7);
        result.outcomes.push(SessionOutcome::Committed {
            stream: "t/streams/1".to_string(),
            rows: 3,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["seed"], 7);
        assert_eq!(json["outcomes"][0]["outcome"], "committed");
        assert_eq!(json["outcomes"][0]["rows"], 3);
    }
}
