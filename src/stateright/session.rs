//! Stateright Model for the Write-Stream Session Protocol
//!
//! Exhaustively explores add_row / commit / abort interleaved with every
//! append and finalize outcome the service can produce:
//! - buffer_bounded: buffered bytes never exceed the request ceiling
//! - pending_consistent: running byte total matches the buffer
//! - acknowledged_prefix: the session never counts rows the server lacks
//! - committed_matches_server: a commit returns exactly the accepted rows
//! - finalize_only_on_commit: no finalized stream outside a successful commit

use stateright::{Model, Property};

#[derive(Clone, Debug)]
pub struct SessionModelConfig {
    pub max_request_bytes: usize,
    /// Row sizes the producer may offer; include one above the ceiling
    pub row_sizes: Vec<usize>,
    /// Bound on add_row calls per path
    pub max_row_attempts: u32,
}

impl Default for SessionModelConfig {
    fn default() -> Self {
        SessionModelConfig {
            max_request_bytes: 4,
            row_sizes: vec![1, 3, 5],
            max_row_attempts: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Open,
    Committed,
    Aborted,
    Failed,
}

/// What the service does with one append request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AckOutcome {
    Acknowledged,
    ServerError,
    /// Stored, acknowledged at the wrong offset
    OffsetSkew,
    /// Stored, response lost
    ResponseDropped,
}

const ACK_OUTCOMES: [AckOutcome; 4] = [
    AckOutcome::Acknowledged,
    AckOutcome::ServerError,
    AckOutcome::OffsetSkew,
    AckOutcome::ResponseDropped,
];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionModelState {
    pub phase: Phase,
    pub pending: Vec<usize>,
    pub pending_bytes: usize,
    pub committed_row_count: u64,
    pub rows_accepted: u64,
    pub row_attempts: u32,
    /// Rows stored by the server
    pub server_rows: u64,
    /// Row count reported by finalize, once finalized
    pub server_finalized: Option<u64>,
    /// Count returned by a successful commit
    pub returned_count: Option<u64>,
}

impl SessionModelState {
    pub fn new() -> Self {
        SessionModelState {
            phase: Phase::Open,
            pending: Vec::new(),
            pending_bytes: 0,
            committed_row_count: 0,
            rows_accepted: 0,
            row_attempts: 0,
            server_rows: 0,
            server_finalized: None,
            returned_count: None,
        }
    }

    /// Send the buffer as one append; returns false if the session failed
    fn flush(&mut self, ack: AckOutcome) -> bool {
        let rows = self.pending.len() as u64;
        // The server accepts only the exact next offset
        let stored = self.committed_row_count == self.server_rows;

        match ack {
            AckOutcome::Acknowledged if stored => {
                self.server_rows += rows;
                self.committed_row_count += rows;
                self.pending.clear();
                self.pending_bytes = 0;
                true
            }
            AckOutcome::OffsetSkew | AckOutcome::ResponseDropped => {
                if stored {
                    self.server_rows += rows;
                }
                self.phase = Phase::Failed;
                false
            }
            _ => {
                self.phase = Phase::Failed;
                false
            }
        }
    }
}

impl Default for SessionModelState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SessionAction {
    AddRow { size: usize, ack: AckOutcome },
    Commit { ack: AckOutcome, finalize_ok: bool },
    Abort,
}

pub struct WriteStreamSessionModel {
    pub config: SessionModelConfig,
}

impl WriteStreamSessionModel {
    pub fn new() -> Self {
        Self::with_config(SessionModelConfig::default())
    }

    pub fn with_config(config: SessionModelConfig) -> Self {
        WriteStreamSessionModel { config }
    }
}

impl Default for WriteStreamSessionModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for WriteStreamSessionModel {
    type State = SessionModelState;
    type Action = SessionAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![SessionModelState::new()]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        match state.phase {
            Phase::Open => {}
            Phase::Failed => {
                actions.push(SessionAction::Abort);
                return;
            }
            Phase::Committed | Phase::Aborted => return,
        }

        if state.row_attempts < self.config.max_row_attempts {
            for &size in &self.config.row_sizes {
                // Ack outcomes only matter when this row forces a flush
                let forces_flush = size <= self.config.max_request_bytes
                    && state.pending_bytes + size > self.config.max_request_bytes;
                if forces_flush {
                    for ack in ACK_OUTCOMES {
                        actions.push(SessionAction::AddRow { size, ack });
                    }
                } else {
                    actions.push(SessionAction::AddRow {
                        size,
                        ack: AckOutcome::Acknowledged,
                    });
                }
            }
        }

        for ack in ACK_OUTCOMES {
            for finalize_ok in [true, false] {
                actions.push(SessionAction::Commit { ack, finalize_ok });
            }
        }
        actions.push(SessionAction::Abort);
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut next = state.clone();
        let ceiling = self.config.max_request_bytes;

        match action {
            SessionAction::AddRow { size, ack } => {
                if next.phase != Phase::Open {
                    return None;
                }
                next.row_attempts += 1;

                if next.pending_bytes + size > ceiling {
                    if size > ceiling {
                        // RowTooLarge: nothing else changes
                        return Some(next);
                    }
                    if !next.flush(ack) {
                        return Some(next);
                    }
                }
                next.pending.push(size);
                next.pending_bytes += size;
                next.rows_accepted += 1;
            }

            SessionAction::Commit { ack, finalize_ok } => {
                if next.phase != Phase::Open {
                    return None;
                }
                if !next.pending.is_empty() && !next.flush(ack) {
                    return Some(next);
                }
                let expected = next.committed_row_count;

                if !finalize_ok {
                    next.phase = Phase::Failed;
                    return Some(next);
                }
                next.server_finalized = Some(next.server_rows);
                if next.server_rows != expected {
                    next.phase = Phase::Failed;
                } else {
                    next.phase = Phase::Committed;
                    next.returned_count = Some(next.server_rows);
                }
            }

            SessionAction::Abort => {
                if matches!(next.phase, Phase::Committed | Phase::Aborted) {
                    return None;
                }
                next.pending.clear();
                next.pending_bytes = 0;
                next.phase = Phase::Aborted;
            }
        }

        Some(next)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("buffer_bounded", |model: &WriteStreamSessionModel, state: &SessionModelState| {
                state.pending_bytes <= model.config.max_request_bytes
            }),
            Property::always("pending_consistent", |_: &WriteStreamSessionModel, state: &SessionModelState| {
                state.pending.iter().sum::<usize>() == state.pending_bytes
                    && (state.phase == Phase::Aborted
                        || state.committed_row_count + state.pending.len() as u64
                            == state.rows_accepted)
            }),
            Property::always("acknowledged_prefix", |_: &WriteStreamSessionModel, state: &SessionModelState| {
                state.committed_row_count <= state.server_rows
            }),
            Property::always("committed_matches_server", |_: &WriteStreamSessionModel, state: &SessionModelState| {
                if state.phase != Phase::Committed {
                    return true;
                }
                state.returned_count == Some(state.rows_accepted)
                    && state.server_finalized == Some(state.rows_accepted)
                    && state.server_rows == state.rows_accepted
            }),
            Property::always("finalize_only_on_commit", |_: &WriteStreamSessionModel, state: &SessionModelState| {
                state.server_finalized.is_none() || state.phase == Phase::Committed
            }),
            Property::sometimes("multi_flush_commit", |_: &WriteStreamSessionModel, state: &SessionModelState| {
                state.phase == Phase::Committed && state.rows_accepted >= 3
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    fn apply(model: &WriteStreamSessionModel, state: &SessionModelState, action: SessionAction) -> SessionModelState {
        model.next_state(state, action).unwrap()
    }

    #[test]
    fn test_overflow_flushes_once() {
        let model = WriteStreamSessionModel::new();
        let ok = AckOutcome::Acknowledged;

        let s = apply(&model, &SessionModelState::new(), SessionAction::AddRow { size: 3, ack: ok });
        let s = apply(&model, &s, SessionAction::AddRow { size: 3, ack: ok });

        assert_eq!(s.server_rows, 1);
        assert_eq!(s.committed_row_count, 1);
        assert_eq!(s.pending, vec![3]);
    }

    #[test]
    fn test_oversized_row_is_noop() {
        let model = WriteStreamSessionModel::new();
        let s = apply(
            &model,
            &SessionModelState::new(),
            SessionAction::AddRow { size: 1, ack: AckOutcome::Acknowledged },
        );
        let after = apply(&model, &s, SessionAction::AddRow { size: 5, ack: AckOutcome::Acknowledged });

        assert_eq!(after.pending, s.pending);
        assert_eq!(after.rows_accepted, 1);
        assert_eq!(after.phase, Phase::Open);
    }

    #[test]
    fn test_skew_fails_session_but_keeps_prefix() {
        let model = WriteStreamSessionModel::new();
        let s = apply(
            &model,
            &SessionModelState::new(),
            SessionAction::AddRow { size: 3, ack: AckOutcome::Acknowledged },
        );
        let s = apply(&model, &s, SessionAction::AddRow { size: 3, ack: AckOutcome::OffsetSkew });

        assert_eq!(s.phase, Phase::Failed);
        assert_eq!(s.committed_row_count, 0);
        assert_eq!(s.server_rows, 1);
        assert!(model.next_state(&s, SessionAction::Commit { ack: AckOutcome::Acknowledged, finalize_ok: true }).is_none());

        let aborted = apply(&model, &s, SessionAction::Abort);
        assert_eq!(aborted.phase, Phase::Aborted);
        assert!(aborted.server_finalized.is_none());
    }

    #[test]
    fn test_small_model_check() {
        let model = WriteStreamSessionModel::with_config(SessionModelConfig {
            max_request_bytes: 4,
            row_sizes: vec![2, 3],
            max_row_attempts: 3,
        });
        let checker = model.checker().spawn_bfs().join();
        checker.assert_properties();
    }

    #[test]
    #[ignore] // Run with: cargo test stateright_session -- --ignored --nocapture
    fn stateright_session_model_check() {
        let model = WriteStreamSessionModel::with_config(SessionModelConfig {
            max_request_bytes: 6,
            row_sizes: vec![1, 2, 4, 7],
            max_row_attempts: 6,
        });

        let checker = model.checker().spawn_bfs().join();

        println!("States explored: {}", checker.unique_state_count());

        checker.assert_properties();

        println!("Model check passed! All session invariants hold.");
    }
}
