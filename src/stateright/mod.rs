//! Stateright Model Checking
//!
//! Exhaustive state-space exploration of the write-stream session protocol.
//!
//! ## Verification Layers
//!
//! ```text
//!     ┌──────────────────────────────────────┐
//!     │   Stateright  │   DST Tests  │ Unit  │
//!     │  (Exhaustive) │ (Simulation) │ tests │
//!     └──────────────────────────────────────┘
//! ```
//!
//! The model abstracts rows to sizes and the service to a row counter, then
//! branches on every append and finalize outcome. `write::dst` covers the
//! same invariants against the real session code with random faults.
//!
//! ## Running Model Checks
//!
//! ```bash
//! # Full check (marked #[ignore] for CI speed)
//! cargo test stateright_session -- --ignored --nocapture
//! ```

pub mod session;
