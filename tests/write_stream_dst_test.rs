//! Write-Stream Session DST Tests
//!
//! Deterministic simulation tests (FoundationDB-style, seed-based) for the
//! write-stream session. Many seeds, each fully reproducible.
//!
//! ## Test Categories
//!
//! - **Calm tests**: No faults, every non-aborted session commits
//! - **Moderate tests**: Default fault rates, invariants must hold
//! - **Chaos tests**: Heavy faults, invariants must still hold

use append_stream::write::{
    run_dst_batch, summarize_batch, WriteStreamDSTConfig, WriteStreamDSTHarness,
};

// =============================================================================
// Single Seed Tests
// =============================================================================

#[tokio::test]
async fn test_write_stream_dst_single_calm() {
    let config = WriteStreamDSTConfig::calm(12345);
    let mut harness = WriteStreamDSTHarness::new(config);

    harness.run(100).await;
    harness.check_invariants();

    let result = harness.result();
    println!("{}", result.summary());

    assert!(
        result.is_success(),
        "Calm mode should not violate invariants: {:?}",
        result.invariant_violations
    );
    assert_eq!(result.committed + result.aborted, 100);
    assert!(result.rows_committed > 0);
}

#[tokio::test]
async fn test_write_stream_dst_single_chaos() {
    let config = WriteStreamDSTConfig::chaos(99999);
    let mut harness = WriteStreamDSTHarness::new(config);

    harness.run(100).await;
    harness.check_invariants();

    let result = harness.result();
    println!("{}", result.summary());
    println!("Client stats: {:?}", result.client_stats);
    println!("{}", result.buggify_summary);

    assert!(
        result.is_success(),
        "Chaos must not violate invariants: {:?}",
        result.invariant_violations
    );
    assert!(result.failed + result.open_failures > 0, "Chaos should cause failures");
}

// =============================================================================
// Multi-Seed Batch Tests (DST)
// =============================================================================

#[tokio::test]
async fn test_write_stream_dst_100_seeds_calm() {
    let results = run_dst_batch(0, 100, 20, WriteStreamDSTConfig::calm).await;

    let summary = summarize_batch(&results);
    println!("100 Seeds Calm:\n{}", summary);

    let failed: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();
    assert!(failed.is_empty(), "All calm runs should pass. Failed seeds: {:?}", failed);
    assert!(results.iter().all(|r| r.failed == 0 && r.open_failures == 0));
}

#[tokio::test]
async fn test_write_stream_dst_100_seeds_moderate() {
    let results = run_dst_batch(1000, 100, 20, WriteStreamDSTConfig::moderate).await;

    let summary = summarize_batch(&results);
    println!("100 Seeds Moderate:\n{}", summary);

    let failed: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();
    assert!(failed.is_empty(), "Failed seeds: {:?}", failed);
}

#[tokio::test]
async fn test_write_stream_dst_50_seeds_chaos() {
    let results = run_dst_batch(5000, 50, 20, WriteStreamDSTConfig::chaos).await;

    let summary = summarize_batch(&results);
    println!("50 Seeds Chaos:\n{}", summary);

    let failed: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();
    assert!(failed.is_empty(), "Failed seeds: {:?}", failed);

    let faults: u64 = results.iter().map(|r| r.client_stats.total_faults()).sum();
    assert!(faults > 0, "Chaos should inject faults");
}

// =============================================================================
// Determinism
// =============================================================================

#[tokio::test]
async fn test_write_stream_dst_seed_replay() {
    let first = run_dst_batch(777, 5, 15, WriteStreamDSTConfig::chaos).await;
    let second = run_dst_batch(777, 5, 15, WriteStreamDSTConfig::chaos).await;

    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.seed, b.seed);
        assert_eq!(a.committed, b.committed, "seed {} diverged", a.seed);
        assert_eq!(a.failed, b.failed, "seed {} diverged", a.seed);
        assert_eq!(a.rows_committed, b.rows_committed, "seed {} diverged", a.seed);
        assert_eq!(a.client_stats, b.client_stats, "seed {} diverged", a.seed);
    }
}

// =============================================================================
// Long-running sweep
// =============================================================================

#[tokio::test]
#[ignore] // Run with: cargo test --test write_stream_dst_test -- --ignored --nocapture
async fn test_write_stream_dst_1000_seeds_chaos() {
    let results = run_dst_batch(100_000, 1000, 50, WriteStreamDSTConfig::chaos).await;

    let summary = summarize_batch(&results);
    println!("1000 Seeds Chaos:\n{}", summary);

    assert!(results.iter().all(|r| r.is_success()), "{}", summary);
}
