//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! `add_row` runs once per produced record, so buffering and the overflow
//! flush dominate producer-side cost. Everything runs against the in-memory
//! service with a simulated clock, so only client-side work is measured.

use append_stream::io::simulation::SimulatedRng;
use append_stream::write::{
    InMemoryWriteService, ProtoRows, ProtoSchema, SessionContext, SimulatedClock,
    WriteStreamConfig, WriteStreamSession,
};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to build runtime")
}

async fn open_session(
    ceiling: usize,
) -> WriteStreamSession<InMemoryWriteService, SimulatedClock> {
    let ctx = SessionContext::new(SimulatedClock::new(0), Box::new(SimulatedRng::new(0)));
    WriteStreamSession::open_with(
        Arc::new(InMemoryWriteService::new()),
        "projects/bench/datasets/d/tables/t",
        ProtoSchema::new("Row", Bytes::from_static(b"descriptor")),
        &WriteStreamConfig::with_request_ceiling(ceiling),
        ctx,
    )
    .await
    .expect("failed to open session")
}

/// Benchmark add_row with a ceiling large enough that nothing flushes
fn bench_add_row_buffered(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("add_row_buffered");

    for row_len in [64, 512, 4096] {
        let row = Bytes::from(vec![b'x'; row_len]);
        group.throughput(Throughput::Bytes(row_len as u64));

        group.bench_function(format!("row_len_{}", row_len), |b| {
            let mut session = rt.block_on(open_session(64 * 1024 * 1024));
            b.iter(|| rt.block_on(session.add_row(black_box(row.clone()))))
        });
    }

    group.finish();
}

/// Benchmark add_row including the periodic overflow flush
fn bench_add_row_with_flush(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("add_row_with_flush");
    group.throughput(Throughput::Elements(1));

    for rows_per_request in [10, 100, 1000] {
        let row = Bytes::from(vec![b'y'; 100]);

        group.bench_function(format!("rows_per_request_{}", rows_per_request), |b| {
            let mut session = rt.block_on(open_session(100 * rows_per_request));
            b.iter(|| rt.block_on(session.add_row(black_box(row.clone()))))
        });
    }

    group.finish();
}

/// Benchmark a full commit: flush, quiescence (virtual), finalize
fn bench_commit(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("commit");

    for rows in [1, 100] {
        group.bench_function(format!("rows_{}", rows), |b| {
            b.iter_batched(
                || {
                    rt.block_on(async {
                        let mut session = open_session(1_000_000).await;
                        for _ in 0..rows {
                            let _ = session.add_row(Bytes::from_static(&[7u8; 128])).await;
                        }
                        session
                    })
                },
                |mut session| rt.block_on(session.commit()),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Benchmark cloning a request batch (done once per flush)
fn bench_proto_rows_clone(c: &mut Criterion) {
    let mut group = c.benchmark_group("proto_rows_clone");

    for rows in [10, 1000] {
        let batch: ProtoRows = (0..rows).map(|_| Bytes::from(vec![0u8; 256])).collect();
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_function(format!("rows_{}", rows), |b| b.iter(|| black_box(&batch).clone()));
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_add_row_buffered,
    bench_add_row_with_flush,
    bench_commit,
    bench_proto_rows_clone,
);

criterion_main!(benches);
