//! Log sink benchmarks: producer-side append cost and end-to-end flush throughput.
//!
//! Run with:
//!   cargo bench --bench log_sink

use std::hint::black_box;
use std::time::Duration;

use automdf::models::{LogEntry, LogSinkConfig};
use automdf::services::log_sink::AsyncLogSink;
use camino::Utf8PathBuf;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(30);

fn sink_in(dir: &TempDir, max_queue_size: usize) -> AsyncLogSink {
    AsyncLogSink::new(LogSinkConfig {
        logs_dir: Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("temp dir is UTF-8"),
        max_queue_size,
        ..LogSinkConfig::default()
    })
}

fn worker_lines(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("[AutoMDF][INFO][12:00:{:02}] processed shipment row {}", i % 60, i))
        .collect()
}

/// What a single `append` costs the caller while the consumer keeps up
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_sink_append");
    let dir = TempDir::new().expect("temp dir");
    let sink = sink_in(&dir, usize::MAX);
    sink.start_session("bench-append").expect("session");
    let line = "[AutoMDF][INFO][12:00:00] processed shipment row 42";

    group.throughput(Throughput::Elements(1));
    group.bench_function("single_line", |b| {
        b.iter(|| black_box(sink.append(black_box(line))));
    });
    group.finish();
    sink.shutdown(WAIT);
}

/// Append a batch and wait until it is on disk
fn bench_flush_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_sink_flush");
    group.measurement_time(Duration::from_secs(5));

    for count in [100usize, 1_000, 10_000] {
        let lines = worker_lines(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &lines, |b, lines| {
            let dir = TempDir::new().expect("temp dir");
            let sink = sink_in(&dir, count * 2);
            sink.start_session("bench-flush").expect("session");
            b.iter(|| {
                for line in lines {
                    sink.append(line);
                }
                assert!(sink.flush(WAIT));
            });
            sink.shutdown(WAIT);
        });
    }
    group.finish();
}

/// Parsing alone, to separate it from queueing cost
fn bench_parse(c: &mut Criterion) {
    let lines = [
        "[AutoMDF][WARNING][08:15:00] retrying upload",
        "[ERROR] portal returned 500",
        "  Traceback (most recent call last):",
    ];
    c.bench_function("log_entry_parse", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(LogEntry::parse(black_box(line)));
            }
        });
    });
}

criterion_group!(benches, bench_append, bench_flush_throughput, bench_parse);
criterion_main!(benches);
