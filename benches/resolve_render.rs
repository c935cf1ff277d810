//! Benchmarks for the per-pass hot path: decoding layers, merging them and
//! rendering the artifact, plus the idempotence comparison.

use capture_config_agent::core::{CaptureConfig, ConfigMerger};
use capture_config_agent::render::{Renderer, bpf_filter};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const GLOBAL: &[u8] = br#"{
    "capture": {"interface": "eth1", "idle_timeout": 120, "enable_applabel": true},
    "filter": {"ip_blacklist": ["10.1.0.0/16", "10.2.0.0/16"], "bpf_filter": "tcp or udp"},
    "status_report": {"status_report_url": "http://collector:8080/status"}
}"#;
const CLUSTER: &[u8] = br#"{"capture": {"enable_dpi": true}, "filter": {"dst_ports": [53, 80, 443]}}"#;
const NODE: &[u8] = br#"{"capture": {"interface": "bond0"}, "status_report": {"uuid": "probe-1"}}"#;

fn layers() -> (CaptureConfig, CaptureConfig, CaptureConfig) {
    (
        CaptureConfig::from_layer_bytes(GLOBAL).unwrap(),
        CaptureConfig::from_layer_bytes(CLUSTER).unwrap(),
        CaptureConfig::from_layer_bytes(NODE).unwrap(),
    )
}

/// Benchmark decoding a layer payload
fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(GLOBAL.len() as u64));
    group.bench_function("global_layer", |b| {
        b.iter(|| CaptureConfig::from_layer_bytes(black_box(GLOBAL)).unwrap());
    });
    group.finish();
}

/// Benchmark the three-layer merge
fn benchmark_resolve(c: &mut Criterion) {
    let defaults = CaptureConfig::defaults();
    let (global, cluster, node) = layers();

    let mut group = c.benchmark_group("resolve");
    group.bench_function("three_layers", |b| {
        b.iter(|| {
            ConfigMerger::resolve(
                black_box(&defaults),
                Some(&global),
                Some(&cluster),
                Some(&node),
            )
        });
    });
    group.bench_function("no_layers", |b| {
        b.iter(|| ConfigMerger::resolve(black_box(&defaults), None, None, None));
    });
    group.finish();
}

/// Benchmark the equality check deciding whether to apply
fn benchmark_compare(c: &mut Criterion) {
    let defaults = CaptureConfig::defaults();
    let (global, cluster, node) = layers();
    let merged = ConfigMerger::resolve(&defaults, Some(&global), Some(&cluster), Some(&node));
    let snapshot = merged.clone();

    c.bench_function("compare_unchanged", |b| {
        b.iter(|| black_box(&merged) == black_box(&snapshot));
    });
}

/// Benchmark filter composition with growing address lists
fn benchmark_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("bpf_filter");

    for entries in [0usize, 8, 64, 512] {
        let mut cfg = CaptureConfig::defaults();
        cfg.filter.ip_whitelist = (0..entries).map(|i| format!("10.{}.0.0/16", i % 256)).collect();
        cfg.filter.ip_blacklist = (0..entries)
            .map(|i| format!("172.16.{}.0/24", i % 256))
            .collect();

        group.throughput(Throughput::Elements(entries as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &cfg, |b, cfg| {
            b.iter(|| bpf_filter(black_box(cfg)));
        });
    }
    group.finish();
}

/// Benchmark rendering the full artifact
fn benchmark_render(c: &mut Criterion) {
    let defaults = CaptureConfig::defaults();
    let (global, cluster, node) = layers();
    let merged = ConfigMerger::resolve(&defaults, Some(&global), Some(&cluster), Some(&node));
    let renderer = Renderer::new("/etc/yaf/yaf.init", "edge", "probe-1");

    c.bench_function("render", |b| {
        b.iter(|| renderer.render(black_box(&merged), "2024-01-01 00:00:00"));
    });
}

criterion_group!(
    benches,
    benchmark_decode,
    benchmark_resolve,
    benchmark_compare,
    benchmark_filter,
    benchmark_render,
);

criterion_main!(benches);
