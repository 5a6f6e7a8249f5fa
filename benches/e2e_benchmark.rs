//! End-to-end benchmarks over the int8 pipeline: RoPE stage, KV grouping, greedy decode.

use bitnet_int8::model::{create_model_seeded, demo_config};
use bitnet_int8::parallel::with_workers;
use bitnet_int8::{BitNetConfig, InferenceEngine, TextGenerator};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const SEED: u64 = 42;

fn engine_for(config: BitNetConfig) -> InferenceEngine {
    InferenceEngine::new(create_model_seeded(config, SEED).unwrap())
}

fn tokens(len: usize) -> Vec<usize> {
    (0..len).map(|i| (i * 31) % 256).collect()
}

/// Forward latency with the rotary stage off and on.
fn bench_rope_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("rope_stage");

    for use_rope in [false, true] {
        let engine = engine_for(BitNetConfig {
            use_rope,
            ..demo_config()
        });
        let label = if use_rope { "rope" } else { "no_rope" };
        for seq_len in [8, 32, 128] {
            let input = tokens(seq_len);
            group.throughput(Throughput::Elements(seq_len as u64));
            group.bench_with_input(BenchmarkId::new(label, seq_len), &input, |b, input| {
                b.iter(|| engine.forward(input).unwrap());
            });
        }
    }

    group.finish();
}

/// Same query heads, fewer shared key/value heads.
fn bench_kv_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("kv_grouping");
    let input = tokens(64);

    for kv_heads in [4, 2, 1] {
        let engine = engine_for(BitNetConfig {
            num_key_value_heads: kv_heads,
            ..demo_config()
        });
        group.bench_with_input(BenchmarkId::new("kv_heads", kv_heads), &input, |b, input| {
            b.iter(|| engine.forward(input).unwrap());
        });
    }

    group.finish();
}

/// Greedy decode cost at different worker counts. No KV cache, so each step re-runs the prefix.
fn bench_greedy_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("greedy_workers");
    let generator = TextGenerator::new(create_model_seeded(demo_config(), SEED).unwrap());
    let prompt = tokens(4);

    for workers in [1, 2, 4] {
        group.bench_with_input(BenchmarkId::new("decode_16", workers), &workers, |b, &workers| {
            b.iter(|| {
                with_workers(workers, || generator.generate(&prompt, prompt.len() + 16))
                    .unwrap()
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rope_stage, bench_kv_grouping, bench_greedy_workers);
criterion_main!(benches);
