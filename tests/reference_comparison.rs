//! Reference comparison: the forward pass is deterministic and independent of worker count.
//!
//! Uses a deterministic demo model (fixed seed).

use bitnet_int8::parallel::with_workers;
use bitnet_int8::{create_demo_model_seeded, InferenceEngine, TextGenerator};

const SEED: u64 = 42;
const TEST_INPUT: [usize; 3] = [0, 1, 2];

#[test]
fn reference_comparison_determinism() {
    let engine = InferenceEngine::new(create_demo_model_seeded(SEED).unwrap());
    let logits_a = engine.forward(&TEST_INPUT).unwrap();
    let logits_b = engine.forward(&TEST_INPUT).unwrap();
    assert_eq!(logits_a, logits_b, "forward pass must be deterministic");
}

#[test]
fn reference_comparison_same_seed_same_model() {
    let a = InferenceEngine::new(create_demo_model_seeded(SEED).unwrap());
    let b = InferenceEngine::new(create_demo_model_seeded(SEED).unwrap());
    assert_eq!(
        a.forward(&TEST_INPUT).unwrap(),
        b.forward(&TEST_INPUT).unwrap()
    );
}

#[test]
fn reference_comparison_logits_are_integral() {
    // Logits are int32 accumulators cast to f32.
    let engine = InferenceEngine::new(create_demo_model_seeded(SEED).unwrap());
    let logits = engine.forward(&TEST_INPUT).unwrap();
    assert!(logits.iter().all(|x| x.is_finite() && x.fract() == 0.0));
}

#[test]
fn reference_comparison_worker_count_independent() {
    let engine = InferenceEngine::new(create_demo_model_seeded(SEED).unwrap());
    let input: Vec<usize> = (0..24).map(|i| (i * 37) % 256).collect();
    let parallel = engine.forward(&input).unwrap();
    let single = with_workers(1, || engine.forward(&input)).unwrap().unwrap();
    let three = with_workers(3, || engine.forward(&input)).unwrap().unwrap();
    assert_eq!(parallel, single);
    assert_eq!(parallel, three);
}

#[test]
fn reference_comparison_generation_worker_count_independent() {
    let gen = TextGenerator::new(create_demo_model_seeded(SEED).unwrap());
    let a = gen.generate(&TEST_INPUT, 12).unwrap();
    let b = with_workers(1, || gen.generate(&TEST_INPUT, 12)).unwrap().unwrap();
    assert_eq!(a, b);
}

#[test]
fn reference_comparison_batch_matches_single() {
    let engine = InferenceEngine::new(create_demo_model_seeded(SEED).unwrap());
    let batch = vec![vec![0usize, 1, 2], vec![9, 8, 7], vec![100, 200, 255]];
    let batched = engine.forward_batch(&batch).unwrap();
    for (ids, logits) in batch.iter().zip(&batched) {
        assert_eq!(&engine.forward(ids).unwrap(), logits);
    }
}
