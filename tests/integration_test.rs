//! Integration tests: kernels, sublayers, full forward pass, weight files.

use bitnet_int8::attention::kv_head_for;
use bitnet_int8::kernels::bitlinear_accumulate;
use bitnet_int8::model::{create_model_seeded, demo_config, read_weights, write_weights};
use bitnet_int8::{
    bitlinear, create_demo_model, create_demo_model_seeded, load_weights, residual_add,
    save_weights, AttentionSublayer, AttentionWeights, BitNetConfig, BitNetError, FfnSublayer,
    FfnWeights, InferenceEngine, Tensor, TensorPool, TextGenerator,
};
use rand::Rng;

fn random_ternary(rng: &mut impl Rng, shape: &[usize]) -> Tensor {
    let n = shape.iter().product();
    let data = (0..n).map(|_| rng.gen_range(-1i8..=1)).collect();
    Tensor::from_vec(shape, data).unwrap()
}

#[test]
fn bitlinear_small_cases() {
    let x = Tensor::from_vec(&[1, 3], vec![1, 2, 3]).unwrap();
    let w = Tensor::from_vec(&[2, 3], vec![1, 0, -1, 1, 1, 1]).unwrap();
    assert_eq!(bitlinear(&x, &w).unwrap().as_slice(), &[-2, 6]);

    let x = Tensor::from_vec(&[1, 2], vec![100, 100]).unwrap();
    let w = Tensor::from_vec(&[1, 2], vec![1, 1]).unwrap();
    assert_eq!(bitlinear(&x, &w).unwrap().as_slice(), &[127]);
    assert_eq!(bitlinear_accumulate(&[100, 100], &w).unwrap(), vec![200]);
}

#[test]
fn bitlinear_matches_naive_loop() {
    let mut rng = rand::thread_rng();
    let (rows, inp, out) = (6, 96, 40);
    let w = random_ternary(&mut rng, &[out, inp]);
    let data: Vec<i8> = (0..rows * inp).map(|_| rng.gen_range(-20i8..=20)).collect();
    let x = Tensor::from_vec(&[2, 3, inp], data.clone()).unwrap();
    let y = bitlinear(&x, &w).unwrap();
    assert_eq!(y.shape(), &[2, 3, out]);
    for r in 0..rows {
        for o in 0..out {
            let acc: i32 = (0..inp)
                .map(|k| data[r * inp + k] as i32 * w.as_slice()[o * inp + k] as i32)
                .sum();
            assert_eq!(
                y.as_slice()[r * out + o],
                acc.clamp(-128, 127) as i8,
                "row {r} col {o}"
            );
        }
    }
}

#[test]
fn residual_saturates() {
    let a = Tensor::from_vec(&[2], vec![100, -100]).unwrap();
    let b = Tensor::from_vec(&[2], vec![100, -100]).unwrap();
    assert_eq!(residual_add(&a, &b).unwrap().as_slice(), &[127, -128]);
}

#[test]
fn grouped_query_mapping() {
    assert_eq!(kv_head_for(5, 4), 1);
    assert_eq!(kv_head_for(3, 4), 3);
    assert_eq!(kv_head_for(7, 1), 0);
}

#[test]
fn sublayers_preserve_shape() {
    let config = BitNetConfig {
        vocab_size: 32,
        hidden_size: 64,
        num_attention_heads: 8,
        num_key_value_heads: 4,
        num_hidden_layers: 1,
        intermediate_size: 128,
        max_position_embeddings: 32,
        eos_token_id: 0,
        ..BitNetConfig::default()
    };
    let mut rng = rand::thread_rng();
    let attention = AttentionSublayer::new(
        &config,
        AttentionWeights {
            q: random_ternary(&mut rng, &[64, 64]),
            k: random_ternary(&mut rng, &[32, 64]),
            v: random_ternary(&mut rng, &[32, 64]),
            o: random_ternary(&mut rng, &[64, 64]),
        },
        vec![16.0; 64],
    )
    .unwrap();
    let ffn = FfnSublayer::new(
        &config,
        FfnWeights {
            up: random_ternary(&mut rng, &[128, 64]),
            down: random_ternary(&mut rng, &[64, 128]),
        },
        vec![16.0; 64],
    )
    .unwrap();

    let pool = TensorPool::new();
    let data = (0..2 * 10 * 64).map(|_| rng.gen_range(-64i8..=64)).collect();
    let x = Tensor::from_vec(&[2, 10, 64], data).unwrap();
    let y = attention.forward(&x, &pool).unwrap();
    assert_eq!(y.shape(), &[2, 10, 64]);
    let z = ffn.forward(&y, &pool).unwrap();
    assert_eq!(z.shape(), &[2, 10, 64]);
}

#[test]
fn forward_pass() {
    let model = create_demo_model().unwrap();
    let vocab = model.vocab_size();
    let engine = InferenceEngine::new(model);
    let logits = engine.forward(&[0, 1, 2, 3]).unwrap();
    assert_eq!(logits.len(), vocab);
    assert!(logits.iter().all(|x| x.is_finite()));
}

#[test]
fn forward_rejects_bad_ids() {
    let engine = InferenceEngine::new(create_demo_model_seeded(3).unwrap());
    assert!(matches!(engine.forward(&[]), Err(BitNetError::EmptyInput)));
    assert!(matches!(
        engine.forward(&[0, 256]),
        Err(BitNetError::InvalidToken(256))
    ));
    let too_long: Vec<usize> = (0..129).map(|i| i % 256).collect();
    assert!(matches!(
        engine.forward(&too_long),
        Err(BitNetError::SequenceTooLong { len: 129, max: 128 })
    ));
}

#[test]
fn generation() {
    let model = create_demo_model_seeded(42).unwrap();
    let eos = model.config.eos_token_id;
    let gen = TextGenerator::new(model);
    let prompt = vec![0usize, 1, 2];
    let out = gen.generate(&prompt, 10).unwrap();
    assert_eq!(&out[..3], &prompt[..]);
    assert!(out.len() <= 10);
    assert!(out.len() > 3);
    // EOS can only appear as the final token.
    if let Some(pos) = out[3..].iter().position(|&t| t == eos) {
        assert_eq!(pos + 3, out.len() - 1);
    }
}

#[test]
fn generation_with_rope() {
    let mut config = demo_config();
    config.use_rope = true;
    let gen = TextGenerator::new(create_model_seeded(config, 5).unwrap());
    let out = gen.generate(&[4, 5], 6).unwrap();
    assert!(out.len() <= 6 && out.len() > 2);
}

#[test]
fn weights_file_round_trip() {
    let model = create_demo_model_seeded(9).unwrap();
    let path = std::env::temp_dir().join(format!("bitnet_int8_{}.bn58", std::process::id()));
    save_weights(&model, &path).unwrap();
    let loaded = load_weights(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let ids = [7usize, 3, 11];
    let a = InferenceEngine::new(model).forward(&ids).unwrap();
    let b = InferenceEngine::new(loaded).forward(&ids).unwrap();
    assert_eq!(a, b);
}

#[test]
fn rope_flag_survives_serialization() {
    let mut config = demo_config();
    config.use_rope = true;
    config.rope_theta = 500.0;
    let model = create_model_seeded(config.clone(), 1).unwrap();
    let mut bytes = Vec::new();
    write_weights(&model, &mut bytes).unwrap();
    let loaded = read_weights(bytes.as_slice()).unwrap();
    assert_eq!(loaded.config, config);
}
