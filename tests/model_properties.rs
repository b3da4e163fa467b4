//! End-to-end properties of the full model

use nanogpt::optimizer::AdamW;
use nanogpt::{GptError, ModelConfig, Parameters, TokenGrid, GPT};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn tiny_model(seed: u64) -> GPT {
    GPT::new(ModelConfig::tiny(), &mut StdRng::seed_from_u64(seed)).unwrap()
}

#[test]
fn test_embedding_width_must_divide_into_heads() {
    let config = ModelConfig {
        n_embd: 12,
        n_head: 5,
        ..ModelConfig::tiny()
    };
    let result = GPT::new(config, &mut StdRng::seed_from_u64(0));
    assert!(matches!(result, Err(GptError::ConfigInvalid(_))));
}

#[test]
fn test_future_tokens_never_change_earlier_logits() {
    let model = tiny_model(1337);
    let vocab = model.config.vocab_size;
    let original = TokenGrid::from_rows(&[
        vec![1, 5, 9, 2, 6, 5, 3, 5],
        vec![8, 9, 7, 9, 3, 2, 3, 8],
    ]);
    let (base, _) = model.forward(&original, None).unwrap();

    for cut in 1..8 {
        let perturbed: Vec<Vec<usize>> = (0..2)
            .map(|r| {
                original
                    .row(r)
                    .iter()
                    .enumerate()
                    .map(|(i, &t)| if i >= cut { (t + 7) % vocab } else { t })
                    .collect()
            })
            .collect();
        let (logits, _) = model.forward(&TokenGrid::from_rows(&perturbed), None).unwrap();

        for r in 0..2 {
            let row = r * 8 * vocab;
            let unchanged = row..row + cut * vocab;
            assert_eq!(
                base.data[unchanged.clone()],
                logits.data[unchanged],
                "row {r}: positions before {cut} changed"
            );
            let changed = row + cut * vocab..row + 8 * vocab;
            assert_ne!(base.data[changed.clone()], logits.data[changed]);
        }
    }
}

#[test]
fn test_output_projection_follows_embedding_update() {
    let mut model = tiny_model(7);
    let before = model.lm_head_weight().clone();

    let idx = TokenGrid::new(vec![1, 2, 3, 4, 5, 6, 7, 8], 2, 4);
    let targets = TokenGrid::new(vec![2, 3, 4, 5, 6, 7, 8, 9], 2, 4);
    let (logits, cache) = model.forward_with_cache(&idx).unwrap();
    let grads = model.backward(&logits, &targets, &cache).unwrap();
    AdamW::new(1e-2, 0.9, 0.95, 1e-8, 0.0).step(&mut model, &grads);

    assert_ne!(model.wte.data, before.data);
    assert!(std::ptr::eq(model.lm_head_weight(), &model.wte));
    let sd = model.state_dict();
    assert_eq!(sd["lm_head.weight"], sd["transformer.wte.weight"]);
    assert_eq!(sd["lm_head.weight"].data, model.wte.data);

    let (new_logits, _) = model.forward(&idx, None).unwrap();
    assert_ne!(new_logits.data, logits.data);
}

#[test]
fn test_tied_weight_counted_once() {
    let model = tiny_model(0);
    let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
    assert!(names.iter().all(|n| n != "lm_head.weight"));
    assert_eq!(names.iter().filter(|n| n.as_str() == "transformer.wte.weight").count(), 1);
    assert_eq!(model.state_dict_keys().len(), names.len() + 1);
}

#[test]
fn test_sequences_longer_than_block_are_rejected() {
    let model = tiny_model(0);
    let idx = TokenGrid::new(vec![0; 2 * 9], 2, 9);
    match model.forward(&idx, None) {
        Err(GptError::SequenceTooLong { len, block_size }) => assert_eq!((len, block_size), (9, 8)),
        other => panic!("expected SequenceTooLong, got {other:?}"),
    }
}
