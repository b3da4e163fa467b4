//! Importing weights stored the way the published checkpoints store them

use nanogpt::pretrained::{read_safetensors, TRANSPOSED};
use nanogpt::{
    GptError, Mismatch, ModelConfig, ModelFamily, Parameters, StateDict, Tensor, TokenGrid, GPT,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::Path;

fn tiny(seed: u64) -> GPT {
    GPT::new(ModelConfig::tiny(), &mut StdRng::seed_from_u64(seed)).unwrap()
}

/// Write `model` as a hub checkpoint: no `transformer.` prefix, no
/// `lm_head.weight`, linear weights stored `[in, out]`
fn write_hub_checkpoint(model: &GPT, path: &Path) {
    let mut header = serde_json::Map::new();
    let mut payload = Vec::new();
    for (name, tensor) in model.named_parameters() {
        let tensor = if TRANSPOSED.iter().any(|s| name.ends_with(s)) {
            tensor.transpose(0, 1)
        } else {
            tensor.clone()
        };
        let start = payload.len();
        for v in &tensor.data {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        header.insert(
            name.trim_start_matches("transformer.").to_string(),
            serde_json::json!({
                "dtype": "F32",
                "shape": tensor.shape,
                "data_offsets": [start, payload.len()],
            }),
        );
    }
    let header = serde_json::to_vec(&serde_json::Value::Object(header)).unwrap();
    let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&payload);
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_hub_checkpoint_reproduces_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.safetensors");
    let source = tiny(11);
    write_hub_checkpoint(&source, &path);

    let sd = read_safetensors(&path).unwrap();
    let expected = source.state_dict();
    assert!(sd.keys().eq(expected.keys()));

    let mut model = tiny(12);
    model.import_state_dict(&sd).unwrap();
    assert_eq!(model.state_dict(), expected);

    let idx = TokenGrid::new(vec![3, 1, 4, 1, 5, 9, 2, 6], 2, 4);
    let (reference, _) = source.forward(&idx, None).unwrap();
    let (logits, _) = model.forward(&idx, None).unwrap();
    assert_eq!(logits, reference);
}

#[test]
fn test_wrong_width_leaves_model_untouched() {
    let source = GPT::new(
        ModelConfig {
            n_embd: 12,
            ..ModelConfig::tiny()
        },
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();
    let sd: StateDict = source.state_dict();

    let mut model = tiny(1);
    let before = model.state_dict();
    assert!(matches!(
        model.import_state_dict(&sd),
        Err(GptError::ShapeMismatch(Mismatch::Shape { .. }))
    ));
    assert_eq!(model.state_dict(), before);
}

#[test]
fn test_from_pretrained_checks_names_before_allocating() {
    let mut sd = StateDict::new();
    sd.insert("transformer.wte.weight".to_string(), Tensor::zeros(vec![2, 2]));
    match GPT::from_pretrained(ModelFamily::Gpt2, &sd) {
        Err(GptError::ShapeMismatch(Mismatch::MissingKeys(keys))) => {
            assert!(keys.contains(&"transformer.wpe.weight".to_string()));
            assert!(!keys.contains(&"transformer.wte.weight".to_string()));
        }
        other => panic!("expected MissingKeys, got {other:?}"),
    }
}
