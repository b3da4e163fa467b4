//! Training runs on tiny models, start to finish

use nanogpt::{
    ByteTokenizer, DataLoaderLite, ModelConfig, Parameters, StepStats, TokenCodec, TrainConfig,
    Trainer, GPT,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;

fn train_config(max_steps: usize) -> TrainConfig {
    TrainConfig {
        batch_size: 2,
        seq_len: 8,
        max_lr: 1e-2,
        warmup_steps: 2,
        max_steps,
        vocab_size: 16,
        ..TrainConfig::default()
    }
}

fn trainer(tokens: Vec<usize>, config: TrainConfig) -> Trainer {
    let model = GPT::new(ModelConfig::tiny(), &mut StdRng::seed_from_u64(config.seed)).unwrap();
    let loader = DataLoaderLite::new(tokens, config.batch_size, config.seq_len).unwrap();
    Trainer::new(model, loader, config).unwrap()
}

fn corpus(len: usize) -> Vec<usize> {
    (0..len).map(|i| (3 * i + i / 5) % 16).collect()
}

#[test]
fn test_first_steps_are_finite_and_move_the_loss() {
    let mut trainer = trainer(corpus(200), train_config(10));
    let first = trainer.step().unwrap();
    let second = trainer.step().unwrap();

    for stats in [first, second] {
        assert!(stats.loss.is_finite() && stats.loss > 0.0, "{stats:?}");
        assert!(stats.norm.is_finite() && stats.norm > 0.0, "{stats:?}");
    }
    // an untrained model is close to uniform over the vocabulary
    assert!((first.loss - 16f32.ln()).abs() < 0.5, "loss {}", first.loss);
    assert_ne!(first.loss, second.loss);
    assert_eq!(trainer.current_step(), 2);
}

#[test]
fn test_seeded_runs_are_identical() {
    let run = || {
        let mut t = trainer(corpus(200), train_config(5));
        let history: Vec<f32> = t.run().unwrap().iter().map(|s| s.loss).collect();
        (history, t.into_model().state_dict())
    };
    let (loss_a, sd_a) = run();
    let (loss_b, sd_b) = run();
    assert_eq!(loss_a, loss_b);
    assert_eq!(sd_a, sd_b);
}

#[test]
fn test_overfits_a_single_batch() {
    let config = train_config(60);
    // exactly one B*T+1 window: every step sees the same batch
    let tokens = corpus(config.tokens_per_step() + 1);
    let mut trainer = trainer(tokens, config);
    let history = trainer.run().unwrap();
    assert_eq!(history.len(), 60);

    let initial = history[0].loss;
    let final_loss = trainer.last_batch_loss().unwrap().unwrap();
    assert!(final_loss < 0.8 * initial, "loss went from {initial} to {final_loss}");
}

#[test]
fn test_schedule_drives_the_step_lr() {
    let config = train_config(8);
    let schedule = config.schedule();
    let mut trainer = trainer(corpus(100), config);
    let history: Vec<StepStats> = trainer.run().unwrap();

    assert_eq!(history.len(), 8);
    for (i, stats) in history.iter().enumerate() {
        assert_eq!(stats.step, i);
        assert_eq!(stats.lr, schedule.get_lr(i));
    }
    assert_eq!(trainer.optimizer().lr, schedule.get_lr(7));
    // a finished run does nothing more
    assert!(trainer.run().unwrap().is_empty());
}

#[test]
fn test_trains_on_a_byte_corpus_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", "the quick brown fox jumps over the lazy dog. ".repeat(8)).unwrap();

    let codec = ByteTokenizer;
    let config = TrainConfig {
        vocab_size: codec.vocab_size(),
        ..train_config(3)
    };
    let model_config = ModelConfig {
        vocab_size: codec.vocab_size(),
        ..ModelConfig::tiny()
    };
    let loader =
        DataLoaderLite::from_file(file.path(), &codec, config.batch_size, config.seq_len).unwrap();
    assert_eq!(loader.num_tokens(), 45 * 8);

    let model = GPT::new(model_config, &mut StdRng::seed_from_u64(0)).unwrap();
    let params = model.num_parameters();
    let mut trainer = Trainer::new(model, loader, config).unwrap();
    let history = trainer.run().unwrap();

    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|s| s.loss.is_finite()));
    assert_eq!(trainer.model().num_parameters(), params);
}
