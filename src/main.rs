//! Command-line entry point
//!
//! ```bash
//! # train from scratch on a text corpus with the GPT-2 tokenizer
//! nanogpt train --input input.txt --tokenizer-dir gpt2/
//!
//! # a small run on bytes, no tokenizer files needed
//! nanogpt train --input input.txt --batch-size 4 --seq-len 32 --n-layer 2 --n-head 2 --n-embd 64
//!
//! # sample from the published weights at weights/gpt2/model.safetensors
//! nanogpt generate --weights weights/ --tokenizer-dir gpt2/
//! ```
//!
//! Logging goes through `tracing`; set `RUST_LOG=debug` for more detail.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nanogpt::{
    generate, runtime, ByteTokenizer, DataLoaderLite, Gpt2Tokenizer, ModelConfig, ModelFamily,
    RuntimeConfig, SafetensorsDir, SampleConfig, TokenCodec, TrainConfig, Trainer, GPT,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ACTIVATION_WARN_BYTES: usize = 4 << 30;

#[derive(Parser, Debug)]
#[command(name = "nanogpt", about = "Train and sample a GPT-2 style model on the CPU", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a freshly initialized model on a text corpus
    ///
    /// The defaults reproduce the GPT-2 124M run (B=16, T=1024, 12 layers),
    /// which keeps over 12 GB of attention weights and logits alive per step.
    /// For CPU runs pass a smaller shape, e.g.
    /// `--batch-size 4 --seq-len 64 --n-layer 4 --n-head 4 --n-embd 128`.
    Train(TrainArgs),
    /// Sample continuations from published GPT-2 weights
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Plain-text training corpus
    #[arg(long, default_value = "input.txt")]
    input: PathBuf,

    /// Directory with vocab.json and merges.txt; bytes are used when omitted
    #[arg(long)]
    tokenizer_dir: Option<PathBuf>,

    /// JSON file with training hyperparameters; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    seq_len: Option<usize>,

    #[arg(long)]
    max_steps: Option<usize>,

    #[arg(long)]
    warmup_steps: Option<usize>,

    #[arg(long)]
    max_lr: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,

    /// Model vocabulary size (default 50304)
    #[arg(long)]
    vocab_size: Option<usize>,

    /// Context length of the model (default 1024)
    #[arg(long)]
    block_size: Option<usize>,

    #[arg(long)]
    n_layer: Option<usize>,

    #[arg(long)]
    n_head: Option<usize>,

    #[arg(long)]
    n_embd: Option<usize>,

    /// Worker threads, 0 for one per core
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Directory holding <model>/model.safetensors
    #[arg(long)]
    weights: PathBuf,

    /// gpt2, gpt2-medium, gpt2-large or gpt2-xl
    #[arg(long, default_value = "gpt2")]
    model: ModelFamily,

    /// Directory with vocab.json and merges.txt
    #[arg(long)]
    tokenizer_dir: PathBuf,

    #[arg(long, default_value = "Hello, I'm a language model,")]
    prompt: String,

    #[arg(long, default_value_t = 5)]
    num_return_sequences: usize,

    #[arg(long, default_value_t = 30)]
    max_length: usize,

    #[arg(long, default_value_t = 50)]
    top_k: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Worker threads, 0 for one per core
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match Cli::parse().command {
        Command::Train(args) => train(args),
        Command::Generate(args) => sample(args),
    }
}

fn load_codec(dir: Option<&PathBuf>) -> Result<Box<dyn TokenCodec>> {
    Ok(match dir {
        Some(dir) => Box::new(
            Gpt2Tokenizer::from_dir(dir)
                .with_context(|| format!("loading tokenizer from {}", dir.display()))?,
        ),
        None => {
            info!("no tokenizer directory given, training on raw bytes");
            Box::new(ByteTokenizer)
        }
    })
}

fn train(args: TrainArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => TrainConfig::load_json(path)
            .with_context(|| format!("reading training config {}", path.display()))?,
        None => TrainConfig::default(),
    };
    config.batch_size = args.batch_size.unwrap_or(config.batch_size);
    config.seq_len = args.seq_len.unwrap_or(config.seq_len);
    config.max_steps = args.max_steps.unwrap_or(config.max_steps);
    config.warmup_steps = args.warmup_steps.unwrap_or(config.warmup_steps);
    config.max_lr = args.max_lr.unwrap_or(config.max_lr);
    config.seed = args.seed.unwrap_or(config.seed);
    config.vocab_size = args.vocab_size.unwrap_or(config.vocab_size);
    config.validate()?;

    let base = ModelConfig::default();
    let model_config = ModelConfig {
        vocab_size: config.vocab_size,
        block_size: args.block_size.unwrap_or(base.block_size),
        n_layer: args.n_layer.unwrap_or(base.n_layer),
        n_head: args.n_head.unwrap_or(base.n_head),
        n_embd: args.n_embd.unwrap_or(base.n_embd),
    };

    let activations = model_config.activation_bytes(config.batch_size, config.seq_len);
    if activations > ACTIVATION_WARN_BYTES {
        warn!(
            "a step keeps at least {:.1} GiB of activations; consider a smaller --batch-size or --seq-len",
            activations as f64 / (1u64 << 30) as f64
        );
    }

    let mut rng = runtime::init(&RuntimeConfig {
        seed: config.seed,
        num_threads: args.threads,
    });

    let codec = load_codec(args.tokenizer_dir.as_ref())?;
    if codec.vocab_size() > model_config.vocab_size {
        bail!(
            "tokenizer has {} tokens but the model vocabulary is {}",
            codec.vocab_size(),
            model_config.vocab_size
        );
    }
    let loader =
        DataLoaderLite::from_file(&args.input, codec.as_ref(), config.batch_size, config.seq_len)
            .with_context(|| format!("loading corpus {}", args.input.display()))?;

    let model = GPT::new(model_config, &mut rng)?;
    let mut trainer = Trainer::new(model, loader, config)?;
    trainer.run()?;
    Ok(())
}

fn sample(args: GenerateArgs) -> Result<()> {
    let mut rng = runtime::init(&RuntimeConfig {
        seed: args.seed,
        num_threads: args.threads,
    });

    let tokenizer = Gpt2Tokenizer::from_dir(&args.tokenizer_dir)
        .with_context(|| format!("loading tokenizer from {}", args.tokenizer_dir.display()))?;
    let source = SafetensorsDir::new(&args.weights);
    let weights_path = source.path_for(args.model);
    let model = GPT::from_pretrained(args.model, &source)
        .with_context(|| format!("loading {} from {}", args.model, weights_path.display()))?;

    let prompt = tokenizer.encode(&args.prompt);
    let config = SampleConfig {
        num_return_sequences: args.num_return_sequences,
        max_length: args.max_length,
        top_k: args.top_k,
    };
    for row in generate(&model, &prompt, &config, &mut rng)? {
        println!("> {}", tokenizer.decode(&row));
    }
    Ok(())
}
