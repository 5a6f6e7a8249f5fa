//! CLI for bitnet-int8: demo, info, generate, export-demo.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use bitnet_int8::{
    create_demo_model_seeded, load_weights, save_weights, InferenceEngine, TextGenerator,
};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "bitnet-int8")]
#[command(about = "Ternary-weight LLM inference with int8 activations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run with a seeded demo model
    Demo {
        #[arg(long, default_value = "42")]
        seed: u64,
        #[arg(long, default_value = "10")]
        max_new_tokens: usize,
    },

    /// Show model information
    Info {
        #[arg(long)]
        model: PathBuf,
    },

    /// Greedy generation from comma-separated token IDs
    Generate {
        #[arg(long)]
        model: PathBuf,
        #[arg(long, value_delimiter = ',', required = true)]
        tokens: Vec<usize>,
        #[arg(long, default_value = "32")]
        max_length: usize,
    },

    /// Write a seeded demo model in the packed weight format
    ExportDemo {
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Demo {
            seed,
            max_new_tokens,
        } => run_demo(seed, max_new_tokens)?,
        Commands::Info { model } => run_info(&model)?,
        Commands::Generate {
            model,
            tokens,
            max_length,
        } => run_generate(&model, &tokens, max_length)?,
        Commands::ExportDemo { output, seed } => run_export(&output, seed)?,
    }
    Ok(())
}

fn run_demo(seed: u64, max_new_tokens: usize) -> Result<()> {
    info!(seed, "Creating demo model...");
    let model = create_demo_model_seeded(seed)?;
    let engine = InferenceEngine::new(model);
    let prompt_ids = vec![0usize, 1, 2];

    info!("Running forward pass on {} tokens...", prompt_ids.len());
    let t0 = Instant::now();
    let logits = engine.forward(&prompt_ids)?;
    info!(
        "Forward pass: {:?}, logits len = {}",
        t0.elapsed(),
        logits.len()
    );

    info!("Generating {} tokens (greedy)...", max_new_tokens);
    let gen = TextGenerator::from_engine(engine);
    let ids = gen.generate(&prompt_ids, prompt_ids.len() + max_new_tokens)?;
    println!("Generated: {:?}", ids);
    Ok(())
}

fn run_info(model_path: &Path) -> Result<()> {
    let model = load_weights(model_path)
        .with_context(|| format!("loading {}", model_path.display()))?;
    let c = &model.config;
    println!("vocab_size: {}", c.vocab_size);
    println!("hidden_size: {}", c.hidden_size);
    println!("num_layers: {}", model.num_layers());
    println!(
        "heads: {} (kv heads: {}, head dim: {})",
        c.num_attention_heads,
        c.num_key_value_heads,
        c.head_dim()
    );
    println!("intermediate_size: {}", c.intermediate_size);
    println!("max_position_embeddings: {}", c.max_position_embeddings);
    println!("eos_token_id: {}", c.eos_token_id);
    println!("rope: {}", c.use_rope);
    Ok(())
}

fn run_generate(model_path: &Path, tokens: &[usize], max_length: usize) -> Result<()> {
    info!("Loading model from {:?}...", model_path);
    let model = load_weights(model_path)
        .with_context(|| format!("loading {}", model_path.display()))?;
    let gen = TextGenerator::new(model);
    let t0 = Instant::now();
    let ids = gen.generate(tokens, max_length)?;
    let new_tokens = ids.len() - tokens.len();
    info!(
        "Generated {} tokens in {:?}",
        new_tokens,
        t0.elapsed()
    );
    let text: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
    println!("{}", text.join(","));
    Ok(())
}

fn run_export(output: &Path, seed: u64) -> Result<()> {
    let model = create_demo_model_seeded(seed)?;
    save_weights(&model, output).with_context(|| format!("writing {}", output.display()))?;
    info!("Wrote demo model (seed {}) to {:?}", seed, output);
    Ok(())
}
