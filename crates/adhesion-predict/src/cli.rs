use super::commands;
use adhesion_plms::{DeviceSpec, Pooling, DEFAULT_MODEL};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict adhesion proteins in FASTA files
    Predict(PredictArgs),
    /// Write pooled ESM-2 embeddings to a safetensors file
    Embed(EmbedArgs),
    /// Score a classifier on labelled adhesin and non-adhesin FASTA sets
    Evaluate(EvaluateArgs),
}

/// Options shared by every command that runs the embedding model.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// ESM-2 model variant (must match the classifier's training)
    #[arg(long, default_value_t = DEFAULT_MODEL.to_string())]
    pub model_name: String,

    /// auto, cpu, cuda[:N] or metal[:N]
    #[arg(long, default_value = "auto")]
    pub device: DeviceSpec,

    /// Sequences per batch, estimated from device memory when omitted
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Free device memory to plan batches for, in MiB
    #[arg(long)]
    pub device_memory_mb: Option<u64>,

    /// Directory with config.json and model.safetensors instead of the hub
    #[arg(long)]
    pub weights_dir: Option<PathBuf>,

    /// Hugging Face cache directory
    #[arg(long)]
    pub hf_cache: Option<PathBuf>,

    /// mean, mean-all or cls
    #[arg(long, default_value_t = Pooling::Mean)]
    pub pooling: Pooling,

    /// Number of files processed in parallel (default: available cores)
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Only log warnings and errors, and do not print per-sequence results
    #[arg(long)]
    pub silent: bool,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Input FASTA file or directory with FASTA files
    #[arg(short, long)]
    pub input: PathBuf,

    /// Trained classifier (default: models/adhesion_model_<model-name>.json)
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Output CSV (default: <input name>.adhesion_predict.csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Override the classifier's decision threshold
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Report all predictions, not only adhesion proteins
    #[arg(long)]
    pub show_all: bool,

    #[command(flatten)]
    pub model_args: ModelArgs,
}

#[derive(Args, Debug)]
pub struct EmbedArgs {
    /// Input FASTA file or directory with FASTA files
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output safetensors file
    #[arg(short, long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub model_args: ModelArgs,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// FASTA file or directory of known adhesion proteins
    #[arg(long, default_value = "data/positive")]
    pub positive: PathBuf,

    /// FASTA file or directory of known non-adhesion proteins
    #[arg(long, default_value = "data/negative")]
    pub negative: PathBuf,

    /// Trained classifier (default: models/adhesion_model_<model-name>.json)
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Override the classifier's decision threshold
    #[arg(long)]
    pub threshold: Option<f32>,

    #[command(flatten)]
    pub model_args: ModelArgs,
}

impl Cli {
    pub fn silent(&self) -> bool {
        match &self.command {
            Commands::Predict(args) => args.model_args.silent,
            Commands::Embed(args) => args.model_args.silent,
            Commands::Evaluate(args) => args.model_args.silent,
        }
    }

    pub fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Predict(args) => commands::predict::execute(args),
            Commands::Embed(args) => commands::embed::execute(args),
            Commands::Evaluate(args) => commands::evaluate::execute(args),
        }
    }
}
