use crate::device::DeviceSpec;
use std::path::PathBuf;
use thiserror::Error;

/// The embedding model could not be made available. Fatal for a run.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("unknown model `{name}`, expected one of: {choices}")]
    UnknownModel { name: String, choices: String },

    #[error("failed to fetch `{file}` from {repo}: {source}")]
    Download {
        repo: String,
        file: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },

    #[error("model file not found: {0}")]
    MissingFile(PathBuf),

    #[error("failed to read {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model config {path}: {source}")]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported model configuration: {0}")]
    Unsupported(String),

    #[error("device {device} is unavailable: {source}")]
    Device {
        device: DeviceSpec,
        #[source]
        source: candle_core::Error,
    },

    #[error("failed to load weights for {model}: {source}")]
    Weights {
        model: String,
        #[source]
        source: candle_core::Error,
    },

    #[error("failed to build the tokenizer: {0}")]
    Tokenizer(String),

    #[error("{0}")]
    Other(String),
}

/// A forward pass failed.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("device ran out of memory on a batch of {batch_len} sequences: {message}")]
    OutOfMemory { batch_len: usize, message: String },

    #[error("forward pass failed on a batch of {batch_len} sequences: {source}")]
    Compute {
        batch_len: usize,
        #[source]
        source: candle_core::Error,
    },

    #[error("model returned {got} embeddings for a batch of {expected} sequences")]
    CountMismatch { expected: usize, got: usize },
}

impl EmbeddingError {
    pub fn from_candle(batch_len: usize, err: candle_core::Error) -> Self {
        let message = err.to_string();
        if is_out_of_memory(&message) {
            Self::OutOfMemory { batch_len, message }
        } else {
            Self::Compute {
                batch_len,
                source: err,
            }
        }
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

// CUDA reports CUDA_ERROR_OUT_OF_MEMORY, metal and the cpu allocator report failed allocations.
fn is_out_of_memory(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["out of memory", "out_of_memory", "failed to allocate", "memory allocation"]
        .iter()
        .any(|needle| message.contains(needle))
}
