use crate::classifier::ClassifierError;
use adhesion_io::FastaError;
use adhesion_plms::{DeviceParseError, EmbeddingError, ModelLoadError};
use std::path::PathBuf;
use thiserror::Error;

/// Processing one input file failed. Other files are unaffected.
#[derive(Debug, Error)]
pub enum FileProcessingError {
    #[error(transparent)]
    Read(#[from] FastaError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Fatal for the whole run.
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

impl FileProcessingError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FileProcessingError::ModelLoad(_))
    }
}

/// Invalid options, detected before any file is processed.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid options: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("unknown model `{name}`, expected one of: {choices}")]
    UnknownModel { name: String, choices: String },

    #[error(transparent)]
    Device(#[from] DeviceParseError),

    #[error("input not found: {0}")]
    MissingInput(PathBuf),

    #[error("failed to search {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no FASTA files found in {0}")]
    NoInputs(PathBuf),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error("classifier expects {expected}-dimensional embeddings but {model} produces {got}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        got: usize,
    },
}
