//! adhesion-predict
//!
//! Classifies proteins as adhesins from ESM-2 embeddings. Files are parsed,
//! batched, embedded and scored on a pool of workers that share one model
//! cache.
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod evaluate;
pub mod export;
pub mod pipeline;
pub mod report;

pub use classifier::{ClassifierError, LogisticRegression};
pub use config::PredictConfig;
pub use dispatcher::{process_files, process_files_with, resolve_worker_count, DispatchReport, FileOutcome};
pub use error::{ConfigurationError, FileProcessingError};
pub use evaluate::Evaluation;
pub use pipeline::Predictor;
pub use report::PredictionResult;
