pub mod embed;
pub mod evaluate;
pub mod predict;

use crate::cli::ModelArgs;
use adhesion_io::collect_inputs;
use adhesion_plms::{ESM2Loader, ModelCache, WeightSource};
use adhesion_predict::{
    ConfigurationError, FileProcessingError, LogisticRegression, PredictConfig, Predictor,
};
use anyhow::{bail, Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Log to stderr, filtered by `RUST_LOG` or by `--silent`.
pub fn init_tracing(silent: bool) {
    let default = if silent { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

impl ModelArgs {
    fn weight_source(&self) -> WeightSource {
        match &self.weights_dir {
            Some(dir) => WeightSource::Local(dir.clone()),
            None => WeightSource::Hub {
                cache_dir: self.hf_cache.clone(),
                revision: "main".to_string(),
            },
        }
    }

    /// Overlay the model options onto a config built for `input`.
    pub fn apply(&self, config: &mut PredictConfig) {
        config.model_name = self.model_name.clone();
        config.device = self.device;
        config.batch_size = self.batch_size;
        config.device_memory_mb = self.device_memory_mb;
        config.weights = self.weight_source();
        config.pooling = self.pooling;
        config.max_workers = self.max_workers;
        config.silent = self.silent;
    }
}

/// Input files for `input`, which must exist and contain at least one FASTA file.
pub fn discover_inputs(input: &Path) -> Result<Vec<PathBuf>, ConfigurationError> {
    let files = collect_inputs(input).map_err(|source| match source.kind() {
        ErrorKind::NotFound => ConfigurationError::MissingInput(input.to_path_buf()),
        _ => ConfigurationError::Discovery {
            path: input.to_path_buf(),
            source,
        },
    })?;
    if files.is_empty() {
        return Err(ConfigurationError::NoInputs(input.to_path_buf()));
    }
    Ok(files)
}

/// Load the classifier, apply the threshold override and load the model once,
/// so classifier and model errors surface before any file is processed.
pub fn build_predictor(config: &PredictConfig) -> Result<Predictor> {
    let mut classifier = LogisticRegression::from_file(&config.classifier)
        .map_err(ConfigurationError::from)
        .context("train a classifier first or pass --model")?;
    if let Some(threshold) = config.threshold {
        classifier = classifier
            .with_threshold(threshold)
            .map_err(ConfigurationError::from)?;
    }
    if let Some(trained) = classifier.embedding_model.as_deref() {
        if trained != config.model_name {
            warn!(
                trained,
                model = %config.model_name,
                "classifier was trained on embeddings from a different model"
            );
        }
    }

    let cache = Arc::new(ModelCache::new(ESM2Loader::new(
        config.weights.clone(),
        config.pooling,
    )));
    let predictor = Predictor::new(cache, classifier, &config.model_name, config.device)
        .with_device_info(config.device_info())
        .with_batch_size(config.batch_size);

    let model = predictor.model()?;
    if model.embedding_dim() != predictor.classifier().dim() {
        return Err(ConfigurationError::DimensionMismatch {
            model: config.model_name.clone(),
            expected: predictor.classifier().dim(),
            got: model.embedding_dim(),
        }
        .into());
    }
    Ok(predictor)
}

/// Print every failed file to stderr; an error when there was any.
pub fn check_failures<'a, I>(failures: I, total: usize) -> Result<()>
where
    I: IntoIterator<Item = (&'a Path, &'a FileProcessingError)>,
{
    let failures: Vec<_> = failures.into_iter().collect();
    if failures.is_empty() {
        return Ok(());
    }
    for (path, err) in failures.iter() {
        eprintln!("failed: {}: {err}", path.display());
    }
    bail!("{} of {} files failed", failures.len(), total)
}
