//! Validated options of a prediction run.
use crate::error::ConfigurationError;
use crate::report::default_output_path;
use adhesion_plms::{DeviceInfo, DeviceSpec, ESM2Models, Pooling, WeightSource, DEFAULT_MODEL};
use std::path::{Path, PathBuf};
use validator::Validate;

pub const MODELS_DIR: &str = "models";

/// `models/adhesion_model_<model_name>.json`
pub fn default_classifier_path(model_name: &str) -> PathBuf {
    Path::new(MODELS_DIR).join(format!("adhesion_model_{model_name}.json"))
}

#[derive(Debug, Clone, Validate)]
pub struct PredictConfig {
    pub input: PathBuf,
    pub classifier: PathBuf,
    pub output: PathBuf,
    pub model_name: String,
    pub device: DeviceSpec,
    #[validate(range(min = 1, max = 4096))]
    pub batch_size: Option<usize>,
    /// Overrides the free memory reported by the device.
    #[validate(range(min = 1))]
    pub device_memory_mb: Option<u64>,
    pub weights: WeightSource,
    pub pooling: Pooling,
    /// Overrides the threshold stored with the classifier.
    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold: Option<f32>,
    #[validate(range(min = 1))]
    pub max_workers: Option<usize>,
    pub show_all: bool,
    pub silent: bool,
}

impl PredictConfig {
    /// Defaults for `input`: the default model on the best available device,
    /// with the classifier and output paths derived from the names.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        let input = input.into();
        let model_name = DEFAULT_MODEL.to_string();
        Self {
            classifier: default_classifier_path(&model_name),
            output: default_output_path(&input),
            input,
            model_name,
            device: DeviceSpec::auto(),
            batch_size: None,
            device_memory_mb: None,
            weights: WeightSource::default(),
            pooling: Pooling::default(),
            threshold: None,
            max_workers: None,
            show_all: false,
            silent: false,
        }
    }

    /// Range checks, input existence and model name.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        self.validate()?;
        if !self.input.exists() {
            return Err(ConfigurationError::MissingInput(self.input.clone()));
        }
        // local checkpoints may carry any name
        if matches!(self.weights, WeightSource::Hub { .. }) && self.model_name.parse::<ESM2Models>().is_err() {
            return Err(ConfigurationError::UnknownModel {
                name: self.model_name.clone(),
                choices: ESM2Models::choices(),
            });
        }
        Ok(())
    }

    pub fn device_info(&self) -> DeviceInfo {
        match self.device_memory_mb {
            Some(mb) => DeviceInfo::with_free_memory(self.device, mb.saturating_mul(1024 * 1024)),
            None => DeviceInfo::probe(self.device),
        }
    }
}
