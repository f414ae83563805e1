//! Batcher, embedding generator and classifier run for one file.
use crate::classifier::LogisticRegression;
use crate::error::FileProcessingError;
use crate::report::PredictionResult;
use adhesion_io::{read_fasta_file, SequenceRecord};
use adhesion_plms::{
    embed_all, BatchBudget, DeviceInfo, DeviceSpec, Embedding, ModelCache, ModelHandle,
    ModelLoadError,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Shared, read-only state for classifying sequences. The model cache is the
/// only mutable part and handles its own locking.
#[derive(Debug, Clone)]
pub struct Predictor {
    cache: Arc<ModelCache>,
    classifier: Arc<LogisticRegression>,
    model_name: String,
    device: DeviceInfo,
    batch_size: Option<usize>,
}

impl Predictor {
    pub fn new(
        cache: Arc<ModelCache>,
        classifier: LogisticRegression,
        model_name: impl Into<String>,
        device: DeviceSpec,
    ) -> Self {
        Self {
            cache,
            classifier: Arc::new(classifier),
            model_name: model_name.into(),
            device: DeviceInfo::unknown(device),
            batch_size: None,
        }
    }

    /// Memory information used to size batches.
    pub fn with_device_info(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    /// Fix the batch size instead of estimating it from device memory.
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn classifier(&self) -> &LogisticRegression {
        &self.classifier
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model(&self) -> Result<ModelHandle, ModelLoadError> {
        self.cache.get_model(&self.model_name, self.device.device)
    }

    pub fn embed_records(&self, records: &[SequenceRecord]) -> Result<Vec<Embedding>, FileProcessingError> {
        let model = self.model()?;
        let budget = BatchBudget::from_device(&self.device, model.info(), self.batch_size);
        Ok(embed_all(records, model.as_ref(), &budget)?)
    }

    /// One result per record, in record order.
    pub fn predict_records(&self, records: &[SequenceRecord]) -> Result<Vec<PredictionResult>, FileProcessingError> {
        self.embed_records(records)?
            .into_iter()
            .map(|embedding| -> Result<PredictionResult, FileProcessingError> {
                let (score, label) = self.classifier.classify(&embedding.vector)?;
                Ok(PredictionResult {
                    id: embedding.id,
                    score,
                    label,
                })
            })
            .collect()
    }

    pub fn predict_file(&self, path: &Path) -> Result<Vec<PredictionResult>, FileProcessingError> {
        let start = Instant::now();
        let records = read_fasta_file(path)?;
        debug!(path = %path.display(), records = records.len(), "parsed FASTA");
        let results = self.predict_records(&records)?;
        info!(
            path = %path.display(),
            sequences = results.len(),
            adhesins = results.iter().filter(|r| r.label).count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "classified file"
        );
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use adhesion_plms::{EmbeddingError, EmbeddingModel, ModelInfo};

    /// Embeds a sequence as `[fraction of K residues, fraction of other residues]`.
    pub struct CompositionModel;

    impl EmbeddingModel for CompositionModel {
        fn name(&self) -> &str {
            "composition"
        }
        fn info(&self) -> ModelInfo {
            ModelInfo {
                parameters: 10,
                num_layers: 1,
                hidden_size: 2,
                num_attention_heads: 1,
            }
        }
        fn embedding_dim(&self) -> usize {
            2
        }
        fn embed_batch(&self, records: &[SequenceRecord]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(records
                .iter()
                .map(|r| {
                    let len = r.len().max(1) as f32;
                    let lysines = r.residues().chars().filter(|&c| c == 'K').count() as f32;
                    vec![lysines / len, (r.len() as f32 - lysines) / len]
                })
                .collect())
        }
    }

    pub fn composition_cache() -> Arc<ModelCache> {
        Arc::new(ModelCache::new(
            |_: &str, _: DeviceSpec| -> Result<ModelHandle, ModelLoadError> { Ok(Arc::new(CompositionModel)) },
        ))
    }

    /// Positive when more than half of the residues are lysine.
    pub fn lysine_predictor() -> Predictor {
        let classifier = LogisticRegression::new(vec![10.0, -10.0], 0.0).unwrap();
        Predictor::new(composition_cache(), classifier, "composition", DeviceSpec::Cpu)
            .with_batch_size(Some(2))
    }
}
