//! Loads ESM-2 checkpoints into [`EmbeddingModel`]s.
//!
//! Weights come from the Hugging Face hub (`facebook/esm2_*`, cached by
//! `hf-hub`) or from a local directory holding `config.json` and
//! `model.safetensors`.
use crate::cache::{ModelHandle, ModelLoader};
use crate::device::DeviceSpec;
use crate::embedder::{EmbeddingModel, Pooling};
use crate::error::{EmbeddingError, ModelLoadError};
use crate::esm2::config::ESM2Config;
use crate::esm2::model::ESM2;
use crate::esm2::models::{ESM2Models, ModelInfo};
use crate::esm2::tokenizer::ESMTokenizer;
use adhesion_io::SequenceRecord;
use candle_core::DType;
use candle_nn::VarBuilder;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// Where checkpoint files are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    Hub {
        /// Overrides the `hf-hub` cache location.
        cache_dir: Option<PathBuf>,
        revision: String,
    },
    /// A directory with `config.json` and `model.safetensors`.
    Local(PathBuf),
}

impl Default for WeightSource {
    fn default() -> Self {
        WeightSource::Hub {
            cache_dir: None,
            revision: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ESM2Loader {
    source: WeightSource,
    pooling: Pooling,
}

impl ESM2Loader {
    pub fn new(source: WeightSource, pooling: Pooling) -> Self {
        Self { source, pooling }
    }

    /// Paths of the config and weights for a model, downloading if needed.
    pub fn model_files(&self, model_name: &str) -> Result<(PathBuf, PathBuf), ModelLoadError> {
        match &self.source {
            WeightSource::Local(dir) => {
                let config = dir.join(CONFIG_FILE);
                let weights = dir.join(WEIGHTS_FILE);
                for path in [&config, &weights] {
                    if !path.is_file() {
                        return Err(ModelLoadError::MissingFile(path.clone()));
                    }
                }
                Ok((config, weights))
            }
            WeightSource::Hub {
                cache_dir,
                revision,
            } => {
                let model = ESM2Models::from_name(model_name)?;
                let repo_id = model.repo_id();
                let download_err = |file: &str| {
                    let file = file.to_string();
                    move |source| ModelLoadError::Download {
                        repo: repo_id.to_string(),
                        file,
                        source,
                    }
                };
                let mut builder = ApiBuilder::new().with_progress(false);
                if let Some(dir) = cache_dir {
                    builder = builder.with_cache_dir(dir.clone());
                }
                let api = builder.build().map_err(download_err(""))?;
                let repo = api.repo(Repo::with_revision(
                    repo_id.to_string(),
                    RepoType::Model,
                    revision.clone(),
                ));
                debug!(repo = repo_id, %revision, "fetching model files");
                let config = repo.get(CONFIG_FILE).map_err(download_err(CONFIG_FILE))?;
                let weights = repo.get(WEIGHTS_FILE).map_err(download_err(WEIGHTS_FILE))?;
                Ok((config, weights))
            }
        }
    }

    pub fn load_embedder(&self, model_name: &str, device: DeviceSpec) -> Result<ESM2Embedder, ModelLoadError> {
        let (config_path, weights_path) = self.model_files(model_name)?;
        let config = read_config(&config_path)?;
        let candle_device = device
            .to_device()
            .map_err(|source| ModelLoadError::Device { device, source })?;
        let weights_err = |source| ModelLoadError::Weights {
            model: model_name.to_string(),
            source,
        };

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &candle_device)
                .map_err(weights_err)?
        };
        // EsmForMaskedLM checkpoints nest the encoder under `esm.`
        let vb = if vb.contains_tensor("esm.embeddings.word_embeddings.weight") {
            vb.pp("esm")
        } else {
            vb
        };
        let model = ESM2::load(vb, &config).map_err(weights_err)?;
        let tokenizer =
            ESMTokenizer::new().map_err(|e| ModelLoadError::Tokenizer(e.to_string()))?;
        info!(
            model = model_name,
            %device,
            layers = config.num_hidden_layers,
            hidden = config.hidden_size,
            pooling = %self.pooling,
            "loaded ESM-2 encoder"
        );
        Ok(ESM2Embedder::new(model_name, model, tokenizer, self.pooling))
    }
}

impl ModelLoader for ESM2Loader {
    fn load(&self, model_name: &str, device: DeviceSpec) -> Result<ModelHandle, ModelLoadError> {
        Ok(Arc::new(self.load_embedder(model_name, device)?))
    }
}

fn read_config(path: &Path) -> Result<ESM2Config, ModelLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ModelLoadError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ESM2Config =
        serde_json::from_str(&raw).map_err(|source| ModelLoadError::InvalidConfig {
            path: path.to_path_buf(),
            source,
        })?;
    if config.position_embedding_type != "rotary" {
        return Err(ModelLoadError::Unsupported(format!(
            "position embedding `{}`",
            config.position_embedding_type
        )));
    }
    if config.num_attention_heads == 0 || config.hidden_size % config.num_attention_heads != 0 {
        return Err(ModelLoadError::Unsupported(format!(
            "hidden size {} with {} attention heads",
            config.hidden_size, config.num_attention_heads
        )));
    }
    Ok(config)
}

/// An ESM-2 encoder with its tokenizer and pooling.
#[derive(Debug)]
pub struct ESM2Embedder {
    name: String,
    model: ESM2,
    tokenizer: ESMTokenizer,
    pooling: Pooling,
    info: ModelInfo,
}

impl ESM2Embedder {
    pub fn new(name: &str, model: ESM2, tokenizer: ESMTokenizer, pooling: Pooling) -> Self {
        let info = model.config().model_info();
        Self {
            name: name.to_string(),
            model,
            tokenizer,
            pooling,
            info,
        }
    }

    pub fn pooling(&self) -> Pooling {
        self.pooling
    }

    fn forward_pooled(&self, records: &[SequenceRecord]) -> candle_core::Result<Vec<Vec<f32>>> {
        let sequences: Vec<&str> = records.iter().map(SequenceRecord::residues).collect();
        let batch = self.tokenizer.encode_batch(&sequences, self.model.device())?;
        let hidden = self.model.forward(&batch.input_ids, &batch.attention_mask)?;
        let pooled = self.pooling.pool(&hidden, &batch.residue_counts)?;
        pooled.to_dtype(DType::F32)?.to_vec2::<f32>()
    }
}

impl EmbeddingModel for ESM2Embedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> ModelInfo {
        self.info
    }

    fn embedding_dim(&self) -> usize {
        self.model.config().hidden_size
    }

    fn embed_batch(&self, records: &[SequenceRecord]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.forward_pooled(records)
            .map_err(|err| EmbeddingError::from_candle(records.len(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ModelCache;
    use anyhow::Result;
    use candle_core::Device;
    use candle_nn::VarMap;
    use tempfile::tempdir;

    fn tiny_config() -> ESM2Config {
        ESM2Config {
            hidden_size: 16,
            num_hidden_layers: 2,
            num_attention_heads: 4,
            intermediate_size: 32,
            ..ESM2Config::esm2_t6_8m()
        }
    }

    /// Write a randomly initialised checkpoint in the `EsmForMaskedLM` layout.
    fn write_checkpoint(dir: &Path) -> Result<()> {
        let config = tiny_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        ESM2::load(vb.pp("esm"), &config)?;
        varmap.save(dir.join(WEIGHTS_FILE))?;
        std::fs::write(dir.join(CONFIG_FILE), serde_json::to_string(&config)?)?;
        Ok(())
    }

    #[test]
    fn test_load_local_checkpoint() -> Result<()> {
        let dir = tempdir()?;
        write_checkpoint(dir.path())?;
        let loader = ESM2Loader::new(WeightSource::Local(dir.path().to_path_buf()), Pooling::Mean);
        let embedder = loader.load_embedder("tiny", DeviceSpec::Cpu)?;
        assert_eq!(embedder.embedding_dim(), 16);
        assert_eq!(embedder.name(), "tiny");

        let records = vec![
            SequenceRecord::new("a", "MKTAYIAKQR"),
            SequenceRecord::new("b", "MK"),
            SequenceRecord::new("c", ""),
        ];
        let batched = embedder.embed_batch(&records)?;
        assert_eq!(batched.len(), 3);
        assert!(batched.iter().flatten().all(|x| x.is_finite()));

        // pooling over residues only makes a vector independent of batch mates
        let alone = embedder.embed_batch(&records[1..2])?;
        for (x, y) in alone[0].iter().zip(batched[1].iter()) {
            assert!((x - y).abs() < 1e-4, "{x} vs {y}");
        }
        Ok(())
    }

    #[test]
    fn test_missing_local_files() {
        let dir = tempdir().unwrap();
        let loader = ESM2Loader::new(WeightSource::Local(dir.path().to_path_buf()), Pooling::Mean);
        let err = loader.load_embedder("tiny", DeviceSpec::Cpu).unwrap_err();
        assert!(matches!(err, ModelLoadError::MissingFile(path) if path.ends_with(CONFIG_FILE)));
    }

    #[test]
    fn test_unsupported_config() -> Result<()> {
        let dir = tempdir()?;
        write_checkpoint(dir.path())?;
        let mut config = tiny_config();
        config.position_embedding_type = "absolute".to_string();
        std::fs::write(dir.path().join(CONFIG_FILE), serde_json::to_string(&config)?)?;
        let loader = ESM2Loader::new(WeightSource::Local(dir.path().to_path_buf()), Pooling::Mean);
        let err = loader.load_embedder("tiny", DeviceSpec::Cpu).unwrap_err();
        assert!(matches!(err, ModelLoadError::Unsupported(_)));
        Ok(())
    }

    #[test]
    fn test_unknown_hub_model_is_rejected_before_download() {
        let loader = ESM2Loader::default();
        let err = loader.model_files("esm3").unwrap_err();
        assert!(matches!(err, ModelLoadError::UnknownModel { .. }));
    }

    #[test]
    fn test_cache_with_local_loader() -> Result<()> {
        let dir = tempdir()?;
        write_checkpoint(dir.path())?;
        let cache = ModelCache::new(ESM2Loader::new(
            WeightSource::Local(dir.path().to_path_buf()),
            Pooling::Cls,
        ));
        let first = cache.get_model("tiny", DeviceSpec::Cpu)?;
        let second = cache.get_model("tiny", DeviceSpec::Cpu)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.info().hidden_size, 16);
        Ok(())
    }

    #[test]
    #[ignore = "downloads esm2_t6_8M_UR50D from the Hugging Face hub"]
    fn test_hub_esm2_t6() -> Result<()> {
        let loader = ESM2Loader::default();
        let embedder = loader.load_embedder("esm2_t6_8M_UR50D", DeviceSpec::Cpu)?;
        let vectors = embedder.embed_batch(&[SequenceRecord::new("p", "MKTAYIAKQRQISFVKSHFSRQ")])?;
        assert_eq!(vectors[0].len(), 320);
        Ok(())
    }
}
