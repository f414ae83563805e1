//! Pooled embeddings as safetensors, for training classifiers elsewhere.
//!
//! The file holds one `embeddings` tensor of shape `[n, dim]`. The record
//! identifiers are stored in the metadata under `ids` as a JSON array, in
//! row order, and the model name under `model`.
use adhesion_plms::Embedding;
use candle_core::{Device, Tensor};
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const EMBEDDINGS_TENSOR: &str = "embeddings";
const IDS_KEY: &str = "ids";
const MODEL_KEY: &str = "model";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no embeddings to write")]
    Empty,
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
    #[error(transparent)]
    SafeTensors(#[from] safetensors::SafeTensorError),
    #[error(transparent)]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("file has no `{0}` entry")]
    Missing(&'static str),
}

pub fn write_embeddings(embeddings: &[Embedding], model_name: &str, path: &Path) -> Result<(), ExportError> {
    let dim = embeddings.first().ok_or(ExportError::Empty)?.vector.len();
    let flat: Vec<f32> = embeddings
        .iter()
        .flat_map(|e| e.vector.iter().copied())
        .collect();
    let tensor = Tensor::from_vec(flat, (embeddings.len(), dim), &Device::Cpu)?;
    let ids: Vec<&str> = embeddings.iter().map(|e| e.id.as_str()).collect();
    let metadata = HashMap::from([
        (IDS_KEY.to_string(), serde_json::to_string(&ids)?),
        (MODEL_KEY.to_string(), model_name.to_string()),
    ]);
    safetensors::serialize_to_file([(EMBEDDINGS_TENSOR, &tensor)], &Some(metadata), path)?;
    Ok(())
}

/// Read back a file written by [`write_embeddings`].
pub fn read_embeddings(path: &Path) -> Result<Vec<Embedding>, ExportError> {
    let buffer = std::fs::read(path)?;
    let (_, metadata) = SafeTensors::read_metadata(&buffer)?;
    let raw_ids = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(IDS_KEY))
        .ok_or(ExportError::Missing(IDS_KEY))?;
    let ids: Vec<String> = serde_json::from_str(raw_ids)?;

    let tensors = candle_core::safetensors::load_buffer(&buffer, &Device::Cpu)?;
    let vectors = tensors
        .get(EMBEDDINGS_TENSOR)
        .ok_or(ExportError::Missing(EMBEDDINGS_TENSOR))?
        .to_vec2::<f32>()?;
    Ok(ids
        .into_iter()
        .zip(vectors)
        .map(|(id, vector)| Embedding { id, vector })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("embeddings.safetensors");
        let embeddings = vec![
            Embedding { id: "fimH".into(), vector: vec![0.5, -1.0, 2.0] },
            Embedding { id: "papG".into(), vector: vec![1.5, 0.0, -0.25] },
            Embedding { id: "fimH".into(), vector: vec![0.0, 0.0, 1.0] },
        ];
        write_embeddings(&embeddings, "esm2_t6_8M_UR50D", &path).unwrap();
        assert_eq!(read_embeddings(&path).unwrap(), embeddings);

        let buffer = std::fs::read(&path).unwrap();
        let (_, metadata) = SafeTensors::read_metadata(&buffer).unwrap();
        let metadata = metadata.metadata().as_ref().unwrap();
        assert_eq!(metadata[MODEL_KEY], "esm2_t6_8M_UR50D");
    }

    #[test]
    fn test_empty_is_rejected() {
        let dir = tempdir().unwrap();
        let err = write_embeddings(&[], "m", &dir.path().join("e.safetensors")).unwrap_err();
        assert!(matches!(err, ExportError::Empty));
    }
}
