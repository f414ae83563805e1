//! Turns batches of sequence records into pooled embedding vectors.
use crate::batcher::{make_batches, Batch, BatchBudget};
use crate::error::EmbeddingError;
use crate::esm2::models::ModelInfo;
use adhesion_io::SequenceRecord;
use candle_core::Tensor;
use strum::{Display, EnumIter, EnumString};
use tracing::{debug, warn};

/// A loaded model that maps sequences to fixed length vectors.
///
/// Implementations must release all device memory they allocate for a batch
/// before `embed_batch` returns.
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;
    fn info(&self) -> ModelInfo;
    fn embedding_dim(&self) -> usize;
    /// One vector per record, in record order.
    fn embed_batch(&self, records: &[SequenceRecord]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// How per-token hidden states are reduced to one vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Pooling {
    /// Mean over residue tokens only.
    #[default]
    Mean,
    /// Mean over residues plus `<cls>` and `<eos>`.
    #[strum(to_string = "mean-all")]
    MeanAllTokens,
    /// The `<cls>` token.
    Cls,
}

impl Pooling {
    /// Reduce `hidden` (`[batch, seq_len, dim]`) to `[batch, dim]`.
    ///
    /// `residue_counts[i]` is the number of residues of sequence `i`, which
    /// occupy positions `1..=n` between `<cls>` and `<eos>`. A sequence with no
    /// residues is averaged over its special tokens.
    pub fn pool(&self, hidden: &Tensor, residue_counts: &[usize]) -> candle_core::Result<Tensor> {
        let (batch, seq_len, _) = hidden.dims3()?;
        let mut weights = vec![0f32; batch * seq_len];
        for (i, &n) in residue_counts.iter().enumerate() {
            let row = &mut weights[i * seq_len..(i + 1) * seq_len];
            match self {
                Pooling::Mean if n > 0 => row[1..=n].fill(1.0),
                Pooling::Mean | Pooling::MeanAllTokens => row[..n + 2].fill(1.0),
                Pooling::Cls => row[0] = 1.0,
            }
        }
        let weights = Tensor::from_vec(weights, (batch, seq_len, 1), hidden.device())?
            .to_dtype(hidden.dtype())?;
        let summed = hidden.broadcast_mul(&weights)?.sum(1)?;
        let counts = weights.sum(1)?;
        summed.broadcast_div(&counts)
    }
}

/// A pooled vector for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub id: String,
    pub vector: Vec<f32>,
}

/// Embed one batch, splitting it in halves once if the device runs out of memory.
///
/// The result is in batch order, so duplicated identifiers are kept.
pub fn embed(batch: &Batch, model: &dyn EmbeddingModel) -> Result<Vec<Embedding>, EmbeddingError> {
    match run_batch(batch, model) {
        Err(err) if err.is_out_of_memory() => {
            let Some((left, right)) = batch.split(&model.info()) else {
                return Err(err);
            };
            warn!(
                batch_len = batch.len(),
                offset = batch.offset(),
                "out of memory, retrying as two halves"
            );
            let mut embeddings = run_batch(&left, model)?;
            embeddings.extend(run_batch(&right, model)?);
            Ok(embeddings)
        }
        other => other,
    }
}

fn run_batch(batch: &Batch, model: &dyn EmbeddingModel) -> Result<Vec<Embedding>, EmbeddingError> {
    let vectors = model.embed_batch(batch.records())?;
    if vectors.len() != batch.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: batch.len(),
            got: vectors.len(),
        });
    }
    Ok(batch
        .records()
        .iter()
        .zip(vectors)
        .map(|(record, vector)| Embedding {
            id: record.id().to_string(),
            vector,
        })
        .collect())
}

/// Batch `records` under `budget` and embed every batch in order.
pub fn embed_all(
    records: &[SequenceRecord],
    model: &dyn EmbeddingModel,
    budget: &BatchBudget,
) -> Result<Vec<Embedding>, EmbeddingError> {
    let batches = make_batches(records, budget);
    debug!(
        model = model.name(),
        records = records.len(),
        batches = batches.len(),
        "embedding records"
    );
    let mut embeddings = Vec::with_capacity(records.len());
    for batch in batches.iter() {
        embeddings.extend(embed(batch, model)?);
    }
    Ok(embeddings)
}


#[cfg(test)]
mod tests {
    use super::testing::FakeModel;
    use super::*;
    use candle_core::{Device, Result};
    use std::sync::atomic::Ordering;

    fn records(lengths: &[usize]) -> Vec<SequenceRecord> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| SequenceRecord::new(format!("seq{i}"), "M".repeat(len)))
            .collect()
    }

    #[test]
    fn test_pooling_names() {
        assert_eq!("mean".parse::<Pooling>().unwrap(), Pooling::Mean);
        assert_eq!("mean-all".parse::<Pooling>().unwrap(), Pooling::MeanAllTokens);
        assert_eq!(Pooling::Cls.to_string(), "cls");
        assert_eq!(Pooling::MeanAllTokens.to_string(), "mean-all");
    }

    #[test]
    fn test_pooling_ignores_padding() -> Result<()> {
        // two sequences: 2 residues (padded to 5 tokens) and 3 residues
        let hidden = Tensor::new(
            &[
                [[1f32], [2.], [4.], [8.], [100.]],
                [[1f32], [3.], [3.], [6.], [9.]],
            ],
            &Device::Cpu,
        )?;
        let mean = Pooling::Mean.pool(&hidden, &[2, 3])?.to_vec2::<f32>()?;
        assert_eq!(mean, vec![vec![3.], vec![4.]]);
        let all = Pooling::MeanAllTokens.pool(&hidden, &[2, 3])?.to_vec2::<f32>()?;
        assert_eq!(all, vec![vec![15. / 4.], vec![22. / 5.]]);
        let cls = Pooling::Cls.pool(&hidden, &[2, 3])?.to_vec2::<f32>()?;
        assert_eq!(cls, vec![vec![1.], vec![1.]]);
        let empty = Pooling::Mean.pool(&hidden, &[0, 3])?.to_vec2::<f32>()?;
        assert_eq!(empty[0], vec![1.5]);
        Ok(())
    }

    #[test]
    fn test_embed_all_preserves_order_and_duplicates() {
        let model = FakeModel::new(4);
        let mut input = records(&[3, 9, 1, 4, 7]);
        input.push(SequenceRecord::new("seq0", "MM"));
        let budget = BatchBudget::for_batch_size(model.info(), 2);
        let embeddings = embed_all(&input, &model, &budget).unwrap();

        let ids: Vec<_> = embeddings.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["seq0", "seq1", "seq2", "seq3", "seq4", "seq0"]);
        let lens: Vec<_> = embeddings.iter().map(|e| e.vector[0]).collect();
        assert_eq!(lens, vec![3., 9., 1., 4., 7., 2.]);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_out_of_memory_split_retry() {
        let mut model = FakeModel::new(4);
        model.oom_above = 2;
        let input = records(&[1, 2, 3, 4]);
        let batch = Batch::new(&input, 0, &model.info());
        let embeddings = embed(&batch, &model).unwrap();
        assert_eq!(embeddings.len(), 4);
        assert_eq!(embeddings[3].vector[0], 4.);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);

        // only one retry: halves that still fail propagate the error
        model.oom_above = 1;
        let err = embed(&batch, &model).unwrap_err();
        assert!(err.is_out_of_memory());
    }
}
