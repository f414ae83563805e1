//! Groups sequence records into batches that fit a memory budget.
//!
//! The cost of a batch is an estimate of the activation and attention memory a
//! forward pass needs. Batches are padded to their longest member so a batch of
//! `n` records costs `n × cost(longest)`. Records are never reordered or
//! dropped; a record that alone exceeds the budget forms its own batch.
use crate::device::DeviceInfo;
use crate::esm2::models::ModelInfo;
use crate::esm2::tokenizer::MAX_RESIDUES;
use adhesion_io::SequenceRecord;
use tracing::debug;

/// Batch size used when the device cannot report free memory.
pub const DEFAULT_BATCH_SIZE: usize = 8;
pub const MAX_BATCH_SIZE: usize = 128;
/// Sequence length used to turn free memory into a batch size.
pub const STANDARD_RESIDUES: usize = 400;
/// Fraction of the reported free memory the batcher plans to use.
pub const MEMORY_HEADROOM: f64 = 0.8;
/// Live activation tensors per token relative to the hidden size.
pub const ACTIVATION_FACTOR: u64 = 12;
const BYTES_PER_VALUE: u64 = 4;

/// Estimated bytes a single sequence of `residues` needs in a forward pass.
pub fn sequence_cost(model: &ModelInfo, residues: usize) -> u64 {
    let tokens = residues.min(MAX_RESIDUES) as u64 + 2;
    let activations = tokens * model.hidden_size as u64 * BYTES_PER_VALUE * ACTIVATION_FACTOR;
    let attention = tokens * tokens * model.num_attention_heads as u64 * BYTES_PER_VALUE;
    activations + attention
}

/// Estimated bytes for a padded batch with members of the given lengths.
pub fn batch_cost<I>(model: &ModelInfo, lengths: I) -> u64
where
    I: IntoIterator<Item = usize>,
{
    let (count, longest) = lengths
        .into_iter()
        .fold((0u64, 0usize), |(count, longest), len| {
            (count + 1, longest.max(len))
        });
    if count == 0 {
        return 0;
    }
    count * sequence_cost(model, longest)
}

/// Number of standard length sequences that fit the free device memory.
///
/// Falls back to [`DEFAULT_BATCH_SIZE`] when the device did not report memory.
pub fn estimate_batch_size(device: &DeviceInfo, model: &ModelInfo) -> usize {
    let Some(free) = device.free_memory_bytes else {
        return DEFAULT_BATCH_SIZE;
    };
    let usable = (free as f64 * MEMORY_HEADROOM) as u64;
    let weights = model.parameters * BYTES_PER_VALUE;
    let available = usable.saturating_sub(weights);
    let per_sequence = sequence_cost(model, STANDARD_RESIDUES);
    ((available / per_sequence) as usize).clamp(1, MAX_BATCH_SIZE)
}

/// Limits a batch must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBudget {
    pub model: ModelInfo,
    pub max_cost: u64,
    pub max_sequences: usize,
}

impl BatchBudget {
    /// Room for `batch_size` standard length sequences.
    pub fn for_batch_size(model: ModelInfo, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            model,
            max_cost: batch_size as u64 * sequence_cost(&model, STANDARD_RESIDUES),
            max_sequences: batch_size,
        }
    }

    /// Room for one sequence of `residues`, with no limit on the count of shorter ones
    /// beyond [`MAX_BATCH_SIZE`].
    pub fn for_residues(model: ModelInfo, residues: usize) -> Self {
        Self {
            model,
            max_cost: sequence_cost(&model, residues),
            max_sequences: MAX_BATCH_SIZE,
        }
    }

    /// Budget for a device, unless the caller fixed the batch size.
    pub fn from_device(device: &DeviceInfo, model: ModelInfo, batch_size: Option<usize>) -> Self {
        let batch_size = batch_size.unwrap_or_else(|| estimate_batch_size(device, &model));
        debug!(device = %device.device, batch_size, "batch budget");
        Self::for_batch_size(model, batch_size)
    }

    fn fits(&self, count: usize, longest: usize) -> bool {
        count <= self.max_sequences && count as u64 * sequence_cost(&self.model, longest) <= self.max_cost
    }
}

/// A contiguous run of records and its estimated cost.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    records: &'a [SequenceRecord],
    offset: usize,
    cost: u64,
}

impl<'a> Batch<'a> {
    /// `offset` is the index of the first record in the input.
    pub fn new(records: &'a [SequenceRecord], offset: usize, model: &ModelInfo) -> Self {
        Self {
            records,
            offset,
            cost: batch_cost(model, records.iter().map(SequenceRecord::len)),
        }
    }

    pub fn records(&self) -> &'a [SequenceRecord] {
        self.records
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Split into two halves, `None` for a single record.
    pub fn split(&self, model: &ModelInfo) -> Option<(Batch<'a>, Batch<'a>)> {
        if self.records.len() < 2 {
            return None;
        }
        let mid = self.records.len() / 2;
        let (left, right) = self.records.split_at(mid);
        Some((
            Batch::new(left, self.offset, model),
            Batch::new(right, self.offset + mid, model),
        ))
    }
}

/// Greedily group `records` in order so that every batch fits `budget`.
pub fn make_batches<'a>(records: &'a [SequenceRecord], budget: &BatchBudget) -> Vec<Batch<'a>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut longest = 0;
    for (i, record) in records.iter().enumerate() {
        let len = record.len();
        let count = i - start + 1;
        if count > 1 && !budget.fits(count, longest.max(len)) {
            batches.push(Batch::new(&records[start..i], start, &budget.model));
            start = i;
            longest = len;
        } else {
            longest = longest.max(len);
        }
    }
    if start < records.len() {
        batches.push(Batch::new(&records[start..], start, &budget.model));
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSpec;
    use crate::esm2::models::ESM2Models;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn records(lengths: &[usize]) -> Vec<SequenceRecord> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| SequenceRecord::new(format!("seq{i}"), "A".repeat(len)))
            .collect()
    }

    #[test]
    fn test_long_record_is_isolated() {
        let model = ESM2Models::ESM2_T6_8M.model_info();
        let input = records(&[10, 2000, 50]);
        let budget = BatchBudget::for_residues(model, 500);
        let batches = make_batches(&input, &budget);

        assert!(batches.len() >= 2);
        let long = batches
            .iter()
            .find(|b| b.records().iter().any(|r| r.len() == 2000))
            .unwrap();
        assert_eq!(long.len(), 1);
        assert!(long.cost() > budget.max_cost);
    }

    #[test]
    fn test_short_records_share_a_batch() {
        let model = ESM2Models::ESM2_T6_8M.model_info();
        let input = records(&[30; 20]);
        let budget = BatchBudget::for_batch_size(model, DEFAULT_BATCH_SIZE);
        let batches = make_batches(&input, &budget);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 8);
        assert_eq!(batches[2].offset(), 16);
    }

    #[test]
    fn test_batches_respect_budget_and_order() {
        let model = ESM2Models::ESM2_T12_35M.model_info();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let n = rng.gen_range(0..40);
            let lengths: Vec<usize> = (0..n).map(|_| rng.gen_range(0..2500)).collect();
            let input = records(&lengths);
            let budget = BatchBudget::for_residues(model, rng.gen_range(1..1500));
            let batches = make_batches(&input, &budget);

            let mut next = 0;
            for batch in batches.iter() {
                assert!(!batch.is_empty());
                assert_eq!(batch.offset(), next);
                assert!(batch.len() == 1 || batch.cost() <= budget.max_cost);
                assert!(batch.len() <= budget.max_sequences);
                for (j, record) in batch.records().iter().enumerate() {
                    assert_eq!(record.id(), input[next + j].id());
                }
                next += batch.len();
            }
            assert_eq!(next, input.len());
        }
    }

    #[test]
    fn test_default_batch_size_without_memory_info() {
        let model = ESM2Models::ESM2_T33_650M.model_info();
        let cpu = DeviceInfo::unknown(DeviceSpec::Cpu);
        assert_eq!(estimate_batch_size(&cpu, &model), DEFAULT_BATCH_SIZE);

        let budget = BatchBudget::from_device(&cpu, model, None);
        assert_eq!(budget.max_sequences, DEFAULT_BATCH_SIZE);
        let budget = BatchBudget::from_device(&cpu, model, Some(3));
        assert_eq!(budget.max_sequences, 3);
    }

    #[test]
    fn test_estimate_from_free_memory() {
        let model = ESM2Models::ESM2_T6_8M.model_info();
        let gpu = |mib: u64| DeviceInfo::with_free_memory(DeviceSpec::Cuda(0), mib * 1024 * 1024);

        let small = estimate_batch_size(&gpu(64), &model);
        let large = estimate_batch_size(&gpu(4096), &model);
        assert!(small >= 1);
        assert!(small < large);
        assert_eq!(estimate_batch_size(&gpu(1024 * 1024), &model), MAX_BATCH_SIZE);
        // less memory than the weights still yields one sequence
        assert_eq!(estimate_batch_size(&gpu(1), &model), 1);
        let unbounded = DeviceInfo::with_free_memory(DeviceSpec::Cuda(0), u64::MAX);
        assert_eq!(estimate_batch_size(&unbounded, &model), MAX_BATCH_SIZE);
    }

    #[test]
    fn test_split() {
        let model = ESM2Models::ESM2_T6_8M.model_info();
        let input = records(&[5, 6, 7]);
        let batch = Batch::new(&input, 10, &model);
        let (left, right) = batch.split(&model).unwrap();
        assert_eq!((left.len(), left.offset()), (1, 10));
        assert_eq!((right.len(), right.offset()), (2, 11));
        assert!(left.split(&model).is_none());
    }
}
