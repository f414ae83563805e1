//! The ESM-2 tokenizer.
//!
//! ESM-2 uses a fixed 33 token vocabulary with one token per residue. The
//! vocabulary ships with this crate as `tokenizer.json` and is loaded from
//! memory. Sequences are encoded as `<cls> residues... <eos>`, truncated to
//! [`MAX_RESIDUES`] and right-padded with `<pad>` in batches.
use candle_core::{Device, Result, Tensor};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// Residues beyond this length are not passed to the model.
pub const MAX_RESIDUES: usize = 1022;

pub const CLS_TOKEN_ID: u32 = 0;
pub const PAD_TOKEN_ID: u32 = 1;
pub const EOS_TOKEN_ID: u32 = 2;
pub const UNK_TOKEN_ID: u32 = 3;
pub const MASK_TOKEN_ID: u32 = 32;

/// A padded batch of token ids.
#[derive(Debug)]
pub struct EncodedBatch {
    /// `[batch, seq_len]` u32 token ids.
    pub input_ids: Tensor,
    /// `[batch, seq_len]` u32, 1 for real tokens and 0 for padding.
    pub attention_mask: Tensor,
    /// Number of residues kept for each sequence after truncation.
    pub residue_counts: Vec<usize>,
}

#[derive(Clone)]
pub struct ESMTokenizer {
    tokenizer: Tokenizer,
}

impl std::fmt::Debug for ESMTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ESMTokenizer")
            .field("vocab_size", &self.vocab_size())
            .finish()
    }
}

fn tokenizer_error(e: tokenizers::Error) -> candle_core::Error {
    candle_core::Error::Msg(format!("tokenizer: {e}"))
}

impl ESMTokenizer {
    pub fn new() -> Result<Self> {
        let tokenizer_bytes = include_bytes!("tokenizer.json");
        let mut tokenizer = Tokenizer::from_bytes(tokenizer_bytes).map_err(tokenizer_error)?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_RESIDUES + 2,
                ..Default::default()
            }))
            .map_err(tokenizer_error)?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            pad_id: PAD_TOKEN_ID,
            pad_token: "<pad>".to_string(),
            ..Default::default()
        }));
        Ok(Self { tokenizer })
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(false)
    }

    pub fn token_to_id(&self, token: &str) -> u32 {
        self.tokenizer.token_to_id(token).unwrap_or(UNK_TOKEN_ID)
    }

    pub fn id_to_token(&self, id: u32) -> String {
        self.tokenizer
            .id_to_token(id)
            .unwrap_or_else(|| "<unk>".to_string())
    }

    /// Encode one sequence as `<cls> residues <eos>`, truncated to [`MAX_RESIDUES`].
    pub fn encode(&self, residues: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(residues.to_ascii_uppercase(), true)
            .map_err(tokenizer_error)?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer.decode(ids, true).map_err(tokenizer_error)
    }

    /// Encode and right-pad a batch of sequences.
    pub fn encode_batch(&self, sequences: &[&str], device: &Device) -> Result<EncodedBatch> {
        let inputs: Vec<String> = sequences.iter().map(|s| s.to_ascii_uppercase()).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(tokenizer_error)?;
        let batch = encodings.len();
        let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());

        let mut input_ids = Vec::with_capacity(batch * seq_len);
        let mut attention_mask = Vec::with_capacity(batch * seq_len);
        let mut residue_counts = Vec::with_capacity(batch);
        for encoding in &encodings {
            input_ids.extend_from_slice(encoding.get_ids());
            attention_mask.extend_from_slice(encoding.get_attention_mask());
            let tokens = encoding.get_attention_mask().iter().sum::<u32>() as usize;
            residue_counts.push(tokens.saturating_sub(2));
        }

        Ok(EncodedBatch {
            input_ids: Tensor::from_vec(input_ids, (batch, seq_len), device)?,
            attention_mask: Tensor::from_vec(attention_mask, (batch, seq_len), device)?,
            residue_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocab_layout() -> Result<()> {
        let tokenizer = ESMTokenizer::new()?;
        assert_eq!(tokenizer.vocab_size(), 33);
        assert_eq!(tokenizer.token_to_id("<cls>"), CLS_TOKEN_ID);
        assert_eq!(tokenizer.token_to_id("<pad>"), PAD_TOKEN_ID);
        assert_eq!(tokenizer.token_to_id("<eos>"), EOS_TOKEN_ID);
        assert_eq!(tokenizer.token_to_id("<mask>"), MASK_TOKEN_ID);
        assert_eq!(tokenizer.token_to_id("L"), 4);
        assert_eq!(tokenizer.token_to_id("C"), 23);
        for c in "LAGVSERTIDPKQNFYMHWCXBUZO.-".chars() {
            let id = tokenizer.token_to_id(&c.to_string());
            assert_eq!(tokenizer.id_to_token(id), c.to_string());
        }
        Ok(())
    }

    #[test]
    fn test_encode_roundtrip() -> Result<()> {
        let tokenizer = ESMTokenizer::new()?;
        let ids = tokenizer.encode("mlKLRV")?;
        assert_eq!(ids, vec![0, 20, 4, 15, 4, 10, 7, 2]);
        assert_eq!(tokenizer.decode(&ids)?, "MLKLRV");
        assert_eq!(tokenizer.encode("M#")?[2], UNK_TOKEN_ID);
        Ok(())
    }

    #[test]
    fn test_truncation() -> Result<()> {
        let tokenizer = ESMTokenizer::new()?;
        let long = "A".repeat(2000);
        let ids = tokenizer.encode(&long)?;
        assert_eq!(ids.len(), MAX_RESIDUES + 2);
        assert_eq!(ids.last(), Some(&EOS_TOKEN_ID));

        let batch = tokenizer.encode_batch(&[long.as_str(), "MK"], &Device::Cpu)?;
        assert_eq!(batch.residue_counts, vec![MAX_RESIDUES, 2]);
        Ok(())
    }

    #[test]
    fn test_encode_batch_padding() -> Result<()> {
        let tokenizer = ESMTokenizer::new()?;
        let batch = tokenizer.encode_batch(&["MK", "MKTAY"], &Device::Cpu)?;
        assert_eq!(batch.input_ids.dims(), &[2, 7]);
        assert_eq!(batch.residue_counts, vec![2, 5]);
        let mask = batch.attention_mask.to_vec2::<u32>()?;
        assert_eq!(mask[0], vec![1, 1, 1, 1, 0, 0, 0]);
        assert_eq!(mask[1], vec![1; 7]);
        let ids = batch.input_ids.to_vec2::<u32>()?;
        assert_eq!(ids[0], vec![0, 20, 15, 2, 1, 1, 1]);
        Ok(())
    }

    #[test]
    fn test_empty_sequence() -> Result<()> {
        let tokenizer = ESMTokenizer::new()?;
        assert_eq!(tokenizer.encode("")?, vec![CLS_TOKEN_ID, EOS_TOKEN_ID]);
        Ok(())
    }
}
