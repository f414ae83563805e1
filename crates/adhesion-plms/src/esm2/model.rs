//! ESM-2 encoder.
//!
//! Follows the `transformers` `EsmModel` layout so the published safetensors
//! checkpoints load by name:
//!
//! - pre-norm transformer layers with rotary position embeddings
//! - exact (erf) GELU feed forward
//! - token dropout rescaling of the input embeddings
//! - a final `emb_layer_norm_after`
//!
//! - [ESM](https://github.com/facebookresearch/esm)
//! - [HF](https://huggingface.co/facebook/esm2_t6_8M_UR50D)
//!
use super::config::ESM2Config;
use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{
    embedding, layer_norm, linear, ops::softmax_last_dim, Embedding, LayerNorm, Linear, VarBuilder,
};

// ESM-2 was trained masking 15% of tokens, 80% of those with <mask>.
const MASK_RATIO_TRAIN: f64 = 0.15 * 0.8;

#[derive(Debug)]
struct RotaryEmbedding {
    inv_freq: Tensor,
}

impl RotaryEmbedding {
    fn new(head_dim: usize, device: &Device) -> Result<Self> {
        let inv_freq: Vec<f32> = (0..head_dim)
            .step_by(2)
            .map(|i| 1f32 / 10000f32.powf(i as f32 / head_dim as f32))
            .collect();
        let half = inv_freq.len();
        Ok(Self {
            inv_freq: Tensor::from_vec(inv_freq, (1, half), device)?,
        })
    }

    /// cos and sin tables, each `[seq_len, head_dim]`.
    fn tables(&self, seq_len: usize) -> Result<(Tensor, Tensor)> {
        let positions = Tensor::arange(0u32, seq_len as u32, self.inv_freq.device())?
            .to_dtype(DType::F32)?
            .reshape((seq_len, 1))?;
        let freqs = positions.matmul(&self.inv_freq)?;
        let emb = Tensor::cat(&[&freqs, &freqs], D::Minus1)?;
        Ok((emb.cos()?, emb.sin()?))
    }
}

fn rotate_half(x: &Tensor) -> Result<Tensor> {
    let half = x.dim(D::Minus1)? / 2;
    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, half)?;
    Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)
}

fn apply_rotary_pos_emb(x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
    x.broadcast_mul(cos)?
        .add(&rotate_half(x)?.broadcast_mul(sin)?)
}

#[derive(Debug)]
struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn load(vb: VarBuilder, config: &ESM2Config) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            query: linear(hidden, hidden, vb.pp("query"))?,
            key: linear(hidden, hidden, vb.pp("key"))?,
            value: linear(hidden, hidden, vb.pp("value"))?,
            num_heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    // [batch, seq, hidden] -> [batch, heads, seq, head_dim]
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        x.reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, x: &Tensor, mask_bias: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, hidden) = x.dims3()?;
        let q = (self.split_heads(&self.query.forward(x)?)? * (self.head_dim as f64).powf(-0.5))?;
        let k = self.split_heads(&self.key.forward(x)?)?;
        let v = self.split_heads(&self.value.forward(x)?)?;

        let q = apply_rotary_pos_emb(&q, cos, sin)?;
        let k = apply_rotary_pos_emb(&k, cos, sin)?;

        let scores = q
            .matmul(&k.t()?.contiguous()?)?
            .broadcast_add(mask_bias)?;
        let probs = softmax_last_dim(&scores)?;
        probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, hidden))
    }
}

#[derive(Debug)]
struct EncoderLayer {
    attention: SelfAttention,
    attention_output: Linear,
    attention_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, config: &ESM2Config) -> Result<Self> {
        let hidden = config.hidden_size;
        let eps = config.layer_norm_eps;
        Ok(Self {
            attention: SelfAttention::load(vb.pp("attention.self"), config)?,
            attention_output: linear(hidden, hidden, vb.pp("attention.output.dense"))?,
            attention_norm: layer_norm(hidden, eps, vb.pp("attention.LayerNorm"))?,
            intermediate: linear(hidden, config.intermediate_size, vb.pp("intermediate.dense"))?,
            output: linear(config.intermediate_size, hidden, vb.pp("output.dense"))?,
            output_norm: layer_norm(hidden, eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, x: &Tensor, mask_bias: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
        let normed = self.attention_norm.forward(x)?;
        let attn = self.attention.forward(&normed, mask_bias, cos, sin)?;
        let x = self.attention_output.forward(&attn)?.add(x)?;

        let normed = self.output_norm.forward(&x)?;
        let ffn = self.intermediate.forward(&normed)?.gelu_erf()?;
        self.output.forward(&ffn)?.add(&x)
    }
}

/// The ESM-2 encoder, without the language model head.
#[derive(Debug)]
pub struct ESM2 {
    word_embeddings: Embedding,
    emb_layer_norm_before: Option<LayerNorm>,
    layers: Vec<EncoderLayer>,
    emb_layer_norm_after: LayerNorm,
    rotary: RotaryEmbedding,
    config: ESM2Config,
    device: Device,
}

impl ESM2 {
    /// `vb` must point at the encoder root (the `esm` prefix of an `EsmForMaskedLM` checkpoint).
    pub fn load(vb: VarBuilder, config: &ESM2Config) -> Result<Self> {
        let hidden = config.hidden_size;
        let eps = config.layer_norm_eps;
        let word_embeddings =
            embedding(config.vocab_size, hidden, vb.pp("embeddings.word_embeddings"))?;
        let emb_layer_norm_before = if config.emb_layer_norm_before.unwrap_or(false) {
            Some(layer_norm(hidden, eps, vb.pp("embeddings.layer_norm"))?)
        } else {
            None
        };
        let layers = (0..config.num_hidden_layers)
            .map(|i| EncoderLayer::load(vb.pp(format!("encoder.layer.{i}")), config))
            .collect::<Result<Vec<_>>>()?;
        let emb_layer_norm_after = layer_norm(hidden, eps, vb.pp("encoder.emb_layer_norm_after"))?;
        let rotary = RotaryEmbedding::new(config.head_dim(), vb.device())?;

        Ok(Self {
            word_embeddings,
            emb_layer_norm_before,
            layers,
            emb_layer_norm_after,
            rotary,
            config: config.clone(),
            device: vb.device().clone(),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &ESM2Config {
        &self.config
    }

    fn embed_tokens(&self, input_ids: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let x = self.word_embeddings.forward(input_ids)?;
        let x = if self.config.token_dropout {
            let is_mask = input_ids
                .eq(self.config.mask_token_id)?
                .to_dtype(DType::F32)?;
            let x = x.broadcast_mul(&is_mask.affine(-1.0, 1.0)?.unsqueeze(D::Minus1)?)?;
            let observed = is_mask.sum_keepdim(1)?.div(&mask.sum_keepdim(1)?)?;
            let scale = (observed.affine(-1.0, 1.0)?.recip()? * (1.0 - MASK_RATIO_TRAIN))?;
            x.broadcast_mul(&scale.unsqueeze(D::Minus1)?)?
        } else {
            x
        };
        let x = match &self.emb_layer_norm_before {
            Some(norm) => norm.forward(&x)?,
            None => x,
        };
        x.broadcast_mul(&mask.unsqueeze(D::Minus1)?)
    }

    /// Final hidden states `[batch, seq_len, hidden]` for u32 `input_ids` and
    /// `attention_mask`, both `[batch, seq_len]`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let (batch, seq_len) = input_ids.dims2()?;
        let mask = attention_mask.to_dtype(DType::F32)?;
        let mut x = self.embed_tokens(input_ids, &mask)?;

        // 0 for real tokens, a large negative for padding
        let mask_bias = mask.affine(1e9, -1e9)?.reshape((batch, 1, 1, seq_len))?;
        let (cos, sin) = self.rotary.tables(seq_len)?;
        for layer in self.layers.iter() {
            x = layer.forward(&x, &mask_bias, &cos, &sin)?;
        }
        self.emb_layer_norm_after.forward(&x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esm2::tokenizer::ESMTokenizer;
    use candle_nn::VarMap;

    fn tiny_config() -> ESM2Config {
        ESM2Config {
            hidden_size: 16,
            num_hidden_layers: 2,
            num_attention_heads: 4,
            intermediate_size: 32,
            ..ESM2Config::esm2_t6_8m()
        }
    }

    #[test]
    fn test_rotate_half() -> Result<()> {
        let x = Tensor::new(&[[1f32, 2., 3., 4.]], &Device::Cpu)?;
        assert_eq!(rotate_half(&x)?.to_vec2::<f32>()?, vec![vec![-3., -4., 1., 2.]]);
        Ok(())
    }

    #[test]
    fn test_rotary_position_zero_is_identity() -> Result<()> {
        let rotary = RotaryEmbedding::new(4, &Device::Cpu)?;
        let (cos, sin) = rotary.tables(3)?;
        assert_eq!(cos.dims(), &[3, 4]);
        let x = Tensor::new(&[[[1f32, 2., 3., 4.]]], &Device::Cpu)?;
        let first_cos = cos.narrow(0, 0, 1)?;
        let first_sin = sin.narrow(0, 0, 1)?;
        let rotated = apply_rotary_pos_emb(&x, &first_cos, &first_sin)?;
        assert_eq!(rotated.to_vec3::<f32>()?, x.to_vec3::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_forward_shapes_and_padding_invariance() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = tiny_config();
        let model = ESM2::load(vb, &config)?;
        let tokenizer = ESMTokenizer::new()?;

        let alone = tokenizer.encode_batch(&["MKTAY"], &Device::Cpu)?;
        let padded = tokenizer.encode_batch(&["MKTAY", "MKTAYIAKQRQISFVK"], &Device::Cpu)?;

        let hidden_alone = model.forward(&alone.input_ids, &alone.attention_mask)?;
        let hidden_padded = model.forward(&padded.input_ids, &padded.attention_mask)?;
        assert_eq!(hidden_alone.dims(), &[1, 7, 16]);
        assert_eq!(hidden_padded.dims(), &[2, 18, 16]);

        // padding must not leak into the real tokens of the shorter sequence
        let a = hidden_alone.get(0)?.to_vec2::<f32>()?;
        let b = hidden_padded.get(0)?.narrow(0, 0, 7)?.to_vec2::<f32>()?;
        for (row_a, row_b) in a.iter().zip(b.iter()) {
            for (x, y) in row_a.iter().zip(row_b.iter()) {
                assert!((x - y).abs() < 1e-4, "{x} vs {y}");
            }
        }
        Ok(())
    }
}
