use super::models::ModelInfo;
use serde::{Deserialize, Serialize};

/// The subset of a `transformers` `EsmConfig` needed to run the encoder.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ESM2Config {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_true")]
    pub token_dropout: bool,
    #[serde(default)]
    pub emb_layer_norm_before: Option<bool>,
    #[serde(default = "default_position_embedding_type")]
    pub position_embedding_type: String,
    #[serde(default = "default_mask_token_id")]
    pub mask_token_id: u32,
    #[serde(default = "default_pad_token_id")]
    pub pad_token_id: u32,
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}
fn default_true() -> bool {
    true
}
fn default_position_embedding_type() -> String {
    "rotary".to_string()
}
fn default_mask_token_id() -> u32 {
    32
}
fn default_pad_token_id() -> u32 {
    1
}

impl ESM2Config {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Parameter count of the encoder (without the language model head).
    pub fn model_info(&self) -> ModelInfo {
        let h = self.hidden_size as u64;
        let ffn = self.intermediate_size as u64;
        let attention = 4 * (h * h + h) + 2 * h;
        let feed_forward = h * ffn + ffn + ffn * h + h + 2 * h;
        let per_layer = attention + feed_forward;
        ModelInfo {
            parameters: self.vocab_size as u64 * h
                + self.num_hidden_layers as u64 * per_layer
                + 2 * h,
            num_layers: self.num_hidden_layers,
            hidden_size: self.hidden_size,
            num_attention_heads: self.num_attention_heads,
        }
    }

    /// The `esm2_t6_8M_UR50D` configuration.
    pub fn esm2_t6_8m() -> Self {
        Self {
            vocab_size: 33,
            hidden_size: 320,
            num_hidden_layers: 6,
            num_attention_heads: 20,
            intermediate_size: 1280,
            layer_norm_eps: 1e-5,
            token_dropout: true,
            emb_layer_norm_before: Some(false),
            position_embedding_type: "rotary".to_string(),
            mask_token_id: 32,
            pad_token_id: 1,
        }
    }
}
