//! Published ESM-2 checkpoints.
//!
//! Weights are the Hugging Face `transformers` conversions hosted under `facebook/`.
//!
//! # Models:
//! * esm2_t6_8M_UR50D - small 6-layer protein language model
//! * esm2_t12_35M_UR50D - medium 12-layer protein language model
//! * esm2_t30_150M_UR50D - large 30-layer protein language model
//! * esm2_t33_650M_UR50D - 33-layer model, needs a GPU to be practical
//!
use crate::error::ModelLoadError;
use itertools::Itertools;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

pub const DEFAULT_MODEL: ESM2Models = ESM2Models::ESM2_T6_8M;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
pub enum ESM2Models {
    #[strum(serialize = "esm2_t6_8M_UR50D")]
    ESM2_T6_8M,
    #[strum(serialize = "esm2_t12_35M_UR50D")]
    ESM2_T12_35M,
    #[strum(serialize = "esm2_t30_150M_UR50D")]
    ESM2_T30_150M,
    #[strum(serialize = "esm2_t33_650M_UR50D")]
    ESM2_T33_650M,
}

/// Size information used to estimate memory cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub parameters: u64,
    pub num_layers: usize,
    pub hidden_size: usize,
    pub num_attention_heads: usize,
}

impl ESM2Models {
    pub fn repo_id(&self) -> &'static str {
        match self {
            ESM2Models::ESM2_T6_8M => "facebook/esm2_t6_8M_UR50D",
            ESM2Models::ESM2_T12_35M => "facebook/esm2_t12_35M_UR50D",
            ESM2Models::ESM2_T30_150M => "facebook/esm2_t30_150M_UR50D",
            ESM2Models::ESM2_T33_650M => "facebook/esm2_t33_650M_UR50D",
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        let (parameters, num_layers, hidden_size) = match self {
            ESM2Models::ESM2_T6_8M => (7_840_794, 6, 320),
            ESM2Models::ESM2_T12_35M => (33_992_881, 12, 480),
            ESM2Models::ESM2_T30_150M => (148_795_481, 30, 640),
            ESM2Models::ESM2_T33_650M => (652_356_645, 33, 1280),
        };
        ModelInfo {
            parameters,
            num_layers,
            hidden_size,
            num_attention_heads: 20,
        }
    }

    /// Comma separated list of accepted names, for error messages.
    pub fn choices() -> String {
        ESM2Models::iter().join(", ")
    }

    pub fn from_name(name: &str) -> Result<Self, ModelLoadError> {
        ESM2Models::from_str(name).map_err(|_| ModelLoadError::UnknownModel {
            name: name.to_string(),
            choices: Self::choices(),
        })
    }
}
