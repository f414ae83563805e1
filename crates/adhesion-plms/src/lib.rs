//! adhesion-plms
//!
//! ESM-2 protein language model embeddings on candle, plus the pieces needed
//! to run it over many sequences: a memory aware batcher, a process scoped
//! model cache and pooling of per-residue states into one vector per protein.
//!
//! ```shell
//! cargo test -p adhesion-plms
//! cargo test -p adhesion-plms --features metal -- --ignored
//! ```
pub mod batcher;
pub mod cache;
pub mod device;
pub mod embedder;
pub mod error;
pub mod esm2;
pub mod loader;

pub use batcher::{
    batch_cost, estimate_batch_size, make_batches, sequence_cost, Batch, BatchBudget,
    DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE,
};
pub use cache::{ModelCache, ModelHandle, ModelKey, ModelLoader};
pub use device::{DeviceInfo, DeviceParseError, DeviceSpec};
pub use embedder::{embed, embed_all, Embedding, EmbeddingModel, Pooling};
pub use error::{EmbeddingError, ModelLoadError};
pub use esm2::config::ESM2Config;
pub use esm2::model::ESM2;
pub use esm2::models::{ESM2Models, ModelInfo, DEFAULT_MODEL};
pub use esm2::tokenizer::{ESMTokenizer, MAX_RESIDUES};
pub use loader::{ESM2Embedder, ESM2Loader, WeightSource};
