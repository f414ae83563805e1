//! ESM-2 protein language model.
pub mod config;
pub mod model;
pub mod models;
pub mod tokenizer;
