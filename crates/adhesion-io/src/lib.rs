//! adhesion-io
//!
//! Reading protein FASTA files (plain or gzip compressed) into [`SequenceRecord`]s
//! and discovering FASTA inputs on disk.
//!
//! ```ignore
//! use adhesion_io::{collect_inputs, read_fasta_file};
//!
//! for path in collect_inputs("proteomes/")? {
//!     let records = read_fasta_file(&path)?;
//!     println!("{}: {} sequences", path.display(), records.len());
//! }
//! ```
pub mod discover;
pub mod fasta;

pub use discover::{collect_inputs, find_fasta_files, is_fasta_path, FASTA_EXTENSIONS};
pub use fasta::{clean_sequence, open_fasta, read_fasta_file, FastaError, Reader, SequenceRecord};
