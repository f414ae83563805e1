//! adhesion-test-data
//!
//! Test files embedded in the crate for use in testing.
//!
//! The test files are represented as `TestFile` objects which package the raw binary data
//! and create temporary files for programs to operate on.
use std::fs;
use std::path::Path;
use tempfile::{Builder, NamedTempFile};

#[derive(Debug)]
/// Test File
///
/// Example usage:
///
/// ```ignore
/// // returns (filepath, _tempfile_handle).
/// // _handle ensures the tempfile remains in scope
/// use adhesion_test_data::TestFile;
/// let (fasta, _temp) = TestFile::adhesins_01().create_temp().unwrap();
/// ```
pub struct TestFile {
    filebinary: &'static [u8],
    suffix: &'static str,
}

impl TestFile {
    /// Four proteins: three bacterial adhesins and an actin control.
    pub fn adhesins_01() -> Self {
        Self {
            filebinary: include_bytes!("../data/fasta/adhesins_01.faa"),
            suffix: "faa",
        }
    }
    /// `adhesins_01` compressed with gzip.
    pub fn adhesins_01_gz() -> Self {
        Self {
            filebinary: include_bytes!("../data/fasta/adhesins_01.faa.gz"),
            suffix: "faa.gz",
        }
    }
    /// Three records of 10, 2000 and 50 residues.
    pub fn long_sequence_01() -> Self {
        Self {
            filebinary: include_bytes!("../data/fasta/long_sequence.faa"),
            suffix: "faa",
        }
    }
    /// Sequence data with no `>` header.
    pub fn malformed_01() -> Self {
        Self {
            filebinary: include_bytes!("../data/fasta/malformed.faa"),
            suffix: "faa",
        }
    }
    /// Logistic regression weights sized for `esm2_t6_8M_UR50D` (320 dims).
    pub fn classifier_esm2_t6() -> Self {
        Self {
            filebinary: include_bytes!(
                "../data/classifier/adhesion_model_esm2_t6_8M_UR50D.json"
            ),
            suffix: "json",
        }
    }

    pub fn create_temp(&self) -> std::io::Result<(String, NamedTempFile)> {
        let temp = Builder::new()
            .suffix(&format!(".{}", self.suffix))
            .tempfile()?;

        fs::write(&temp, self.filebinary)?;
        let path = temp.path().to_string_lossy().into_owned();

        Ok((path, temp))
    }

    /// Write the file into an existing directory under `stem` plus this file's suffix.
    pub fn write_into(&self, dir: &Path, stem: &str) -> std::io::Result<std::path::PathBuf> {
        let path = dir.join(format!("{stem}.{}", self.suffix));
        fs::write(&path, self.filebinary)?;
        Ok(path)
    }
}
