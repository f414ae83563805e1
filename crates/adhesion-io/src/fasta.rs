use bio::io::fasta;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FastaError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("read error at record {record}: {source}")]
    Read {
        record: usize,
        #[source]
        source: io::Error,
    },
    #[error("line {line}: sequence data before the first '>' header")]
    MissingHeader { line: usize },
    #[error("record {record}: header has no identifier")]
    EmptyIdentifier { record: usize },
}

/// A single protein sequence.
///
/// `residues` have already been passed through [`clean_sequence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    id: String,
    residues: String,
}

impl SequenceRecord {
    pub fn new(id: impl Into<String>, residues: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            residues: residues.into(),
        }
    }
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn residues(&self) -> &str {
        &self.residues
    }
    /// Number of residues.
    pub fn len(&self) -> usize {
        self.residues.len()
    }
    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }
}

/// Replace the ambiguous `J` (Leu/Ile) with `L` and strip stop codons.
pub fn clean_sequence(sequence: &str) -> String {
    sequence
        .chars()
        .filter(|&c| c != '*')
        .map(|c| if c == 'J' || c == 'j' { 'L' } else { c })
        .collect()
}

/// A FASTA reader over [`bio::io::fasta`].
///
/// Blank lines before the first header are skipped; any other content there
/// is rejected with [`FastaError::MissingHeader`].
pub struct Reader<R: Read> {
    inner: fasta::Reader<BufReader<R>>,
}

impl<R: BufRead> Reader<R> {
    pub fn new(mut inner: R) -> Result<Self, FastaError> {
        let read_err = |source| FastaError::Read { record: 1, source };
        let blank_lines = skip_blank_lines(&mut inner).map_err(read_err)?;
        let first = inner.fill_buf().map_err(read_err)?.first().copied();
        if first.is_some_and(|b| b != b'>') {
            return Err(FastaError::MissingHeader {
                line: blank_lines + 1,
            });
        }
        Ok(Self {
            inner: fasta::Reader::new(inner),
        })
    }

    /// Returns an iterator over the records.
    pub fn records(self) -> Records<R> {
        Records {
            inner: self.inner.records(),
            read: 0,
        }
    }
}

// Consumes leading whitespace, returning the number of newlines passed.
fn skip_blank_lines<R: BufRead>(inner: &mut R) -> io::Result<usize> {
    let mut newlines = 0;
    loop {
        let buf = inner.fill_buf()?;
        if buf.is_empty() {
            return Ok(newlines);
        }
        let blank = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        newlines += buf[..blank].iter().filter(|&&b| b == b'\n').count();
        let done = blank < buf.len();
        inner.consume(blank);
        if done {
            return Ok(newlines);
        }
    }
}

/// An iterator over the records of a FASTA reader.
pub struct Records<R: Read> {
    inner: fasta::Records<BufReader<R>>,
    read: usize,
}

impl<R: Read> Iterator for Records<R> {
    type Item = Result<SequenceRecord, FastaError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.inner.next()?;
        self.read += 1;
        let index = self.read;
        Some(
            record
                .map_err(|source| FastaError::Read {
                    record: index,
                    source,
                })
                .and_then(|record| to_sequence_record(&record, index)),
        )
    }
}

fn to_sequence_record(record: &fasta::Record, index: usize) -> Result<SequenceRecord, FastaError> {
    // `> id desc` leaves the id empty and the rest in the description
    let id = match record.id() {
        "" => record.desc().and_then(|desc| desc.split_whitespace().next()),
        id => Some(id),
    }
    .ok_or(FastaError::EmptyIdentifier { record: index })?;
    let residues: String = String::from_utf8_lossy(record.seq())
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    Ok(SequenceRecord::new(id, clean_sequence(&residues)))
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Open a FASTA file, transparently decompressing `.gz` files.
pub fn open_fasta<P: AsRef<Path>>(path: P) -> Result<Reader<Box<dyn BufRead + Send>>, FastaError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FastaError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let inner: Box<dyn BufRead + Send> = if is_gzip(path) {
        debug!(path = %path.display(), "reading gzipped fasta");
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Reader::new(inner)
}

/// Read every record of a FASTA file.
pub fn read_fasta_file<P: AsRef<Path>>(path: P) -> Result<Vec<SequenceRecord>, FastaError> {
    let path = path.as_ref();
    let records = open_fasta(path)?.records().collect::<Result<Vec<_>, _>>()?;
    debug!(path = %path.display(), sequences = records.len(), "parsed fasta");
    Ok(records)
}
