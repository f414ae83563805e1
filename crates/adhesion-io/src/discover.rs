//! Locating FASTA inputs on disk.
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Recognised protein FASTA extensions. Each may additionally end in `.gz`.
pub const FASTA_EXTENSIONS: [&str; 6] = ["aa", "faa", "pep", "fa", "fas", "fasta"];

/// Whether the file name ends in one of [`FASTA_EXTENSIONS`] (optionally gzipped),
/// compared case-insensitively.
pub fn is_fasta_path(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    FASTA_EXTENSIONS
        .iter()
        .any(|ext| name.len() > ext.len() + 1 && name.ends_with(&format!(".{ext}")))
}

/// Recursively find FASTA files below `dir`, sorted by path.
///
/// Symbolic links are followed.
pub fn find_fasta_files<P: AsRef<Path>>(dir: P) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir.as_ref())
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && is_fasta_path(entry.path()) {
            found.push(entry.into_path());
        }
    }
    debug!(dir = %dir.as_ref().display(), files = found.len(), "discovered fasta files");
    Ok(found)
}

/// Resolve a command line input into FASTA files.
///
/// A file is taken as-is regardless of its extension; a directory is searched
/// with [`find_fasta_files`].
pub fn collect_inputs<P: AsRef<Path>>(input: P) -> io::Result<Vec<PathBuf>> {
    let input = input.as_ref();
    if input.is_file() {
        Ok(vec![input.to_path_buf()])
    } else if input.is_dir() {
        find_fasta_files(input)
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is neither a file nor a directory", input.display()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::write(path, ">seq1\nMSEQ\n").unwrap();
    }

    #[test]
    fn test_extension_matching() {
        for name in [
            "a.faa", "b.fasta", "c.pep", "d.FAA", "e.fa.gz", "f.aa", "g.FASTA.GZ", "h.fas",
            "i.pep.fa",
        ] {
            assert!(is_fasta_path(Path::new(name)), "{name}");
        }
        for name in ["notes.txt", "faa", ".faa", "x.gz", "x.fastq", "x.faa.zip"] {
            assert!(!is_fasta_path(Path::new(name)), "{name}");
        }
    }

    #[test]
    fn test_find_nested_and_sorted() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("subdir");
        fs::create_dir(&sub).unwrap();
        touch(&dir.path().join("test2.fasta"));
        touch(&dir.path().join("test1.faa"));
        touch(&sub.join("nested.pep"));
        touch(&dir.path().join("readme.txt"));

        let found = find_fasta_files(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("subdir/nested.pep"),
                PathBuf::from("test1.faa"),
                PathBuf::from("test2.fasta"),
            ]
        );
    }

    #[test]
    fn test_sorted_across_levels() {
        let dir = tempdir().unwrap();
        for sub in ["b", "a", "a/z"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
        }
        touch(&dir.path().join("b/2.faa"));
        touch(&dir.path().join("b/1.faa"));
        touch(&dir.path().join("a/z/deep.faa"));
        touch(&dir.path().join("a/top.faa"));
        touch(&dir.path().join("0.faa"));

        let found = find_fasta_files(dir.path()).unwrap();
        let mut sorted = found.clone();
        sorted.sort();
        assert_eq!(found, sorted);
        assert_eq!(found.len(), 5);
    }

    #[test]
    fn test_missing_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(
            find_fasta_files(dir.path().join("absent")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_empty_dir() {
        let dir = tempdir().unwrap();
        assert!(find_fasta_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_collect_inputs() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("proteins.txt");
        touch(&file);
        assert_eq!(collect_inputs(&file).unwrap(), vec![file.clone()]);
        assert!(collect_inputs(dir.path()).unwrap().is_empty());
        assert_eq!(
            collect_inputs(dir.path().join("missing")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
