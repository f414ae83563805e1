//! Prediction rows and the CSV report.
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const ADHESION_LABEL: &str = "Adhesion";
pub const NON_ADHESION_LABEL: &str = "Non-adhesion";
const OUTPUT_SUFFIX: &str = "adhesion_predict.csv";

/// The classification of one sequence record.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub id: String,
    /// Probability of the adhesion class.
    pub score: f32,
    pub label: bool,
}

impl PredictionResult {
    pub fn label_name(&self) -> &'static str {
        if self.label {
            ADHESION_LABEL
        } else {
            NON_ADHESION_LABEL
        }
    }
}

/// `<name>.adhesion_predict.csv` in the working directory, where `<name>` is the
/// directory name or the file name without its last extension.
pub fn default_output_path(input: &Path) -> PathBuf {
    let name = if input.is_dir() {
        input.file_name()
    } else {
        input.file_stem()
    };
    let name = name
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    PathBuf::from(format!("{name}.{OUTPUT_SUFFIX}"))
}

/// Rows to report: predicted adhesins only, or everything with `show_all`.
pub fn select_results<'a, I>(results: I, show_all: bool) -> Vec<&'a PredictionResult>
where
    I: IntoIterator<Item = &'a PredictionResult>,
{
    results
        .into_iter()
        .filter(|r| show_all || r.label)
        .collect()
}

pub fn results_frame(results: &[&PredictionResult]) -> PolarsResult<DataFrame> {
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    let labels: Vec<&str> = results.iter().map(|r| r.label_name()).collect();
    let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
    df!(
        "id" => ids,
        "prediction" => labels,
        "probability_adhesion" => scores
    )
}

/// Write `id,prediction,probability_adhesion` with probabilities to 4 decimals.
pub fn write_csv(results: &[&PredictionResult], path: &Path) -> PolarsResult<()> {
    let mut frame = results_frame(results)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_float_precision(Some(4))
        .finish(&mut frame)
}

/// The line printed to stdout for each reported sequence.
pub fn format_line(result: &PredictionResult) -> String {
    format!("{}: {} (p={:.3})", result.id, result.label_name(), result.score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn result(id: &str, score: f32) -> PredictionResult {
        PredictionResult {
            id: id.to_string(),
            score,
            label: score >= 0.5,
        }
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("data/proteome.faa")),
            PathBuf::from("proteome.adhesion_predict.csv")
        );
        assert_eq!(
            default_output_path(Path::new("data/proteome.faa.gz")),
            PathBuf::from("proteome.faa.adhesion_predict.csv")
        );
        let dir = tempdir().unwrap();
        let genomes = dir.path().join("genomes");
        std::fs::create_dir(&genomes).unwrap();
        assert_eq!(
            default_output_path(&genomes),
            PathBuf::from("genomes.adhesion_predict.csv")
        );
    }

    #[test]
    fn test_select_results() {
        let results = vec![result("a", 0.9), result("b", 0.1), result("c", 0.5)];
        let ids = |rows: Vec<&PredictionResult>| rows.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(select_results(&results, false)), vec!["a", "c"]);
        assert_eq!(ids(select_results(&results, true)), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let results = vec![result("sp|P08191|FIMH_ECOLI", 0.91234), result("ACT", 0.0125)];
        let rows: Vec<&PredictionResult> = results.iter().collect();
        write_csv(&rows, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id,prediction,probability_adhesion");
        assert_eq!(lines[1], "sp|P08191|FIMH_ECOLI,Adhesion,0.9123");
        assert_eq!(lines[2], "ACT,Non-adhesion,0.0125");
    }

    #[test]
    fn test_empty_report_has_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_csv(&[], &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), "id,prediction,probability_adhesion");
    }

    #[test]
    fn test_format_line() {
        assert_eq!(format_line(&result("x", 0.87654)), "x: Adhesion (p=0.877)");
    }
}
