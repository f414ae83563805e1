use super::{build_predictor, check_failures, discover_inputs};
use crate::cli::EvaluateArgs;
use adhesion_predict::config::default_classifier_path;
use adhesion_predict::{process_files, Evaluation, FileOutcome, PredictConfig, PredictionResult};
use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing::info;

fn scored(files: &[(PathBuf, FileOutcome)]) -> impl Iterator<Item = &PredictionResult> {
    files
        .iter()
        .filter_map(|(_, outcome)| outcome.as_ref().ok())
        .flatten()
}

pub fn execute(args: EvaluateArgs) -> Result<()> {
    let mut config = PredictConfig::new(&args.positive);
    args.model_args.apply(&mut config);
    config.classifier = args
        .model
        .unwrap_or_else(|| default_classifier_path(&config.model_name));
    config.threshold = args.threshold;
    config.check()?;

    let positives = discover_inputs(&args.positive)?;
    let negatives = discover_inputs(&args.negative)?;
    info!(
        positive_files = positives.len(),
        negative_files = negatives.len(),
        "found labelled FASTA files"
    );

    let predictor = build_predictor(&config)?;
    let inputs: Vec<PathBuf> = positives.iter().chain(negatives.iter()).cloned().collect();
    let report = process_files(&inputs, config.max_workers, &predictor)?;
    let (positive_files, negative_files) = report.files().split_at(positives.len());
    let evaluation = Evaluation::new(scored(positive_files), scored(negative_files));
    if evaluation.confusion.total() == 0 {
        check_failures(report.failures(), inputs.len())?;
        bail!("no sequences were scored");
    }
    println!("{evaluation}");

    check_failures(report.failures(), inputs.len())
}
