use super::{build_predictor, check_failures, discover_inputs};
use crate::cli::PredictArgs;
use adhesion_predict::config::default_classifier_path;
use adhesion_predict::report::{format_line, select_results, write_csv};
use adhesion_predict::{process_files, PredictConfig};
use anyhow::{Context, Result};
use tracing::info;

fn config_from_args(args: PredictArgs) -> PredictConfig {
    let mut config = PredictConfig::new(&args.input);
    args.model_args.apply(&mut config);
    config.classifier = args
        .model
        .unwrap_or_else(|| default_classifier_path(&config.model_name));
    if let Some(output) = args.output {
        config.output = output;
    }
    config.threshold = args.threshold;
    config.show_all = args.show_all;
    config
}

pub fn execute(args: PredictArgs) -> Result<()> {
    run(&config_from_args(args))
}

pub fn run(config: &PredictConfig) -> Result<()> {
    config.check()?;
    let inputs = discover_inputs(&config.input)?;
    info!(files = inputs.len(), input = %config.input.display(), "found FASTA files");

    let predictor = build_predictor(config)?;
    let report = process_files(&inputs, config.max_workers, &predictor)?;
    let rows = select_results(report.results(), config.show_all);
    if !config.silent {
        for row in rows.iter() {
            println!("{}", format_line(row));
        }
    }
    write_csv(&rows, &config.output)
        .with_context(|| format!("failed to write {}", config.output.display()))?;
    info!(
        rows = rows.len(),
        sequences = report.results().count(),
        output = %config.output.display(),
        "saved predictions"
    );

    check_failures(report.failures(), inputs.len())
}
