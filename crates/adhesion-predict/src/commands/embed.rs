use super::{check_failures, discover_inputs};
use crate::cli::EmbedArgs;
use adhesion_io::read_fasta_file;
use adhesion_plms::{embed_all, BatchBudget, ESM2Loader, Embedding, ModelCache};
use adhesion_predict::export::write_embeddings;
use adhesion_predict::{process_files_with, resolve_worker_count, FileOutcome, PredictConfig};
use anyhow::{Context, Result};
use tracing::info;

pub fn execute(args: EmbedArgs) -> Result<()> {
    let mut config = PredictConfig::new(&args.input);
    args.model_args.apply(&mut config);
    config.output = args.output;
    config.check()?;

    let inputs = discover_inputs(&config.input)?;
    let cache = ModelCache::new(ESM2Loader::new(config.weights.clone(), config.pooling));
    let model = cache.get_model(&config.model_name, config.device)?;
    let budget = BatchBudget::from_device(&config.device_info(), model.info(), config.batch_size);

    let workers = resolve_worker_count(config.max_workers, inputs.len());
    info!(files = inputs.len(), workers, "embedding files");
    let report = process_files_with(&inputs, workers, |path| -> FileOutcome<Vec<Embedding>> {
        let records = read_fasta_file(path)?;
        Ok(embed_all(&records, model.as_ref(), &budget)?)
    })?;

    let embeddings: Vec<Embedding> = report.results().cloned().collect();
    if embeddings.is_empty() && report.has_failures() {
        return check_failures(report.failures(), inputs.len());
    }
    write_embeddings(&embeddings, &config.model_name, &config.output)
        .with_context(|| format!("failed to write {}", config.output.display()))?;
    info!(
        sequences = embeddings.len(),
        dim = model.embedding_dim(),
        output = %config.output.display(),
        "saved embeddings"
    );

    check_failures(report.failures(), inputs.len())
}
