//! Runs the pipeline over many files on a pool of worker threads.
//!
//! Files are fed to the workers through a job channel and each worker runs one
//! file at a time to completion. Failures and panics are captured per file.
//! A model that cannot be loaded stops the run: the workers stop taking new
//! files and the load error is returned.
use crate::error::FileProcessingError;
use crate::pipeline::Predictor;
use crate::report::PredictionResult;
use adhesion_plms::ModelLoadError;
use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

pub type FileOutcome<T = Vec<PredictionResult>> = Result<T, FileProcessingError>;

/// Outcome of every input file, in input order.
#[derive(Debug)]
pub struct DispatchReport<T = Vec<PredictionResult>> {
    files: Vec<(PathBuf, FileOutcome<T>)>,
}

impl<T> DispatchReport<T> {
    pub fn files(&self) -> &[(PathBuf, FileOutcome<T>)] {
        &self.files
    }

    pub fn get(&self, path: &Path) -> Option<&FileOutcome<T>> {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, outcome)| outcome)
    }

    pub fn successes(&self) -> impl Iterator<Item = (&Path, &T)> {
        self.files.iter().filter_map(|(path, outcome)| match outcome {
            Ok(output) => Some((path.as_path(), output)),
            Err(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &FileProcessingError)> {
        self.files.iter().filter_map(|(path, outcome)| match outcome {
            Ok(_) => None,
            Err(err) => Some((path.as_path(), err)),
        })
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

impl<T> DispatchReport<Vec<T>> {
    /// All items of successful files, file by file.
    pub fn results(&self) -> impl Iterator<Item = &T> {
        self.successes().flat_map(|(_, items)| items.iter())
    }
}

/// Number of workers: the requested count, or the available cores, clamped to
/// `[1, files]`.
pub fn resolve_worker_count(requested: Option<usize>, files: usize) -> usize {
    let cores = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    requested.unwrap_or(cores).clamp(1, files.max(1))
}

/// Classify every file with `predictor`.
pub fn process_files(
    paths: &[PathBuf],
    max_workers: Option<usize>,
    predictor: &Predictor,
) -> Result<DispatchReport, ModelLoadError> {
    let workers = resolve_worker_count(max_workers, paths.len());
    info!(files = paths.len(), workers, "dispatching files");
    process_files_with(paths, workers, |path| predictor.predict_file(path))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `process` over `paths` on `workers` threads.
///
/// A [`FileProcessingError::ModelLoad`] from any file stops the run; every
/// other error is recorded against its file.
pub fn process_files_with<T, F>(
    paths: &[PathBuf],
    workers: usize,
    process: F,
) -> Result<DispatchReport<T>, ModelLoadError>
where
    T: Send,
    F: Fn(&Path) -> FileOutcome<T> + Sync,
{
    let (job_tx, job_rx) = mpsc::channel::<(usize, &Path)>();
    for (index, path) in paths.iter().enumerate() {
        // the receiver lives until the end of this function
        let _ = job_tx.send((index, path.as_path()));
    }
    drop(job_tx);

    let job_rx = Mutex::new(job_rx);
    let (result_tx, result_rx) = mpsc::channel::<(usize, FileOutcome<T>)>();
    let abort = AtomicBool::new(false);
    let fatal: Mutex<Option<ModelLoadError>> = Mutex::new(None);

    thread::scope(|scope| {
        for worker in 0..workers.max(1) {
            let result_tx = result_tx.clone();
            let (job_rx, abort, fatal, process) = (&job_rx, &abort, &fatal, &process);
            scope.spawn(move || loop {
                let job = lock(job_rx).recv();
                let Ok((index, path)) = job else { break };
                if abort.load(Ordering::SeqCst) {
                    break;
                }
                debug!(worker, path = %path.display(), "processing file");
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| process(path)))
                    .unwrap_or_else(|payload| {
                        Err(FileProcessingError::WorkerPanicked(panic_message(payload.as_ref())))
                    });
                match outcome {
                    Err(FileProcessingError::ModelLoad(err)) => {
                        abort.store(true, Ordering::SeqCst);
                        let mut fatal = lock(fatal);
                        if fatal.is_none() {
                            *fatal = Some(err);
                        }
                    }
                    outcome => {
                        if let Err(err) = &outcome {
                            warn!(path = %path.display(), error = %err, "file failed");
                        }
                        if result_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });
    drop(result_tx);

    if let Some(err) = fatal.into_inner().unwrap_or_else(PoisonError::into_inner) {
        let done = result_rx.try_iter().count();
        warn!(
            skipped = paths.len().saturating_sub(done),
            "model failed to load, remaining files skipped"
        );
        return Err(err);
    }

    let mut outcomes: Vec<Option<FileOutcome<T>>> = paths.iter().map(|_| None).collect();
    for (index, outcome) in result_rx {
        outcomes[index] = Some(outcome);
    }
    let files = paths
        .iter()
        .cloned()
        .zip(outcomes)
        .map(|(path, outcome)| {
            let outcome = outcome.unwrap_or_else(|| {
                Err(FileProcessingError::WorkerPanicked("file was never processed".to_string()))
            });
            (path, outcome)
        })
        .collect();
    Ok(DispatchReport { files })
}
