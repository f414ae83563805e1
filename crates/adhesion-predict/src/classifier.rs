//! Logistic regression over embedding vectors.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("failed to read classifier {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid classifier {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("classifier has no coefficients")]
    Empty,
    #[error("classifier threshold {0} is outside [0, 1]")]
    Threshold(f32),
    #[error("embedding has {got} dimensions, classifier expects {expected}")]
    Dimension { expected: usize, got: usize },
}

/// Weights of a trained binary logistic regression.
///
/// Stored as JSON:
///
/// ```json
/// {"embedding_model": "esm2_t6_8M_UR50D", "coefficients": [0.1, ...], "intercept": -0.2, "threshold": 0.5}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Name of the embedding model the classifier was trained on.
    #[serde(default)]
    pub embedding_model: Option<String>,
    pub coefficients: Vec<f32>,
    pub intercept: f32,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

impl LogisticRegression {
    pub fn new(coefficients: Vec<f32>, intercept: f32) -> Result<Self, ClassifierError> {
        let classifier = Self {
            embedding_model: None,
            coefficients,
            intercept,
            threshold: DEFAULT_THRESHOLD,
        };
        classifier.check()?;
        Ok(classifier)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ClassifierError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let classifier: Self = serde_json::from_str(&raw).map_err(|source| ClassifierError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        classifier.check()?;
        Ok(classifier)
    }

    fn check(&self) -> Result<(), ClassifierError> {
        if self.coefficients.is_empty() {
            return Err(ClassifierError::Empty);
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ClassifierError::Threshold(self.threshold));
        }
        Ok(())
    }

    pub fn with_threshold(mut self, threshold: f32) -> Result<Self, ClassifierError> {
        self.threshold = threshold;
        self.check()?;
        Ok(self)
    }

    /// Number of embedding dimensions the classifier expects.
    pub fn dim(&self) -> usize {
        self.coefficients.len()
    }

    pub fn decision_function(&self, embedding: &[f32]) -> Result<f64, ClassifierError> {
        if embedding.len() != self.dim() {
            return Err(ClassifierError::Dimension {
                expected: self.dim(),
                got: embedding.len(),
            });
        }
        let dot: f64 = self
            .coefficients
            .iter()
            .zip(embedding)
            .map(|(&w, &x)| w as f64 * x as f64)
            .sum();
        Ok(dot + self.intercept as f64)
    }

    /// Probability of the positive class.
    pub fn predict(&self, embedding: &[f32]) -> Result<f32, ClassifierError> {
        Ok(sigmoid(self.decision_function(embedding)?) as f32)
    }

    /// Probability of the positive class and the predicted label.
    ///
    /// The label is decided on the unrounded decision value, so a probability
    /// of exactly `threshold` is negative.
    pub fn classify(&self, embedding: &[f32]) -> Result<(f32, bool), ClassifierError> {
        let z = self.decision_function(embedding)?;
        Ok((sigmoid(z) as f32, self.is_positive(z)))
    }

    pub fn is_positive(&self, decision: f64) -> bool {
        decision > logit(self.threshold as f64)
    }
}

// -inf at 0 and +inf at 1.
fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
