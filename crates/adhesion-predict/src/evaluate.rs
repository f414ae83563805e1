//! Classifier performance on sequences of known class.
//!
//! Scores the predictions for a positive (adhesin) set and a negative set
//! with a confusion matrix, per-class precision, recall and F1, accuracy and
//! the area under the ROC curve.
use crate::report::{PredictionResult, ADHESION_LABEL, NON_ADHESION_LABEL};
use itertools::Itertools;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
}

impl ConfusionMatrix {
    pub fn add(&mut self, actual: bool, predicted: bool) {
        match (actual, predicted) {
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_positives += 1,
            (true, false) => self.false_negatives += 1,
            (true, true) => self.true_positives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_negatives + self.true_positives, self.total())
    }

    pub fn positive_class(&self) -> ClassMetrics {
        ClassMetrics::new(
            self.true_positives,
            self.true_positives + self.false_positives,
            self.true_positives + self.false_negatives,
        )
    }

    pub fn negative_class(&self) -> ClassMetrics {
        ClassMetrics::new(
            self.true_negatives,
            self.true_negatives + self.false_negatives,
            self.true_negatives + self.false_positives,
        )
    }
}

/// Precision, recall and F1 of one class. Undefined ratios are 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of sequences that belong to the class.
    pub support: usize,
}

impl ClassMetrics {
    fn new(hits: usize, predicted: usize, actual: usize) -> Self {
        let precision = ratio(hits, predicted);
        let recall = ratio(hits, actual);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support: actual,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Area under the ROC curve, from the rank sum of the positive scores.
///
/// Tied scores share their mean rank. `None` unless both classes are present.
pub fn roc_auc(positive_scores: &[f32], negative_scores: &[f32]) -> Option<f64> {
    if positive_scores.is_empty() || negative_scores.is_empty() {
        return None;
    }
    let mut scored: Vec<(f32, bool)> = positive_scores
        .iter()
        .map(|&s| (s, true))
        .chain(negative_scores.iter().map(|&s| (s, false)))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut ranked = 0usize;
    let mut positive_rank_sum = 0.0;
    for (_, tie) in &scored.iter().chunk_by(|(score, _)| score.to_bits()) {
        let (len, positives) = tie.fold((0usize, 0usize), |(len, positives), &(_, positive)| {
            (len + 1, positives + usize::from(positive))
        });
        let mean_rank = ranked as f64 + (len as f64 + 1.0) / 2.0;
        positive_rank_sum += mean_rank * positives as f64;
        ranked += len;
    }

    let p = positive_scores.len() as f64;
    let n = negative_scores.len() as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub confusion: ConfusionMatrix,
    pub roc_auc: Option<f64>,
}

impl Evaluation {
    pub fn new<'a, P, N>(positives: P, negatives: N) -> Self
    where
        P: IntoIterator<Item = &'a PredictionResult>,
        N: IntoIterator<Item = &'a PredictionResult>,
    {
        let mut confusion = ConfusionMatrix::default();
        let mut positive_scores = Vec::new();
        let mut negative_scores = Vec::new();
        for result in positives {
            confusion.add(true, result.label);
            positive_scores.push(result.score);
        }
        for result in negatives {
            confusion.add(false, result.label);
            negative_scores.push(result.score);
        }
        Self {
            confusion,
            roc_auc: roc_auc(&positive_scores, &negative_scores),
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cm = &self.confusion;
        writeln!(f, "Confusion matrix:")?;
        writeln!(f, "  TN: {:4}  FP: {:4}", cm.true_negatives, cm.false_positives)?;
        writeln!(f, "  FN: {:4}  TP: {:4}", cm.false_negatives, cm.true_positives)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for (name, metrics) in [
            (NON_ADHESION_LABEL, cm.negative_class()),
            (ADHESION_LABEL, cm.positive_class()),
        ] {
            writeln!(
                f,
                "{:>14} {:>10.3} {:>10.3} {:>10.3} {:>10}",
                name, metrics.precision, metrics.recall, metrics.f1, metrics.support
            )?;
        }
        writeln!(f)?;
        match self.roc_auc {
            Some(auc) => writeln!(f, "ROC-AUC: {auc:.3}")?,
            None => writeln!(f, "ROC-AUC: undefined, both classes are needed")?,
        }
        write!(f, "Accuracy: {:.3}", cm.accuracy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: f32) -> PredictionResult {
        PredictionResult {
            id: format!("p{score}"),
            score,
            label: score > 0.5,
        }
    }

    #[test]
    fn test_confusion_and_class_metrics() {
        let positives: Vec<_> = [0.9, 0.8, 0.7, 0.2].into_iter().map(result).collect();
        let negatives: Vec<_> = [0.1, 0.3, 0.6].into_iter().map(result).collect();
        let evaluation = Evaluation::new(&positives, &negatives);
        let cm = evaluation.confusion;
        assert_eq!(
            cm,
            ConfusionMatrix {
                true_negatives: 2,
                false_positives: 1,
                false_negatives: 1,
                true_positives: 3,
            }
        );
        assert_eq!(cm.total(), 7);
        assert!((cm.accuracy() - 5.0 / 7.0).abs() < 1e-12);

        let adhesion = cm.positive_class();
        assert!((adhesion.precision - 0.75).abs() < 1e-12);
        assert!((adhesion.recall - 0.75).abs() < 1e-12);
        assert!((adhesion.f1 - 0.75).abs() < 1e-12);
        assert_eq!(adhesion.support, 4);

        let other = cm.negative_class();
        assert!((other.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((other.recall - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(other.support, 3);
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&[0.9, 0.8], &[0.1, 0.2]), Some(1.0));
        assert_eq!(roc_auc(&[0.1, 0.2], &[0.9, 0.8]), Some(0.0));
        // all tied
        assert_eq!(roc_auc(&[0.5, 0.5], &[0.5]), Some(0.5));
        // 10 of 12 pairs ordered correctly
        let auc = roc_auc(&[0.9, 0.8, 0.7, 0.2], &[0.1, 0.3, 0.6]).unwrap();
        assert!((auc - 10.0 / 12.0).abs() < 1e-12);
        // one tie among four pairs counts half
        let auc = roc_auc(&[0.4, 0.9], &[0.4, 0.1]).unwrap();
        assert!((auc - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_single_class() {
        let positives: Vec<_> = [0.9, 0.2].into_iter().map(result).collect();
        let negatives: Vec<PredictionResult> = Vec::new();
        let evaluation = Evaluation::new(&positives, &negatives);
        assert_eq!(evaluation.roc_auc, None);
        assert_eq!(evaluation.confusion.negative_class().precision, 0.0);
        assert!(evaluation.to_string().contains("ROC-AUC: undefined"));
    }

    #[test]
    fn test_report_text() {
        let positives = vec![result(0.9)];
        let negatives = vec![result(0.1)];
        let text = Evaluation::new(&positives, &negatives).to_string();
        assert!(text.contains("TN:    1  FP:    0"));
        assert!(text.contains("FN:    0  TP:    1"));
        assert!(text.contains("Non-adhesion"));
        assert!(text.contains("ROC-AUC: 1.000"));
        assert!(text.ends_with("Accuracy: 1.000"));
    }
}
