use ckd_shared::Label;

/// Binary classification scores with CKD as the positive class. Undefined
/// ratios (no positive predictions or no positive samples) score zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl ClassificationMetrics {
    pub fn compute(actual: &[Label], predicted: &[Label]) -> Self {
        let (mut tp, mut fp, mut fn_, mut correct) = (0, 0, 0, 0);
        for (a, p) in actual.iter().zip(predicted) {
            if a == p {
                correct += 1;
            }
            match (a, p) {
                (Label::Ckd, Label::Ckd) => tp += 1,
                (Label::NotCkd, Label::Ckd) => fp += 1,
                (Label::Ckd, Label::NotCkd) => fn_ += 1,
                (Label::NotCkd, Label::NotCkd) => {}
            }
        }
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            accuracy: ratio(correct, actual.len().min(predicted.len())),
            precision,
            recall,
            f1_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Label::{Ckd, NotCkd};

    #[test]
    fn scores_a_mixed_prediction() {
        let actual = [Ckd, Ckd, Ckd, NotCkd, NotCkd];
        let predicted = [Ckd, Ckd, NotCkd, Ckd, NotCkd];
        let m = ClassificationMetrics::compute(&actual, &predicted);
        assert!((m.accuracy - 0.6).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.f1_score - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn no_positive_predictions_score_zero() {
        let m = ClassificationMetrics::compute(&[Ckd, NotCkd], &[NotCkd, NotCkd]);
        assert_eq!((m.precision, m.recall, m.f1_score), (0.0, 0.0, 0.0));
        assert_eq!(m.accuracy, 0.5);
        assert_eq!(ClassificationMetrics::compute(&[], &[]).accuracy, 0.0);
    }
}
