//! Multi-label classification metrics with scikit-learn parity.
//!
//! Everything here is pure: given logits and true labels it returns numbers.
//! Rendering lives in [`super::report`].
//!
//! Reference semantics follow scikit-learn 1.4:
//! - `f1_score(average='micro'|'macro'|'weighted')` on an indicator matrix
//! - `multilabel_confusion_matrix`
//! - `roc_curve(drop_intermediate=True)` and `auc`

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};
use crate::utils::math::{ratio_or, sigmoid, trapezoid};

/// Probability cut-off for a positive prediction.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Raw model output for an evaluation set, paired with the truth.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalPrediction {
    /// Logits, shape `(examples, num_labels)`.
    pub logits: Array2<f32>,
    /// Multi-hot truth, same shape as `logits`.
    pub labels: Array2<u8>,
}

impl EvalPrediction {
    pub fn new(logits: Array2<f32>, labels: Array2<u8>) -> Result<Self> {
        if logits.dim() != labels.dim() {
            return Err(ClassifierError::Validation(format!(
                "logits shape {:?} does not match labels shape {:?}",
                logits.dim(),
                labels.dim()
            )));
        }
        Ok(Self { logits, labels })
    }

    pub fn num_examples(&self) -> usize {
        self.labels.nrows()
    }

    pub fn num_labels(&self) -> usize {
        self.labels.ncols()
    }

    /// Element-wise sigmoid of the logits.
    pub fn probabilities(&self) -> Array2<f32> {
        self.logits.mapv(sigmoid)
    }
}

/// Knobs for [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalOptions {
    /// Probability strictly above which a label is predicted present.
    pub threshold: f32,
    /// F1 reported for a label with no positives and no predictions.
    pub zero_division: f64,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            zero_division: 1.0,
        }
    }
}

/// Binarize probabilities: `1` where `p > cutoff`.
///
/// A logit of exactly zero maps to 0.5 and is predicted absent.
pub fn threshold(probabilities: &Array2<f32>, cutoff: f32) -> Array2<u8> {
    probabilities.mapv(|p| u8::from(p > cutoff))
}

/// Per-label 2×2 confusion counts.
///
/// Laid out like scikit-learn's `multilabel_confusion_matrix`:
/// `[[tn, fp], [fn, tp]]`, rows are truth (absent, present).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryConfusion {
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tp: usize,
}

impl BinaryConfusion {
    /// Number of true positives in the truth column.
    pub fn support(&self) -> usize {
        self.tp + self.fn_
    }

    pub fn as_matrix(&self) -> [[usize; 2]; 2] {
        [[self.tn, self.fp], [self.fn_, self.tp]]
    }

    /// `2tp / (2tp + fp + fn)`, or `zero_division` when nothing is positive.
    pub fn f1(&self, zero_division: f64) -> f64 {
        f1_from_counts(self.tp, self.fp, self.fn_, zero_division)
    }
}

fn f1_from_counts(tp: usize, fp: usize, fn_: usize, zero_division: f64) -> f64 {
    let numerator = 2.0 * tp as f64;
    ratio_or(numerator, numerator + fp as f64 + fn_ as f64, zero_division)
}

/// Confusion counts for every label column.
pub fn multilabel_confusion(labels: &Array2<u8>, predictions: &Array2<u8>) -> Vec<BinaryConfusion> {
    labels
        .axis_iter(Axis(1))
        .zip(predictions.axis_iter(Axis(1)))
        .map(|(truth, pred)| {
            let mut cm = BinaryConfusion::default();
            for (&t, &p) in truth.iter().zip(pred.iter()) {
                match (t != 0, p != 0) {
                    (false, false) => cm.tn += 1,
                    (false, true) => cm.fp += 1,
                    (true, false) => cm.fn_ += 1,
                    (true, true) => cm.tp += 1,
                }
            }
            cm
        })
        .collect()
}

/// The three F1 aggregates reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct F1Scores {
    pub f1_micro: f64,
    pub f1_macro: f64,
    pub f1_weighted: f64,
}

impl F1Scores {
    /// Name/value pairs in a stable order, as used for model selection.
    pub fn to_metrics(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("f1_micro", self.f1_micro),
            ("f1_macro", self.f1_macro),
            ("f1_weighted", self.f1_weighted),
        ]
    }
}

/// Micro, macro and support-weighted F1 from per-label confusion counts.
pub fn f1_scores(confusion: &[BinaryConfusion], zero_division: f64) -> F1Scores {
    let (tp, fp, fn_) = confusion.iter().fold((0, 0, 0), |(tp, fp, fn_), cm| {
        (tp + cm.tp, fp + cm.fp, fn_ + cm.fn_)
    });
    let f1_micro = f1_from_counts(tp, fp, fn_, zero_division);

    let per_label: Vec<f64> = confusion.iter().map(|cm| cm.f1(zero_division)).collect();
    let f1_macro = if per_label.is_empty() {
        zero_division
    } else {
        per_label.iter().sum::<f64>() / per_label.len() as f64
    };

    let total_support: usize = confusion.iter().map(BinaryConfusion::support).sum();
    let weighted_sum: f64 = per_label
        .iter()
        .zip(confusion)
        .map(|(f1, cm)| f1 * cm.support() as f64)
        .sum();
    let f1_weighted = ratio_or(weighted_sum, total_support as f64, zero_division);

    F1Scores {
        f1_micro,
        f1_macro,
        f1_weighted,
    }
}

/// One label's receiver-operating-characteristic curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// Decreasing; the first entry is `+inf`.
    pub thresholds: Vec<f64>,
    /// NaN when the label has no positives or no negatives.
    pub auc: f64,
}

impl RocCurve {
    pub fn is_defined(&self) -> bool {
        !self.auc.is_nan()
    }
}

/// ROC curve of `scores` against binary `truth`.
///
/// Points where neither rate changes slope are dropped, and a leading
/// `(0, 0)` point at threshold `+inf` is added. If the truth column has no
/// positives (or no negatives) the corresponding rate is all NaN and so is
/// the AUC.
pub fn roc_curve(truth: ArrayView1<'_, u8>, scores: ArrayView1<'_, f32>) -> RocCurve {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    // Cumulative counts at the last index of every distinct score.
    let mut tps: Vec<f64> = Vec::new();
    let mut fps: Vec<f64> = Vec::new();
    let mut thresholds: Vec<f64> = Vec::new();
    let mut positives = 0usize;
    for (rank, &i) in order.iter().enumerate() {
        positives += usize::from(truth[i] != 0);
        let last_of_run = order
            .get(rank + 1)
            .is_none_or(|&next| scores[next] != scores[i]);
        if last_of_run {
            tps.push(positives as f64);
            fps.push((rank + 1 - positives) as f64);
            thresholds.push(f64::from(scores[i]));
        }
    }

    if tps.len() > 2 {
        let n = tps.len();
        let keep: Vec<bool> = (0..n)
            .map(|k| {
                k == 0
                    || k == n - 1
                    || fps[k + 1] - 2.0 * fps[k] + fps[k - 1] != 0.0
                    || tps[k + 1] - 2.0 * tps[k] + tps[k - 1] != 0.0
            })
            .collect();
        let retain = |v: Vec<f64>| -> Vec<f64> {
            v.into_iter()
                .zip(&keep)
                .filter_map(|(x, &k)| k.then_some(x))
                .collect()
        };
        tps = retain(tps);
        fps = retain(fps);
        thresholds = retain(thresholds);
    }

    tps.insert(0, 0.0);
    fps.insert(0, 0.0);
    thresholds.insert(0, f64::INFINITY);

    let normalize = |counts: &[f64]| -> Vec<f64> {
        let total = counts.last().copied().unwrap_or(0.0);
        if total <= 0.0 {
            vec![f64::NAN; counts.len()]
        } else {
            counts.iter().map(|c| c / total).collect()
        }
    };
    let fpr = normalize(&fps);
    let tpr = normalize(&tps);
    let auc = auc(&fpr, &tpr);

    RocCurve {
        fpr,
        tpr,
        thresholds,
        auc,
    }
}

/// Area under a ROC curve. NaN if any coordinate is NaN or fewer than two
/// points exist.
pub fn auc(fpr: &[f64], tpr: &[f64]) -> f64 {
    if fpr.len() < 2 || fpr.len() != tpr.len() {
        return f64::NAN;
    }
    trapezoid(fpr, tpr)
}

/// Everything computed for one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub scores: F1Scores,
    pub confusion: Vec<BinaryConfusion>,
    pub roc: Vec<RocCurve>,
}

impl EvaluationReport {
    /// Labels whose ROC is undefined for this evaluation set.
    pub fn undefined_roc_labels(&self) -> Vec<usize> {
        self.roc
            .iter()
            .enumerate()
            .filter_map(|(i, r)| (!r.is_defined()).then_some(i))
            .collect()
    }
}

/// Sigmoid, threshold, then F1, confusion matrices and ROC per label.
pub fn evaluate(prediction: &EvalPrediction, options: &EvalOptions) -> EvaluationReport {
    let probabilities = prediction.probabilities();
    let predicted = threshold(&probabilities, options.threshold);
    let confusion = multilabel_confusion(&prediction.labels, &predicted);
    let scores = f1_scores(&confusion, options.zero_division);
    let roc = prediction
        .labels
        .axis_iter(Axis(1))
        .zip(probabilities.axis_iter(Axis(1)))
        .map(|(truth, scores)| roc_curve(truth, scores))
        .collect();

    EvaluationReport {
        scores,
        confusion,
        roc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};
    use pretty_assertions::assert_eq;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_perfect_single_example() {
        let prediction = EvalPrediction::new(array![[10.0f32, -10.0]], array![[1u8, 0]]).unwrap();
        let report = evaluate(&prediction, &EvalOptions::default());
        assert_eq!(report.scores.f1_micro, 1.0);
        assert_eq!(report.scores.f1_macro, 1.0);
        assert_eq!(report.scores.f1_weighted, 1.0);
        assert_eq!(
            report.confusion,
            vec![
                BinaryConfusion { tn: 0, fp: 0, fn_: 0, tp: 1 },
                BinaryConfusion { tn: 1, fp: 0, fn_: 0, tp: 0 },
            ]
        );
    }

    #[test]
    fn test_zero_division_zero_matches_sklearn_default() {
        let prediction = EvalPrediction::new(array![[10.0f32, -10.0]], array![[1u8, 0]]).unwrap();
        let options = EvalOptions {
            zero_division: 0.0,
            ..EvalOptions::default()
        };
        let scores = evaluate(&prediction, &options).scores;
        assert_eq!(scores.f1_micro, 1.0);
        assert_eq!(scores.f1_macro, 0.5);
        assert_eq!(scores.f1_weighted, 1.0);
    }

    #[test]
    fn test_all_zero_column_gives_nan_auc_only_there() {
        let logits = array![[2.0f32, 0.3], [-1.0, -0.2], [0.5, 1.5], [-3.0, 0.1]];
        let labels = array![[1u8, 0], [0, 0], [1, 0], [0, 0]];
        let report = evaluate(&EvalPrediction::new(logits, labels).unwrap(), &EvalOptions::default());

        assert!(report.roc[1].auc.is_nan());
        assert!(report.roc[1].tpr.iter().all(|v| v.is_nan()));
        assert_eq!(report.roc[0].auc, 1.0);
        assert_eq!(report.undefined_roc_labels(), vec![1]);
        assert_eq!(report.confusion[0], BinaryConfusion { tn: 2, fp: 0, fn_: 0, tp: 2 });
        assert!(report.scores.f1_micro.is_finite());
    }

    #[test]
    fn test_all_positive_column_gives_nan_auc() {
        let truth = Array1::from(vec![1u8, 1, 1]);
        let scores = Array1::from(vec![0.2f32, 0.6, 0.9]);
        let roc = roc_curve(truth.view(), scores.view());
        assert!(roc.auc.is_nan());
        assert!(roc.fpr.iter().all(|v| v.is_nan()));
        assert!(roc.tpr.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = EvalPrediction::new(array![[0.0f32, 1.0]], array![[1u8]]);
        assert!(matches!(err, Err(ClassifierError::Validation(_))));
    }

    #[test]
    fn test_threshold_is_strict() {
        let p = array![[0.5f32, 0.49, 0.51]];
        assert_eq!(threshold(&p, 0.5), array![[0u8, 0, 1]]);
    }

    #[test]
    fn test_zero_logit_is_true_negative() {
        let prediction = EvalPrediction::new(array![[0.0f32]], array![[0u8]]).unwrap();
        let report = evaluate(&prediction, &EvalOptions::default());
        assert_eq!(report.confusion[0], BinaryConfusion { tn: 1, fp: 0, fn_: 0, tp: 0 });
    }

    #[test]
    fn test_confusion_layout() {
        let cm = BinaryConfusion { tn: 4, fp: 3, fn_: 2, tp: 1 };
        assert_eq!(cm.as_matrix(), [[4, 3], [2, 1]]);
        assert_eq!(cm.support(), 3);
    }

    #[test]
    fn test_confusion_serializes_fn_field() {
        let cm = BinaryConfusion { tn: 1, fp: 2, fn_: 3, tp: 4 };
        let json = serde_json::to_value(cm).unwrap();
        assert_eq!(json["fn"], 3);
    }

    #[test]
    fn test_empty_evaluation_set() {
        let prediction =
            EvalPrediction::new(Array2::zeros((0, 3)), Array2::zeros((0, 3))).unwrap();
        let report = evaluate(&prediction, &EvalOptions::default());
        assert_eq!(report.confusion.len(), 3);
        assert!(report.roc.iter().all(|r| r.auc.is_nan()));
        assert_eq!(report.scores.f1_micro, 1.0);
    }

    mod sklearn_parity {
        use super::*;
        use pretty_assertions::assert_eq;

        // y_true = [[1,0,1],[0,1,1],[1,1,0],[0,0,1]]
        // y_pred = [[1,0,0],[0,1,1],[0,1,0],[1,0,1]]
        fn fixture() -> Vec<BinaryConfusion> {
            let truth = array![[1u8, 0, 1], [0, 1, 1], [1, 1, 0], [0, 0, 1]];
            let pred = array![[1u8, 0, 0], [0, 1, 1], [0, 1, 0], [1, 0, 1]];
            multilabel_confusion(&truth, &pred)
        }

        #[test]
        fn test_f1_micro() {
            // tp=5, fp=1, fn=2
            // sklearn: f1_score(..., average='micro') = 0.7692307692307693
            let scores = f1_scores(&fixture(), 0.0);
            assert!(close(scores.f1_micro, 0.7692307692307693), "{}", scores.f1_micro);
        }

        #[test]
        fn test_f1_macro() {
            // per label: [0.5, 1.0, 0.8]
            // sklearn: f1_score(..., average='macro') = 0.7666666666666666
            let scores = f1_scores(&fixture(), 0.0);
            assert!(close(scores.f1_macro, 0.7666666666666666), "{}", scores.f1_macro);
        }

        #[test]
        fn test_f1_weighted() {
            // supports [2, 2, 3]: (0.5*2 + 1.0*2 + 0.8*3) / 7
            // sklearn: f1_score(..., average='weighted') = 0.7714285714285715
            let scores = f1_scores(&fixture(), 0.0);
            assert!(close(scores.f1_weighted, 0.7714285714285715), "{}", scores.f1_weighted);
        }

        #[test]
        fn test_roc_curve_docs_example() {
            // sklearn docs: y = [1, 1, 2, 2], scores = [0.1, 0.4, 0.35, 0.8], pos_label=2
            let truth = Array1::from(vec![0u8, 0, 1, 1]);
            let scores = Array1::from(vec![0.1f32, 0.4, 0.35, 0.8]);
            let roc = roc_curve(truth.view(), scores.view());
            assert_eq!(roc.fpr, vec![0.0, 0.0, 0.5, 0.5, 1.0]);
            assert_eq!(roc.tpr, vec![0.0, 0.5, 0.5, 1.0, 1.0]);
            assert_eq!(roc.thresholds[0], f64::INFINITY);
            assert!((roc.thresholds[1] - 0.8).abs() < 1e-6);
            assert!((roc.thresholds[4] - 0.1).abs() < 1e-6);
            assert!(close(roc.auc, 0.75));
        }

        #[test]
        fn test_roc_drops_collinear_points() {
            // sklearn: roc_curve([1,1,0,0], [0.9,0.8,0.7,0.6])
            //   fpr = [0, 0, 0, 1], tpr = [0, 0.5, 1, 1]
            let truth = Array1::from(vec![1u8, 1, 0, 0]);
            let scores = Array1::from(vec![0.9f32, 0.8, 0.7, 0.6]);
            let roc = roc_curve(truth.view(), scores.view());
            assert_eq!(roc.fpr, vec![0.0, 0.0, 0.0, 1.0]);
            assert_eq!(roc.tpr, vec![0.0, 0.5, 1.0, 1.0]);
            assert_eq!(roc.thresholds.len(), 4);
            assert!((roc.thresholds[3] - 0.6).abs() < 1e-6);
            assert!(close(roc.auc, 1.0));
        }

        #[test]
        fn test_roc_ties_collapse() {
            // sklearn: roc_auc_score([1, 0], [0.5, 0.5]) = 0.5
            let truth = Array1::from(vec![1u8, 0]);
            let scores = Array1::from(vec![0.5f32, 0.5]);
            let roc = roc_curve(truth.view(), scores.view());
            assert_eq!(roc.fpr, vec![0.0, 1.0]);
            assert_eq!(roc.tpr, vec![0.0, 1.0]);
            assert!(close(roc.auc, 0.5));
        }
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_scores_bounded(
                rows in proptest::collection::vec((any::<bool>(), any::<bool>(), -5.0f32..5.0, -5.0f32..5.0), 1..30)
            ) {
                let n = rows.len();
                let labels = Array2::from_shape_fn((n, 2), |(i, j)| u8::from(if j == 0 { rows[i].0 } else { rows[i].1 }));
                let logits = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { rows[i].2 } else { rows[i].3 });
                let report = evaluate(&EvalPrediction::new(logits, labels).unwrap(), &EvalOptions::default());
                for (_, v) in report.scores.to_metrics() {
                    prop_assert!((0.0..=1.0).contains(&v));
                }
                for (cm, roc) in report.confusion.iter().zip(&report.roc) {
                    prop_assert_eq!(cm.tn + cm.fp + cm.fn_ + cm.tp, n);
                    prop_assert!(roc.auc.is_nan() || (-1e-9..=1.0 + 1e-9).contains(&roc.auc));
                    prop_assert!(roc.thresholds.windows(2).all(|w| w[0] > w[1]));
                }
            }
        }
    }
}
