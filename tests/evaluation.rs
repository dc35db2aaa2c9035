//! Integration tests for metric computation and report artifacts.

mod common;

use common::TestHarness;
use multilabel_lora::eval::{
    evaluate, CsvReportWriter, EvalOptions, EvalPrediction, PlotRenderer, ReportRenderer,
    ROC_CHART_FILE,
};
use multilabel_lora::train::{EvalCallback, F1Callback};
use ndarray::array;
use pretty_assertions::assert_eq;

#[test]
fn test_confident_correct_prediction_scores_one() {
    let prediction = EvalPrediction::new(array![[10.0f32, -10.0]], array![[1u8, 0]]).unwrap();
    let metrics = F1Callback::default().on_evaluate(1, &prediction).unwrap();

    assert_eq!(metrics["f1_micro"], 1.0);
    assert_eq!(metrics["f1_macro"], 1.0);
    assert_eq!(metrics["f1_weighted"], 1.0);
}

#[test]
fn test_absent_label_has_nan_auc_and_null_in_json() {
    let harness = TestHarness::new();
    let logits = array![[3.0f32, -1.0], [-2.0, 0.5], [1.5, -3.0], [-1.0, 2.0]];
    let labels = array![[1u8, 0], [0, 0], [1, 0], [0, 0]];
    let report = evaluate(
        &EvalPrediction::new(logits, labels).unwrap(),
        &EvalOptions::default(),
    );

    assert_eq!(report.roc[0].auc, 1.0);
    assert!(report.roc[1].auc.is_nan());
    assert_eq!(report.undefined_roc_labels(), vec![1]);
    assert_eq!(report.confusion[1].fp, 2);

    let out = harness.path().join("reports");
    let names = vec!["present".to_string(), "absent".to_string()];
    CsvReportWriter::new(&out).render(&report, &names).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("metrics.json")).unwrap()).unwrap();
    assert_eq!(json["labels"], serde_json::json!(["present", "absent"]));
    assert_eq!(json["auc"][0], serde_json::json!(1.0));
    assert!(json["auc"][1].is_null());

    let confusion = std::fs::read_to_string(out.join("confusion.csv")).unwrap();
    let lines: Vec<&str> = confusion.lines().collect();
    assert_eq!(lines[0], "label,tn,fp,fn,tp");
    assert_eq!(lines[1], "present,2,0,0,2");
    assert_eq!(lines[2], "absent,2,2,0,0");
}

#[test]
fn test_plot_renderer_writes_roc_and_confusion_images() {
    let harness = TestHarness::new();
    let logits = array![[3.0f32, -1.0], [-2.0, 0.5], [1.5, -3.0], [-1.0, 2.0]];
    let labels = array![[1u8, 0], [0, 0], [1, 0], [0, 0]];
    let report = evaluate(
        &EvalPrediction::new(logits, labels).unwrap(),
        &EvalOptions::default(),
    );

    let out = harness.path().join("charts");
    let names = vec!["present".to_string(), "absent".to_string()];
    PlotRenderer::new(&out).render(&report, &names).unwrap();

    let roc = std::fs::read_to_string(out.join(ROC_CHART_FILE)).unwrap();
    assert!(roc.starts_with("<svg"));
    assert!(roc.contains("present (AUC = 1.00)"));
    assert!(roc.contains("absent (AUC = NaN)"));
    for (i, name) in names.iter().enumerate() {
        let confusion = std::fs::read_to_string(out.join(format!("confusion_{i}.svg"))).unwrap();
        assert!(confusion.contains(name.as_str()));
    }
}

#[test]
fn test_threshold_option_changes_predictions() {
    let prediction = EvalPrediction::new(array![[0.5f32], [-0.5]], array![[1u8], [0]]).unwrap();

    let default = evaluate(&prediction, &EvalOptions::default());
    assert_eq!(default.confusion[0].tp, 1);
    assert_eq!(default.confusion[0].fp, 0);

    let strict = evaluate(
        &prediction,
        &EvalOptions {
            threshold: 0.9,
            ..EvalOptions::default()
        },
    );
    assert_eq!(strict.confusion[0].tp, 0);
    assert_eq!(strict.confusion[0].fn_, 1);
}

#[test]
fn test_probability_equal_to_threshold_is_absent() {
    // sigmoid(0) == 0.5 exactly.
    let prediction = EvalPrediction::new(array![[0.0f32], [0.0]], array![[0u8], [1]]).unwrap();
    let report = evaluate(&prediction, &EvalOptions::default());
    assert_eq!(report.confusion[0].tn, 1);
    assert_eq!(report.confusion[0].fn_, 1);
    assert_eq!(report.confusion[0].tp + report.confusion[0].fp, 0);
}

#[test]
fn test_shape_mismatch_rejected() {
    assert!(EvalPrediction::new(array![[1.0f32, 2.0]], array![[1u8]]).is_err());
}
