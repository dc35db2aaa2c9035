//! Evaluation: pure metrics plus renderers for their output.

pub mod metrics;
pub mod plot;
pub mod report;

pub use metrics::{
    auc, evaluate, f1_scores, multilabel_confusion, roc_curve, threshold, BinaryConfusion,
    EvalOptions, EvalPrediction, EvaluationReport, F1Scores, RocCurve, DEFAULT_THRESHOLD,
};
pub use plot::{PlotRenderer, ROC_CHART_FILE};
pub use report::{CsvReportWriter, ReportRenderer, TerminalRenderer};
