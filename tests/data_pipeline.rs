//! Integration tests for loading, splitting and weighting CSV data.

mod common;

use common::{CsvBuilder, TestHarness, WhitespaceTokenizer};
use multilabel_lora::collate::BatchCollator;
use multilabel_lora::data::{self, label_matrix, LabelWeights, WeightSource};
use multilabel_lora::pipeline::split_dataset;
use multilabel_lora::tokenize::{tokenize_records, TokenizationPolicy};
use multilabel_lora::ClassifierError;
use pretty_assertions::assert_eq;

fn four_record_csv() -> String {
    CsvBuilder::new(&["a", "b"])
        .row(1, "First", "alpha beta", &[1, 0])
        .row(2, "Second", "gamma delta", &[0, 1])
        .row(3, "Third", "alpha gamma", &[1, 1])
        .row(4, "Fourth", "nothing here", &[0, 0])
        .build()
}

#[test]
fn test_four_records_split_three_to_one() {
    let harness = TestHarness::new();
    let path = harness.write("four.csv", &four_record_csv());

    let mut config = harness.tiny_config(&path);
    config.data.validation_fraction = 0.25;
    config.data.weights_from = WeightSource::Full;
    let (split, summary, full_weights) = split_dataset(&config).unwrap();

    assert_eq!(split.train.len(), 3);
    assert_eq!(split.validation.len(), 1);
    assert_eq!(summary.label_names, vec!["a", "b"]);
    assert_eq!(full_weights.unwrap().as_slice(), &[0.5, 0.5]);
}

#[test]
fn test_train_weights_are_not_computed_up_front() {
    let harness = TestHarness::new();
    let path = harness.write("four.csv", &four_record_csv());
    let config = harness.tiny_config(&path);

    let (split, _, full_weights) = split_dataset(&config).unwrap();
    assert!(full_weights.is_none());
    let weights = LabelWeights::from_records(&split.train, 2).unwrap();
    assert_eq!(weights.len(), 2);
    assert!(weights.as_slice().iter().all(|w| (0.0..=1.0).contains(w)));
}

#[test]
fn test_split_is_reproducible_for_a_seed() {
    let harness = TestHarness::new();
    let path = harness.write("topics.csv", &CsvBuilder::topics(40).build());

    let ids = |seed: u64| {
        let (_, split) = data::load_and_split(&path, 0.2, seed).unwrap();
        (
            split.train.iter().map(|r| r.id).collect::<Vec<_>>(),
            split.validation.iter().map(|r| r.id).collect::<Vec<_>>(),
        )
    };

    assert_eq!(ids(7), ids(7));
    let (train, validation) = ids(7);
    assert_eq!(train.len() + validation.len(), 40);
    assert!(validation.iter().all(|id| !train.contains(id)));
}

#[test]
fn test_split_summary_counts_positives() {
    let harness = TestHarness::new();
    let path = harness.write("topics.csv", &CsvBuilder::topics(30).build());
    let config = harness.tiny_config(&path);

    let (split, summary, _) = split_dataset(&config).unwrap();
    let all = [split.train.clone(), split.validation.clone()].concat();
    let matrix = label_matrix(&all, 3).unwrap();
    for j in 0..3 {
        let column: usize = matrix.column(j).iter().map(|&v| v as usize).sum();
        assert_eq!(summary.train_positives[j] + summary.validation_positives[j], column);
    }
}

#[test]
fn test_malformed_row_reports_line() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new(&["a", "b"])
        .row(1, "Ok", "fine", &[1, 0])
        .raw("2,Broken,row,1")
        .build();
    let path = harness.write("bad.csv", &csv);

    let err = data::load_records(&path).unwrap_err();
    assert!(matches!(err, ClassifierError::MalformedRecord { .. }), "{err}");
}

#[test]
fn test_non_binary_label_rejected() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new(&["a"]).raw("1,t,a,3").build();
    let path = harness.write("bad.csv", &csv);
    assert!(matches!(
        data::load_records(&path),
        Err(ClassifierError::MalformedRecord { .. })
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let harness = TestHarness::new();
    let err = data::load_records(&harness.path().join("absent.csv")).unwrap_err();
    assert!(matches!(err, ClassifierError::Io(_)));
}

#[test]
fn test_tokenize_and_collate_from_csv() {
    let harness = TestHarness::new();
    let csv = CsvBuilder::new(&["a", "b"])
        .row(1, "Short", "one", &[1, 0])
        .row(2, "Longer title", "with a few more words", &[0, 1])
        .build();
    let path = harness.write("two.csv", &csv);
    let dataset = data::load_records(&path).unwrap();

    let examples =
        tokenize_records(&dataset.records, &WhitespaceTokenizer, TokenizationPolicy::Abort)
            .unwrap();
    let batch = BatchCollator::new(0).collate_slice(&examples).unwrap();

    let longest = examples.iter().map(|e| e.len()).max().unwrap();
    let shortest = examples[0].len();
    assert_eq!(batch.input_ids.len(), 2);
    assert!(batch.input_ids.iter().all(|row| row.len() == longest));
    assert!(batch.input_ids[0][shortest..].iter().all(|&id| id == 0));
    assert!(batch.attention_mask[0][shortest..].iter().all(|&m| m == 0));
    assert_eq!(batch.labels, vec![vec![1, 0], vec![0, 1]]);
}
