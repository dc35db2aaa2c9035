//! CSV record loading.
//!
//! Input rows are `id, title, abstract, label_1 .. label_k` with a mandatory
//! header row. The label count is inferred from the header width.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::error::{ClassifierError, Result};

/// Number of leading non-label columns (`id`, `title`, `abstract`).
pub const FIXED_COLUMNS: usize = 3;

/// One labeled example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: i64,
    /// Title and abstract joined into a single prompt.
    pub text: String,
    /// Multi-hot label vector, one entry per label column.
    pub labels: Vec<u8>,
}

/// All records read from a file plus the label names taken from its header.
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    pub label_names: Vec<String>,
    pub records: Vec<Record>,
}

impl LabeledDataset {
    pub fn num_labels(&self) -> usize {
        self.label_names.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Shuffle records in place with the given generator.
    pub fn shuffle(&mut self, rng: &mut StdRng) {
        self.records.shuffle(rng);
    }
}

/// Build the model prompt from a title and abstract.
pub fn format_text(title: &str, abstract_text: &str) -> String {
    format!(
        "Title: {}\n\nAbstract: {}",
        title.trim(),
        abstract_text.trim()
    )
}

/// Stack the label vectors of `records` into an `(n, num_labels)` matrix.
pub fn label_matrix(records: &[Record], num_labels: usize) -> Result<Array2<u8>> {
    let mut flat = Vec::with_capacity(records.len() * num_labels);
    for record in records {
        if record.labels.len() != num_labels {
            return Err(ClassifierError::Validation(format!(
                "record {} has {} labels, expected {}",
                record.id,
                record.labels.len(),
                num_labels
            )));
        }
        flat.extend_from_slice(&record.labels);
    }
    Array2::from_shape_vec((records.len(), num_labels), flat)
        .map_err(|e| ClassifierError::Validation(format!("label matrix shape: {}", e)))
}

/// Load records from a CSV file on disk.
pub fn load_records(path: &Path) -> Result<LabeledDataset> {
    let file = File::open(path)?;
    let dataset = read_records(file)?;
    tracing::info!(
        "Loaded {} records with {} labels from {}",
        dataset.len(),
        dataset.num_labels(),
        path.display()
    );
    Ok(dataset)
}

/// Parse records from any CSV source.
pub fn read_records<R: Read>(reader: R) -> Result<LabeledDataset> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);

    let header = rdr.headers()?.clone();
    if header.len() <= FIXED_COLUMNS {
        return Err(ClassifierError::MalformedRecord {
            line: 1,
            reason: format!(
                "header has {} columns; expected id, title, abstract and at least one label",
                header.len()
            ),
        });
    }
    let label_names: Vec<String> = header
        .iter()
        .skip(FIXED_COLUMNS)
        .map(|name| name.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        records.push(parse_row(&row, line, label_names.len())?);
    }

    Ok(LabeledDataset {
        label_names,
        records,
    })
}

fn parse_row(row: &csv::StringRecord, line: u64, num_labels: usize) -> Result<Record> {
    if row.len() != FIXED_COLUMNS + num_labels {
        return Err(ClassifierError::MalformedRecord {
            line,
            reason: format!(
                "expected {} columns, found {}",
                FIXED_COLUMNS + num_labels,
                row.len()
            ),
        });
    }

    let id = row[0]
        .trim()
        .parse::<i64>()
        .map_err(|_| ClassifierError::MalformedRecord {
            line,
            reason: format!("id '{}' is not an integer", &row[0]),
        })?;

    let labels = row
        .iter()
        .skip(FIXED_COLUMNS)
        .enumerate()
        .map(|(idx, cell)| match cell.trim().parse::<i64>() {
            Ok(0) => Ok(0u8),
            Ok(1) => Ok(1u8),
            _ => Err(ClassifierError::MalformedRecord {
                line,
                reason: format!("label {} has non-binary value '{}'", idx, cell),
            }),
        })
        .collect::<Result<Vec<u8>>>()?;

    Ok(Record {
        id,
        text: format_text(&row[1], &row[2]),
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const SAMPLE: &str = "\
id,title,abstract,physics,biology
1, Dark matter ,Halo profiles.,1,0
2,Cell walls,  Plant membranes. ,0,1
";

    #[test]
    fn test_read_records_parses_rows_and_header() {
        let ds = read_records(SAMPLE.as_bytes()).unwrap();
        assert_eq!(ds.label_names, vec!["physics", "biology"]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.records[0].id, 1);
        assert_eq!(
            ds.records[0].text,
            "Title: Dark matter\n\nAbstract: Halo profiles."
        );
        assert_eq!(ds.records[1].labels, vec![0, 1]);
    }

    #[test]
    fn test_non_binary_label_is_malformed() {
        let csv = "id,title,abstract,a\n7,t,a,2\n";
        let err = read_records(csv.as_bytes()).unwrap_err();
        match err {
            ClassifierError::MalformedRecord { line, reason } => {
                assert_eq!(line, 2);
                assert!(reason.contains("non-binary"), "got: {reason}");
            }
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_non_integer_label_is_malformed() {
        let csv = "id,title,abstract,a\n7,t,a,yes\n";
        assert!(matches!(
            read_records(csv.as_bytes()),
            Err(ClassifierError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_width_mismatch_is_malformed() {
        let csv = "id,title,abstract,a,b\n7,t,a,1\n";
        assert!(matches!(
            read_records(csv.as_bytes()),
            Err(ClassifierError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_header_without_labels_is_malformed() {
        let csv = "id,title,abstract\n1,t,a\n";
        assert!(matches!(
            read_records(csv.as_bytes()),
            Err(ClassifierError::MalformedRecord { line: 1, .. })
        ));
    }

    #[test]
    fn test_bad_id_is_malformed() {
        let csv = "id,title,abstract,a\nx1,t,a,1\n";
        assert!(matches!(
            read_records(csv.as_bytes()),
            Err(ClassifierError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let csv: String = std::iter::once("id,title,abstract,a\n".to_string())
            .chain((0..20).map(|i| format!("{i},t{i},a{i},{}\n", i % 2)))
            .collect();
        let mut a = read_records(csv.as_bytes()).unwrap();
        let mut b = read_records(csv.as_bytes()).unwrap();
        a.shuffle(&mut StdRng::seed_from_u64(0));
        b.shuffle(&mut StdRng::seed_from_u64(0));
        assert_eq!(a.records, b.records);
    }

    #[test]
    fn test_label_matrix_shape() {
        let ds = read_records(SAMPLE.as_bytes()).unwrap();
        let m = label_matrix(&ds.records, 2).unwrap();
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m[[0, 0]], 1);
        assert_eq!(m[[1, 1]], 1);
    }
}
