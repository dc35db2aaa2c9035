//! Builders for labeled CSV fixtures.

/// Builder for `id,title,abstract,label_1..label_k` CSV text.
pub struct CsvBuilder {
    labels: Vec<String>,
    rows: Vec<String>,
}

impl CsvBuilder {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row. Title and abstract are quoted so they may contain commas.
    pub fn row(mut self, id: i64, title: &str, abstract_text: &str, labels: &[u8]) -> Self {
        let cells: Vec<String> = labels.iter().map(u8::to_string).collect();
        self.rows.push(format!(
            "{},\"{}\",\"{}\",{}",
            id,
            title.replace('"', "\"\""),
            abstract_text.replace('"', "\"\""),
            cells.join(",")
        ));
        self
    }

    /// Add a raw, possibly malformed, line.
    pub fn raw(mut self, line: &str) -> Self {
        self.rows.push(line.to_string());
        self
    }

    /// A topic-separable corpus: each label has its own vocabulary.
    pub fn topics(n: usize) -> Self {
        let vocab = [
            ["quantum", "photon", "entanglement"],
            ["neural", "gradient", "network"],
            ["protein", "genome", "cell"],
        ];
        let mut builder = Self::new(&["Physics", "Computer Science", "Biology"]);
        for i in 0..n {
            let primary = i % 3;
            let secondary = (i / 3) % 3;
            let mut labels = [0u8; 3];
            labels[primary] = 1;
            if i % 4 == 0 {
                labels[secondary] = 1;
            }
            let words: Vec<&str> = labels
                .iter()
                .enumerate()
                .filter(|(_, &l)| l == 1)
                .flat_map(|(j, _)| vocab[j].iter().copied())
                .collect();
            builder = builder.row(
                i as i64,
                &format!("Paper {i}, on {}", words[0]),
                &words.join(" "),
                &labels,
            );
        }
        builder
    }

    pub fn build(&self) -> String {
        let mut out = format!("ID,TITLE,ABSTRACT,{}\n", self.labels.join(","));
        for row in &self.rows {
            out.push_str(row);
            out.push('\n');
        }
        out
    }
}
