//! SVG charts of an evaluation report.
//!
//! - `roc_curves.svg`: every label's ROC curve on one chart, AUC in the legend
//! - `confusion_{i}.svg`: 2×2 heatmap of label `i`'s confusion matrix

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use super::metrics::{BinaryConfusion, EvaluationReport, RocCurve};
use super::report::{label_name, ReportRenderer};
use crate::error::Result;

pub const ROC_CHART_FILE: &str = "roc_curves.svg";

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_css_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Linear blend towards `other`; `t` is clamped to `[0, 1]`.
    pub fn mix(&self, other: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let lerp = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8;
        Color::rgb(lerp(self.r, other.r), lerp(self.g, other.g), lerp(self.b, other.b))
    }
}

const BLACK: Color = Color::rgb(0x00, 0x00, 0x00);
const WHITE: Color = Color::rgb(0xFF, 0xFF, 0xFF);
const GRID: Color = Color::rgb(0xCC, 0xCC, 0xCC);
const HEAT: Color = Color::rgb(0x08, 0x30, 0x6B);

/// Line colors, cycled per label.
const SERIES: [Color; 8] = [
    Color::rgb(0x1F, 0x77, 0xB4),
    Color::rgb(0xFF, 0x7F, 0x0E),
    Color::rgb(0x2C, 0xA0, 0x2C),
    Color::rgb(0xD6, 0x27, 0x28),
    Color::rgb(0x94, 0x67, 0xBD),
    Color::rgb(0x8C, 0x56, 0x4B),
    Color::rgb(0xE3, 0x77, 0xC2),
    Color::rgb(0x7F, 0x7F, 0x7F),
];

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Text alignment relative to the anchor point.
#[derive(Debug, Clone, Copy)]
pub enum Anchor {
    Start,
    Middle,
    End,
}

impl Anchor {
    fn as_str(self) -> &'static str {
        match self {
            Anchor::Start => "start",
            Anchor::Middle => "middle",
            Anchor::End => "end",
        }
    }
}

/// Minimal SVG document builder.
#[derive(Debug, Clone)]
pub struct SvgDocument {
    width: f64,
    height: f64,
    title: Option<String>,
    elements: Vec<String>,
}

impl SvgDocument {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            title: None,
            elements: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn rect(&mut self, x: f64, y: f64, width: f64, height: f64, fill: Color, stroke: Option<Color>) {
        let stroke = stroke.map_or_else(|| "none".to_string(), |c| c.to_css_hex());
        self.elements.push(format!(
            r#"<rect x="{x:.1}" y="{y:.1}" width="{width:.1}" height="{height:.1}" fill="{}" stroke="{stroke}"/>"#,
            fill.to_css_hex()
        ));
    }

    pub fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Color, width: f64, dashed: bool) {
        let dash = if dashed { r#" stroke-dasharray="6,4""# } else { "" };
        self.elements.push(format!(
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}" stroke-width="{width}"{dash}/>"#,
            from.0,
            from.1,
            to.0,
            to.1,
            color.to_css_hex()
        ));
    }

    pub fn polyline(&mut self, points: &[(f64, f64)], color: Color, width: f64) {
        let mut coords = String::new();
        for (i, (x, y)) in points.iter().enumerate() {
            if i > 0 {
                coords.push(' ');
            }
            let _ = write!(coords, "{x:.1},{y:.1}");
        }
        self.elements.push(format!(
            r#"<polyline points="{coords}" fill="none" stroke="{}" stroke-width="{width}"/>"#,
            color.to_css_hex()
        ));
    }

    pub fn text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: Anchor, color: Color) {
        self.elements.push(format!(
            r#"<text x="{x:.1}" y="{y:.1}" font-family="sans-serif" font-size="{size}" text-anchor="{}" fill="{}">{}</text>"#,
            anchor.as_str(),
            color.to_css_hex(),
            escape(content)
        ));
    }

    pub fn to_svg(&self) -> String {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );
        svg.push('\n');
        if let Some(title) = &self.title {
            let _ = writeln!(svg, "<title>{}</title>", escape(title));
        }
        let _ = writeln!(
            svg,
            r#"<rect width="100%" height="100%" fill="{}"/>"#,
            WHITE.to_css_hex()
        );
        for element in &self.elements {
            svg.push_str(element);
            svg.push('\n');
        }
        svg.push_str("</svg>\n");
        svg
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_svg())?;
        Ok(())
    }
}

/// Legend entry for one label's curve.
pub fn roc_legend(name: &str, roc: &RocCurve) -> String {
    if roc.is_defined() {
        format!("{name} (AUC = {:.2})", roc.auc)
    } else {
        format!("{name} (AUC = NaN)")
    }
}

/// One chart holding every label's ROC curve and the chance diagonal.
pub fn roc_chart(report: &EvaluationReport, label_names: &[String]) -> SvgDocument {
    const WIDTH: f64 = 760.0;
    const HEIGHT: f64 = 520.0;
    const LEFT: f64 = 70.0;
    const TOP: f64 = 50.0;
    const SIZE: f64 = 400.0;

    let x = |fpr: f64| LEFT + fpr * SIZE;
    let y = |tpr: f64| TOP + (1.0 - tpr) * SIZE;

    let mut doc = SvgDocument::new(WIDTH, HEIGHT).title("Receiver operating characteristic");
    doc.text(LEFT + SIZE / 2.0, 30.0, "Receiver operating characteristic", 16.0, Anchor::Middle, BLACK);

    doc.rect(LEFT, TOP, SIZE, SIZE, WHITE, Some(BLACK));
    for step in 0..=5 {
        let v = f64::from(step) / 5.0;
        doc.line((x(v), y(0.0)), (x(v), y(1.0)), GRID, 0.5, false);
        doc.line((x(0.0), y(v)), (x(1.0), y(v)), GRID, 0.5, false);
        doc.text(x(v), y(0.0) + 18.0, &format!("{v:.1}"), 11.0, Anchor::Middle, BLACK);
        doc.text(x(0.0) - 8.0, y(v) + 4.0, &format!("{v:.1}"), 11.0, Anchor::End, BLACK);
    }
    doc.line((x(0.0), y(0.0)), (x(1.0), y(1.0)), SERIES[7], 1.0, true);
    doc.text(LEFT + SIZE / 2.0, TOP + SIZE + 40.0, "False positive rate", 13.0, Anchor::Middle, BLACK);
    doc.text(20.0, TOP + SIZE / 2.0, "True positive rate", 13.0, Anchor::Middle, BLACK);

    let legend_x = LEFT + SIZE + 10.0;
    for (i, roc) in report.roc.iter().enumerate() {
        let color = SERIES[i % SERIES.len()];
        if roc.is_defined() {
            let points: Vec<(f64, f64)> = roc.fpr.iter().zip(&roc.tpr).map(|(&f, &t)| (x(f), y(t))).collect();
            doc.polyline(&points, color, 2.0);
        }
        let row = TOP + 10.0 + i as f64 * 18.0;
        doc.line((legend_x, row), (legend_x + 16.0, row), color, 2.0, !roc.is_defined());
        doc.text(
            legend_x + 20.0,
            row + 4.0,
            &roc_legend(&label_name(label_names, i), roc),
            11.0,
            Anchor::Start,
            BLACK,
        );
    }
    doc
}

/// 2×2 heatmap: truth rows (absent, present) against predicted columns.
pub fn confusion_chart(cm: &BinaryConfusion, name: &str) -> SvgDocument {
    const CELL: f64 = 120.0;
    const LEFT: f64 = 110.0;
    const TOP: f64 = 70.0;

    let title = format!("Confusion matrix: {name}");
    let mut doc = SvgDocument::new(LEFT + 2.0 * CELL + 30.0, TOP + 2.0 * CELL + 60.0).title(&title);
    doc.text(LEFT + CELL, 30.0, &title, 15.0, Anchor::Middle, BLACK);

    let matrix = cm.as_matrix();
    let max = matrix.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;
    for (row, counts) in matrix.iter().enumerate() {
        for (col, &count) in counts.iter().enumerate() {
            let intensity = count as f64 / max;
            let (cx, cy) = (LEFT + col as f64 * CELL, TOP + row as f64 * CELL);
            doc.rect(cx, cy, CELL, CELL, WHITE.mix(HEAT, intensity), Some(WHITE));
            let ink = if intensity > 0.5 { WHITE } else { BLACK };
            doc.text(cx + CELL / 2.0, cy + CELL / 2.0 + 6.0, &count.to_string(), 18.0, Anchor::Middle, ink);
        }
    }

    for (i, class) in ["Absent", "Present"].iter().enumerate() {
        let offset = i as f64 * CELL + CELL / 2.0;
        doc.text(LEFT + offset, TOP - 10.0, class, 12.0, Anchor::Middle, BLACK);
        doc.text(LEFT - 10.0, TOP + offset + 4.0, class, 12.0, Anchor::End, BLACK);
    }
    doc.text(LEFT + CELL, TOP + 2.0 * CELL + 30.0, "Predicted", 13.0, Anchor::Middle, BLACK);
    doc.text(LEFT - 10.0, TOP - 10.0, "Actual", 13.0, Anchor::End, BLACK);
    doc
}

/// Writes SVG charts into a directory.
#[derive(Debug, Clone)]
pub struct PlotRenderer {
    dir: PathBuf,
}

impl PlotRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn confusion_file(index: usize) -> String {
        format!("confusion_{index}.svg")
    }
}

impl ReportRenderer for PlotRenderer {
    fn render(&self, report: &EvaluationReport, label_names: &[String]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        roc_chart(report, label_names).save(&self.dir.join(ROC_CHART_FILE))?;
        for (i, cm) in report.confusion.iter().enumerate() {
            confusion_chart(cm, &label_name(label_names, i))
                .save(&self.dir.join(Self::confusion_file(i)))?;
        }
        tracing::info!(dir = %self.dir.display(), "Wrote evaluation charts");
        Ok(())
    }
}
