//! PDF diagnostic reports.
//!
//! A report combines the patient's stored summary, their most recent blood-metals panel and the
//! latest prediction for each model. Rendering is synchronous and CPU bound; the handler runs it
//! on the blocking pool.

use std::{collections::HashSet, io::BufWriter};

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, Color, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Rgb};

use crate::{
    db::models::{blood_metals::BloodMetalsDBResponse, patients::PatientDBResponse, predictions::PredictionDBResponse},
    errors::Error,
};

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const LEFT: f32 = 20.0;
const TOP: f32 = 280.0;
/// Content stops here; the footer sits below
const BOTTOM: f32 = 30.0;

const DISCLAIMER: &str = "Disclaimer: This report is automatically generated from laboratory and model data. It is \
     intended for clinical assistance only. A qualified medical professional must confirm the diagnosis and \
     treatment plan.";

/// Everything a report shows, loaded before rendering
#[derive(Debug, Clone)]
pub struct ReportSnapshot {
    pub patient: PatientDBResponse,
    pub labs: Option<BloodMetalsDBResponse>,
    /// One entry per model, see [`latest_per_model`]
    pub predictions: Vec<PredictionDBResponse>,
    /// Name printed in the signature block
    pub clinician: String,
    pub generated_at: DateTime<Utc>,
}

/// Reduce a newest-first prediction history to the most recent entry per model
pub fn latest_per_model(history: &[PredictionDBResponse]) -> Vec<PredictionDBResponse> {
    let mut seen = HashSet::new();
    history
        .iter()
        .filter(|prediction| seen.insert(prediction.model.as_str()))
        .cloned()
        .collect()
}

/// Inclusive reference interval for one analyte, in µmol/L
#[derive(Debug, Clone, Copy)]
pub struct ReferenceRange {
    pub analyte: &'static str,
    pub low: f64,
    pub high: f64,
    pub display: &'static str,
}

pub const REFERENCE_RANGES: [ReferenceRange; 5] = [
    ReferenceRange {
        analyte: "Lead",
        low: 0.0,
        high: 0.2,
        display: "< 0.2",
    },
    ReferenceRange {
        analyte: "Mercury",
        low: 0.0,
        high: 0.05,
        display: "< 0.05",
    },
    ReferenceRange {
        analyte: "Cadmium",
        low: 0.0,
        high: 0.01,
        display: "< 0.01",
    },
    ReferenceRange {
        analyte: "Selenium",
        low: 1.0,
        high: 1.8,
        display: "1.0 - 1.8",
    },
    ReferenceRange {
        analyte: "Manganese",
        low: 0.05,
        high: 0.2,
        display: "0.05 - 0.2",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpretation {
    Normal,
    Abnormal,
    Unavailable,
}

impl Interpretation {
    pub fn label(&self) -> &'static str {
        match self {
            Interpretation::Normal => "NORMAL",
            Interpretation::Abnormal => "ABNORMAL",
            Interpretation::Unavailable => "N/A",
        }
    }

    fn color(&self) -> Color {
        match self {
            Interpretation::Normal => rgb(0x2E, 0x7D, 0x32),
            Interpretation::Abnormal => rgb(0xC6, 0x28, 0x28),
            Interpretation::Unavailable => neutral(),
        }
    }
}

pub fn interpret(value: Option<f64>, range: &ReferenceRange) -> Interpretation {
    match value {
        None => Interpretation::Unavailable,
        Some(v) if v < range.low || v > range.high => Interpretation::Abnormal,
        Some(_) => Interpretation::Normal,
    }
}

/// Attachment file name, limited to characters that are safe inside a quoted header value
pub fn filename(patient: &PatientDBResponse) -> String {
    let stem = if patient.details.name.trim().is_empty() {
        patient.id.to_string()
    } else {
        patient
            .details
            .name
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    };
    format!("Health_Report_{stem}.pdf")
}

fn rgb(r: u8, g: u8, b: u8) -> Color {
    Color::Rgb(Rgb::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, None))
}

fn neutral() -> Color {
    rgb(0x66, 0x66, 0x66)
}

fn primary() -> Color {
    rgb(0x1E, 0x88, 0xE5)
}

fn ink() -> Color {
    rgb(0x22, 0x22, 0x22)
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

fn fixed(value: Option<f64>, places: usize) -> String {
    value.map(|v| format!("{v:.places$}")).unwrap_or_else(|| "N/A".to_string())
}

/// Break `text` into lines of at most `max_chars`, on word boundaries
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn font_error(e: impl std::fmt::Display) -> Error {
    Error::Internal {
        operation: format!("load report font: {e}"),
    }
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

/// Writes top to bottom, starting a new page when the next row would not fit
struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    fonts: Fonts,
    y: Mm,
    pages: usize,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self, Error> {
        let (doc, page, layer) = PdfDocument::new(title, PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
        let layer = doc.get_page(page).get_layer(layer);
        let fonts = Fonts {
            regular: doc.add_builtin_font(BuiltinFont::Helvetica).map_err(font_error)?,
            bold: doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(font_error)?,
        };
        Ok(Self {
            doc,
            layer,
            fonts,
            y: Mm(TOP),
            pages: 1,
        })
    }

    /// Reserve `height` for the next row, breaking the page first if needed
    fn advance(&mut self, height: f32) {
        if self.y.0 - height < BOTTOM {
            self.pages += 1;
            let (page, layer) = self.doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, format!("Layer {}", self.pages));
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = Mm(TOP);
        }
        self.y -= Mm(height);
    }

    fn text(&self, text: &str, size: f32, x: f32, bold: bool, color: Color) {
        let font = if bold { &self.fonts.bold } else { &self.fonts.regular };
        self.layer.set_fill_color(color);
        self.layer.use_text(text, size, Mm(x), self.y, font);
    }

    fn heading(&mut self, text: &str) {
        self.advance(12.0);
        self.text(text, 12.0, LEFT, true, primary());
        self.advance(2.0);
    }

    /// One row of cells at fixed column offsets
    fn row(&mut self, cells: &[(&str, f32, Color)], bold: bool) {
        self.advance(6.0);
        for (text, x, color) in cells {
            self.text(text, 9.0, *x, bold, color.clone());
        }
    }

    fn finish(self) -> Result<Vec<u8>, Error> {
        let mut buf = BufWriter::new(Vec::new());
        self.doc.save(&mut buf).map_err(|e| Error::Internal {
            operation: format!("save report PDF: {e}"),
        })?;
        buf.into_inner().map_err(|e| Error::Internal {
            operation: format!("flush report PDF: {e}"),
        })
    }
}

/// Render a report as PDF bytes
pub fn render_pdf(snapshot: &ReportSnapshot) -> Result<Vec<u8>, Error> {
    let patient = &snapshot.patient;
    let mut page = PageWriter::new("Patient Health Diagnostic Report")?;

    page.text("PATIENT HEALTH DIAGNOSTIC REPORT", 18.0, LEFT, true, primary());
    page.advance(8.0);
    let report_id: String = patient.id.to_string().chars().take(8).collect::<String>().to_uppercase();
    page.text(
        &format!(
            "Report ID: {report_id} | Generated: {}",
            snapshot.generated_at.format("%b %-d, %Y, %H:%M UTC")
        ),
        9.0,
        LEFT,
        false,
        neutral(),
    );

    page.heading("PATIENT SUMMARY");
    let details = &patient.details;
    let derived = &patient.derived;
    let name = if details.name.is_empty() { "N/A".to_string() } else { details.name.clone() };
    let summary = [
        ("Name", name),
        ("ID/NIC", or_na(details.nic.as_deref())),
        ("Date of Birth", or_na(details.dob.map(|d| d.format("%Y-%m-%d")))),
        (
            "Age",
            derived
                .age_years
                .map(|years| format!("{years}y {}m", derived.age_months.unwrap_or(0)))
                .unwrap_or_else(|| "N/A".to_string()),
        ),
        ("Gender", or_na(details.gender.as_deref())),
        ("Marital Status", or_na(details.marital_status.as_ref().map(|s| s.replace('_', " ")))),
        ("Height", or_na(details.height_cm.map(|h| format!("{h} cm")))),
        ("Weight", or_na(details.weight_kg.map(|w| format!("{w} kg")))),
        ("BMI", fixed(derived.bmi, 2)),
    ];
    // Two columns: five rows on the left, the rest on the right
    let (left, right) = summary.split_at(5);
    for (index, (label, value)) in left.iter().enumerate() {
        page.advance(5.5);
        page.text(&format!("{label}:"), 10.0, LEFT, true, ink());
        page.text(value, 10.0, LEFT + 30.0, false, ink());
        if let Some((label, value)) = right.get(index) {
            page.text(&format!("{label}:"), 10.0, LEFT + 90.0, true, ink());
            page.text(value, 10.0, LEFT + 120.0, false, ink());
        }
    }

    page.heading("LABORATORY RESULTS: BLOOD METALS");
    match &snapshot.labs {
        Some(report) => {
            let columns = [LEFT, LEFT + 30.0, LEFT + 65.0, LEFT + 100.0, LEFT + 135.0];
            let header = ["Metal", "Value (umol/L)", "Reference Range", "Interpretation", "Test Date"];
            let header: Vec<_> = header.iter().zip(columns).map(|(text, x)| (*text, x, primary())).collect();
            page.row(&header, true);

            let values = &report.values;
            let measured = [
                values.lead_umol_l,
                values.mercury_umol_l,
                values.cadmium_umol_l,
                values.selenium_umol_l,
                values.manganese_umol_l,
            ];
            let tested = report.created_at.format("%Y-%m-%d").to_string();
            for (range, value) in REFERENCE_RANGES.iter().zip(measured) {
                let verdict = interpret(value, range);
                let shown = fixed(value, 4);
                page.row(
                    &[
                        (range.analyte, columns[0], ink()),
                        (shown.as_str(), columns[1], verdict.color()),
                        (range.display, columns[2], ink()),
                        (verdict.label(), columns[3], verdict.color()),
                        (tested.as_str(), columns[4], ink()),
                    ],
                    false,
                );
            }
        }
        None => page.row(&[("No recent Blood Metal data available.", LEFT, neutral())], false),
    }

    page.heading("AI MODEL PREDICTIONS");
    if snapshot.predictions.is_empty() {
        page.row(&[("No AI prediction data available.", LEFT, neutral())], false);
    } else {
        let columns = [LEFT, LEFT + 70.0, LEFT + 120.0];
        page.row(
            &[
                ("AI Model", columns[0], neutral()),
                ("Predicted Value (0.0 - 1.0)", columns[1], neutral()),
                ("Prediction Date", columns[2], neutral()),
            ],
            true,
        );
        for prediction in &snapshot.predictions {
            let model = prediction.model.replace('_', " ").to_uppercase();
            let value = format!("{:.4}", prediction.value);
            let date = prediction.created_at.format("%Y-%m-%d").to_string();
            let risk = if prediction.value > 0.7 {
                Interpretation::Abnormal.color()
            } else if prediction.value > 0.3 {
                rgb(0xFF, 0x98, 0x00)
            } else {
                neutral()
            };
            page.row(
                &[
                    (model.as_str(), columns[0], ink()),
                    (value.as_str(), columns[1], risk),
                    (date.as_str(), columns[2], neutral()),
                ],
                false,
            );
        }
    }

    page.heading("CLINICIAN REVIEW & AUTHORIZATION");
    page.advance(6.0);
    page.text("Clinical Notes / Recommendations:", 10.0, LEFT, true, ink());
    // Space left blank for handwritten notes
    page.advance(25.0);
    page.advance(6.0);
    page.text("_______________________________", 10.0, LEFT + 105.0, false, neutral());
    page.advance(6.0);
    page.text(&format!("Dr. {}", snapshot.clinician), 10.0, LEFT + 105.0, true, ink());
    page.advance(5.0);
    page.text("Reviewing Clinician", 10.0, LEFT + 105.0, false, neutral());

    page.advance(8.0);
    for line in wrap_text(DISCLAIMER, 120) {
        page.advance(3.5);
        page.text(&line, 7.0, LEFT, false, neutral());
    }
    page.advance(3.5);
    page.text("Smart Health Diagnostics System", 7.0, LEFT, false, neutral());

    page.finish()
}
