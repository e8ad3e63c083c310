use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, Pt};
use thiserror::Error;

use super::{format_score, COL_NAME, COL_SCORE_A, COL_SCORE_B, COL_STUDENT_NUMBER, COL_TOTAL};
use crate::store::StudentRecord;

// US-letter page, coordinates in points from the bottom-left corner.
pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;
pub const TITLE: &str = "学生成绩表";
pub const TITLE_POS: (f32, f32) = (250.0, 750.0);
pub const HEADER_Y: f32 = 700.0;
pub const FIRST_ROW_Y: f32 = 670.0;
pub const ROW_STEP: f32 = 20.0;
pub const BOTTOM_MARGIN: f32 = 50.0;
pub const TOP_MARGIN_Y: f32 = 750.0;
pub const COLUMN_X: [f32; 5] = [50.0, 150.0, 250.0, 350.0, 450.0];
pub const FONT_SIZE: f32 = 12.0;

const HEADERS: [&str; 5] = [COL_STUDENT_NUMBER, COL_NAME, COL_SCORE_A, COL_SCORE_B, COL_TOTAL];

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("failed to load font {path}: {source}")]
    Font {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pdf rendering failed: {0}")]
    Render(#[from] printpdf::Error),
}

/// One string drawn at a fixed position on a zero-based page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextPlacement {
    pub page: usize,
    pub x: f32,
    pub y: f32,
    pub text: String,
}

/// Fixed-layout report: title and header on the first page, then one row per
/// record every [`ROW_STEP`] points. When the cursor drops below the bottom
/// margin a new page starts and the cursor restarts at [`TOP_MARGIN_Y`].
pub fn layout_report(records: &[StudentRecord]) -> Vec<TextPlacement> {
    let mut out = Vec::with_capacity(records.len() * COLUMN_X.len() + 6);
    out.push(TextPlacement {
        page: 0,
        x: TITLE_POS.0,
        y: TITLE_POS.1,
        text: TITLE.to_string(),
    });
    for (header, x) in HEADERS.iter().zip(COLUMN_X) {
        out.push(TextPlacement {
            page: 0,
            x,
            y: HEADER_Y,
            text: header.to_string(),
        });
    }

    let mut page = 0usize;
    let mut y = FIRST_ROW_Y;
    for r in records {
        if y < BOTTOM_MARGIN {
            page += 1;
            y = TOP_MARGIN_Y;
        }
        let values = [
            r.student_number.clone(),
            r.name.clone(),
            format_score(r.score_a),
            format_score(r.score_b),
            format_score(r.total()),
        ];
        for (text, x) in values.into_iter().zip(COLUMN_X) {
            out.push(TextPlacement { page, x, y, text });
        }
        y -= ROW_STEP;
    }
    out
}

pub fn page_count(placements: &[TextPlacement]) -> usize {
    placements.iter().map(|p| p.page + 1).max().unwrap_or(1)
}

/// Renders the report. Without a font file the builtin Helvetica is used,
/// which cannot draw CJK glyphs.
pub fn render_pdf(
    records: &[StudentRecord],
    font_path: Option<&Path>,
) -> Result<Vec<u8>, PdfError> {
    let placements = layout_report(records);
    let pages = page_count(&placements);

    let (doc, first_page, first_layer) = PdfDocument::new(
        TITLE,
        Mm::from(Pt(PAGE_WIDTH)),
        Mm::from(Pt(PAGE_HEIGHT)),
        "Layer 1",
    );
    let font = load_font(&doc, font_path)?;

    let mut layers = vec![doc.get_page(first_page).get_layer(first_layer)];
    for n in 1..pages {
        let (page, layer) = doc.add_page(
            Mm::from(Pt(PAGE_WIDTH)),
            Mm::from(Pt(PAGE_HEIGHT)),
            format!("Layer {}", n + 1),
        );
        layers.push(doc.get_page(page).get_layer(layer));
    }

    for p in &placements {
        layers[p.page].use_text(
            p.text.clone(),
            FONT_SIZE,
            Mm::from(Pt(p.x)),
            Mm::from(Pt(p.y)),
            &font,
        );
    }
    Ok(doc.save_to_bytes()?)
}

fn load_font(
    doc: &PdfDocumentReference,
    font_path: Option<&Path>,
) -> Result<IndirectFontRef, PdfError> {
    match font_path {
        Some(path) => {
            let file = File::open(path).map_err(|source| PdfError::Font {
                path: path.to_string_lossy().to_string(),
                source,
            })?;
            Ok(doc.add_external_font(BufReader::new(file))?)
        }
        None => Ok(doc.add_builtin_font(BuiltinFont::Helvetica)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<StudentRecord> {
        (0..n)
            .map(|i| StudentRecord::new(format!("S{i:03}"), format!("N{i}"), 60.0, 70.0))
            .collect()
    }

    #[test]
    fn first_page_holds_thirty_two_rows() {
        let placements = layout_report(&records(32));
        assert_eq!(page_count(&placements), 1);
        let last = placements.last().expect("rows");
        assert_eq!(last.y, 50.0);
    }

    #[test]
    fn overflow_restarts_cursor_at_top_margin() {
        let placements = layout_report(&records(33 + 36));
        assert_eq!(page_count(&placements), 3);
        let second_page_first: Vec<_> = placements.iter().filter(|p| p.page == 1).collect();
        assert_eq!(second_page_first[0].y, TOP_MARGIN_Y);
        assert_eq!(second_page_first[0].text, "S032");
        assert_eq!(second_page_first.len(), 36 * COLUMN_X.len());
    }

    #[test]
    fn header_and_values_use_fixed_columns() {
        let placements = layout_report(&records(1));
        let row: Vec<_> = placements.iter().filter(|p| p.y == FIRST_ROW_Y).collect();
        let xs: Vec<f32> = row.iter().map(|p| p.x).collect();
        assert_eq!(xs, COLUMN_X.to_vec());
        assert_eq!(row[4].text, "130.0");
    }

    #[test]
    fn renders_a_pdf_document() {
        let bytes = render_pdf(&records(40), None).expect("render");
        assert!(bytes.starts_with(b"%PDF"));
    }
}
