//! Paginated table export.
//!
//! Layout is computed separately from rendering: [`paginate`] places text on
//! pages and [`render_pdf`] draws the result.

use crate::error::ExportError;
use printpdf::{BuiltinFont, Mm, PdfDocument};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Page geometry in millimetres, origin at the bottom-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub page_width: f32,
    pub page_height: f32,
    pub top_margin: f32,
    pub bottom_margin: f32,
    pub line_height: f32,
    pub font_size: f32,
    /// Left edge of each column. Values past the last offset are dropped.
    pub column_offsets: Vec<f32>,
}

impl Default for PageLayout {
    /// A4 portrait, four columns sized for attendance sheets.
    fn default() -> Self {
        Self {
            page_width: 210.0,
            page_height: 297.0,
            top_margin: 20.0,
            bottom_margin: 20.0,
            line_height: 8.0,
            font_size: 11.0,
            column_offsets: vec![15.0, 55.0, 125.0, 165.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextCell {
    pub x: f32,
    pub text: String,
}

/// One line of text at baseline `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub y: f32,
    pub cells: Vec<TextCell>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub lines: Vec<Line>,
}

fn place<S: AsRef<str>>(values: &[S], y: f32, layout: &PageLayout) -> Line {
    Line {
        y,
        cells: layout
            .column_offsets
            .iter()
            .zip(values)
            .map(|(&x, v)| TextCell {
                x,
                text: v.as_ref().to_string(),
            })
            .collect(),
    }
}

/// Lay `rows` out under a repeated `header`.
///
/// Every page starts with the header. A row that would sit below the bottom
/// margin opens a new page; each page carries at least one row, so tiny
/// layouts still terminate. There is always at least one page.
pub fn paginate<S: AsRef<str>>(header: &[S], rows: &[Vec<String>], layout: &PageLayout) -> Vec<Page> {
    let top = layout.page_height - layout.top_margin;
    let new_page = || Page {
        lines: vec![place(header, top, layout)],
    };

    let mut pages = Vec::new();
    let mut page = new_page();
    let mut y = top - layout.line_height;
    for row in rows {
        if y < layout.bottom_margin && page.lines.len() > 1 {
            pages.push(std::mem::replace(&mut page, new_page()));
            y = top - layout.line_height;
        }
        page.lines.push(place(row, y, layout));
        y -= layout.line_height;
    }
    pages.push(page);
    pages
}

/// Write `pages` as a PDF using built-in Helvetica.
pub fn render_pdf(pages: &[Page], layout: &PageLayout, title: &str, path: &Path) -> Result<(), ExportError> {
    let (width, height) = (Mm(layout.page_width), Mm(layout.page_height));
    let (doc, first_page, first_layer) = PdfDocument::new(title, width, height, "Layer 1");
    let font = doc.add_builtin_font(BuiltinFont::Helvetica)?;

    for (i, page) in pages.iter().enumerate() {
        let (page_idx, layer_idx) = if i == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(width, height, "Layer 1")
        };
        let layer = doc.get_page(page_idx).get_layer(layer_idx);
        for line in &page.lines {
            for cell in &line.cells {
                layer.use_text(cell.text.as_str(), layout.font_size, Mm(cell.x), Mm(line.y), &font);
            }
        }
    }

    let file = File::create(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    doc.save(&mut BufWriter::new(file))?;
    tracing::info!(path = %path.display(), pages = pages.len(), "document written");
    Ok(())
}
