//! Markdown rendering for generated overviews.
//!
//! Two outputs share one print stylesheet: an HTML document (the stylesheet
//! embedded as CSS) and a PDF laid out directly from the markdown event
//! stream with the same measurements, set in the bundled DejaVu faces.

mod blocks;
mod font;
mod pdf;

use std::collections::BTreeSet;

use pulldown_cmark::{html, Options, Parser};

use crate::error::{PipelineError, PipelineResult};
use blocks::{collect_blocks, Block, BlockKind};
use font::{Face, FontSet};
use pdf::{assemble, PdfLayout};

pub const PRINT_CSS: &str = "\
body { font-family: 'DejaVu Sans', Arial, sans-serif; font-size: 12pt; margin: 20px; }
h1, h2, h3 { page-break-after: avoid; }
pre { white-space: pre-wrap; background-color: #f5f5f5; padding: 10px; }
code { background-color: #f5f5f5; padding: 2px 4px; }
";

/// PDF counterpart of [`PRINT_CSS`]. Lengths are in points.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintStyle {
    pub page_width: f32,
    pub page_height: f32,
    /// 2cm page margin plus the 20px body margin.
    pub margin: f32,
    pub font_size: f32,
    pub line_spacing: f32,
    /// Multipliers of `font_size` for h1..h6.
    pub heading_scale: [f32; 6],
    pub code_font_size: f32,
    /// `pre` padding (10px).
    pub code_padding: f32,
    /// Horizontal `code` padding (4px).
    pub inline_code_padding: f32,
    /// Gray level of #f5f5f5.
    pub shade: f32,
    pub indent_step: f32,
}

impl Default for PrintStyle {
    fn default() -> Self {
        Self {
            page_width: 595.28,
            page_height: 841.89,
            margin: 71.7,
            font_size: 12.0,
            line_spacing: 1.35,
            heading_scale: [2.0, 1.5, 1.17, 1.0, 0.83, 0.67],
            code_font_size: 10.5,
            code_padding: 7.5,
            inline_code_padding: 3.0,
            shade: 0.96,
            indent_step: 18.0,
        }
    }
}

fn parser_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

fn ensure_content(markdown: &str) -> PipelineResult<()> {
    if markdown.trim().is_empty() {
        return Err(PipelineError::processing("overview markdown is empty"));
    }
    Ok(())
}

/// Markdown to an HTML fragment.
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, parser_options());
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Standalone HTML document carrying the print stylesheet.
pub fn html_document(markdown: &str) -> PipelineResult<String> {
    ensure_content(markdown)?;
    Ok(format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n{}</style>\n</head>\n<body>\n{}</body>\n</html>\n",
        PRINT_CSS,
        markdown_to_html(markdown)
    ))
}

pub fn markdown_to_pdf(markdown: &str) -> PipelineResult<Vec<u8>> {
    markdown_to_pdf_with(markdown, &PrintStyle::default())
}

pub fn markdown_to_pdf_with(markdown: &str, style: &PrintStyle) -> PipelineResult<Vec<u8>> {
    ensure_content(markdown)?;
    let fonts = font::bundled()?;
    let blocks = collect_blocks(markdown, style);
    ensure_drawable(fonts, &blocks)?;
    let mut layout = PdfLayout::new(style, fonts);
    for block in &blocks {
        layout.block(block);
    }
    let (pages, used) = layout.finish();
    assemble(pages, &used, fonts, style)
}

/// Fails on characters no bundled face can draw instead of dropping them.
fn ensure_drawable(fonts: &FontSet, blocks: &[Block]) -> PipelineResult<()> {
    let mut missing = BTreeSet::new();
    for block in blocks {
        if let BlockKind::Item { marker } = &block.kind {
            missing.extend(fonts.missing(Face::Regular, marker));
        }
        for span in &block.spans {
            missing.extend(fonts.missing(span.face, &span.text));
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    let listed: Vec<String> = missing.iter().map(|c| format!("{:?}", c)).collect();
    Err(PipelineError::processing(format!(
        "overview has characters the PDF fonts cannot draw: {}",
        listed.join(", ")
    )))
}
