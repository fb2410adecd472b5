//! PDF page layout: greedy line wrapping against the bundled font metrics,
//! page breaking, and assembly of the final document with embedded fonts.

use std::collections::BTreeMap;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};

use super::blocks::{Block, BlockKind, Span};
use super::font::{Face, FontSet};
use super::PrintStyle;
use crate::error::{PipelineError, PipelineResult};

enum Token<'s> {
    Word(&'s str, Face, bool),
    Space,
    Break,
}

fn tokenize(spans: &[Span]) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    for span in spans {
        for (i, segment) in span.text.split('\n').enumerate() {
            if i > 0 {
                out.push(Token::Break);
            }
            let mut rest = segment;
            while !rest.is_empty() {
                let ws = rest.len() - rest.trim_start().len();
                if ws > 0 {
                    if !matches!(out.last(), Some(Token::Space)) {
                        out.push(Token::Space);
                    }
                    rest = &rest[ws..];
                    continue;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                out.push(Token::Word(&rest[..end], span.face, span.shaded));
                rest = &rest[end..];
            }
        }
    }
    out
}

type Line = Vec<Span>;

fn push_run(line: &mut Line, text: &str, face: Face, shaded: bool) {
    match line.last_mut() {
        Some(last) if last.face == face && last.shaded == shaded => last.text.push_str(text),
        _ => line.push(Span {
            text: text.to_string(),
            face,
            shaded,
        }),
    }
}

/// Greedy fill of `width`; words longer than a line are split by character.
fn wrap(fonts: &FontSet, spans: &[Span], size: f32, width: f32) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut line: Line = Vec::new();
    let mut x = 0.0_f32;
    let mut pending_space = false;

    for token in tokenize(spans) {
        match token {
            Token::Break => {
                lines.push(std::mem::take(&mut line));
                x = 0.0;
                pending_space = false;
            }
            Token::Space => pending_space = !line.is_empty(),
            Token::Word(word, face, shaded) => {
                let word_w = fonts.text_width(face, word, size);
                let space_w = line
                    .last()
                    .map(|run| fonts.char_width(run.face, ' ', size))
                    .unwrap_or(0.0);
                if pending_space && x + space_w + word_w > width && word_w <= width {
                    lines.push(std::mem::take(&mut line));
                    x = 0.0;
                } else if pending_space {
                    if let Some(last) = line.last_mut() {
                        last.text.push(' ');
                    }
                    x += space_w;
                }
                pending_space = false;

                if word_w > width || x + word_w > width {
                    let mut buf = [0u8; 4];
                    for ch in word.chars() {
                        let cw = fonts.char_width(face, ch, size);
                        if x + cw > width && x > 0.0 {
                            lines.push(std::mem::take(&mut line));
                            x = 0.0;
                        }
                        push_run(&mut line, ch.encode_utf8(&mut buf), face, shaded);
                        x += cw;
                    }
                } else {
                    push_run(&mut line, word, face, shaded);
                    x += word_w;
                }
            }
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

pub(super) struct PdfLayout<'a> {
    style: &'a PrintStyle,
    fonts: &'a FontSet,
    /// Glyphs drawn per face, for the width arrays and ToUnicode maps.
    used: BTreeMap<Face, BTreeMap<u16, char>>,
    pages: Vec<Vec<Operation>>,
    ops: Vec<Operation>,
    y: f32,
    at_top: bool,
}

impl<'a> PdfLayout<'a> {
    pub(super) fn new(style: &'a PrintStyle, fonts: &'a FontSet) -> Self {
        Self {
            style,
            fonts,
            used: BTreeMap::new(),
            pages: Vec::new(),
            ops: Vec::new(),
            y: style.page_height - style.margin,
            at_top: true,
        }
    }

    fn content_width(&self) -> f32 {
        self.style.page_width - 2.0 * self.style.margin
    }

    fn body_line(&self) -> f32 {
        self.style.font_size * self.style.line_spacing
    }

    fn break_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.ops));
        self.y = self.style.page_height - self.style.margin;
        self.at_top = true;
    }

    fn ensure(&mut self, height: f32) {
        if !self.at_top && self.y - height < self.style.margin {
            self.break_page();
        }
    }

    /// Vertical space that collapses at the top of a page.
    fn gap(&mut self, height: f32) {
        if !self.at_top {
            self.y -= height;
        }
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, gray: f32) {
        self.ops.push(Operation::new("q", vec![]));
        self.ops.push(Operation::new("g", vec![Object::Real(gray)]));
        self.ops.push(Operation::new(
            "re",
            vec![
                Object::Real(x),
                Object::Real(y),
                Object::Real(w),
                Object::Real(h),
            ],
        ));
        self.ops.push(Operation::new("f", vec![]));
        self.ops.push(Operation::new("Q", vec![]));
        self.at_top = false;
    }

    fn text(&mut self, face: Face, size: f32, x: f32, baseline: f32, text: &str) {
        let used = self.used.entry(face).or_default();
        let encoded = self.fonts.font(face).encode(text, used);
        if encoded.is_empty() {
            return;
        }
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new(
            "Tf",
            vec![face.resource().into(), Object::Real(size)],
        ));
        self.ops.push(Operation::new(
            "Td",
            vec![Object::Real(x), Object::Real(baseline)],
        ));
        self.ops.push(Operation::new(
            "Tj",
            vec![Object::String(encoded, StringFormat::Hexadecimal)],
        ));
        self.ops.push(Operation::new("ET", vec![]));
        self.at_top = false;
    }

    pub(super) fn block(&mut self, block: &Block) {
        match block.kind {
            BlockKind::Rule => self.rule(block),
            BlockKind::Code => self.code(block),
            _ => self.text_block(block),
        }
    }

    fn rule(&mut self, block: &Block) {
        let size = self.style.font_size;
        self.gap(size * 0.5);
        self.ensure(size);
        let x0 = self.style.margin + block.indent;
        let x1 = self.style.margin + self.content_width();
        let y = self.y - size * 0.5;
        self.ops.push(Operation::new("q", vec![]));
        self.ops.push(Operation::new("G", vec![Object::Real(0.6)]));
        self.ops.push(Operation::new("w", vec![Object::Real(0.75)]));
        self.ops.push(Operation::new("m", vec![Object::Real(x0), Object::Real(y)]));
        self.ops.push(Operation::new("l", vec![Object::Real(x1), Object::Real(y)]));
        self.ops.push(Operation::new("S", vec![]));
        self.ops.push(Operation::new("Q", vec![]));
        self.at_top = false;
        self.y -= size;
    }

    fn text_block(&mut self, block: &Block) {
        let style = self.style;
        let size = match block.kind {
            BlockKind::Heading(level) => {
                style.font_size * style.heading_scale[level.clamp(1, 6) - 1]
            }
            _ => style.font_size,
        };
        let line_h = size * style.line_spacing;
        let x0 = style.margin + block.indent;
        let width = self.content_width() - block.indent;

        let mut lines = wrap(self.fonts, &block.spans, size, width);
        if lines.is_empty() {
            lines.push(Vec::new());
        }

        if let BlockKind::Heading(_) = block.kind {
            self.gap(size * 0.6);
            // Keep the heading on the same page as the first lines after it.
            let keep = line_h * lines.len() as f32 + 2.0 * self.body_line();
            self.ensure(keep);
        }

        for (i, line) in lines.iter().enumerate() {
            self.ensure(line_h);
            let top = self.y;
            let baseline = top - size;

            if let (0, BlockKind::Item { marker }) = (i, &block.kind) {
                let mx = x0 - style.indent_step * 0.8;
                self.text(Face::Regular, size, mx, baseline, marker);
            }
            if block.kind == BlockKind::Quote {
                self.fill_rect(x0 - 10.0, top - line_h, 2.0, line_h, 0.75);
            }

            let mut x = x0;
            for run in line {
                let w = self.fonts.text_width(run.face, &run.text, size);
                if run.shaded {
                    let pad = style.inline_code_padding;
                    self.fill_rect(x - pad, baseline - size * 0.25, w + 2.0 * pad, size * 1.1, style.shade);
                }
                self.text(run.face, size, x, baseline, &run.text);
                x += w;
            }
            self.y -= line_h;
            self.at_top = false;
        }

        let after = match block.kind {
            BlockKind::Heading(_) => style.font_size * 0.3,
            BlockKind::Item { .. } => style.font_size * 0.2,
            _ => style.font_size * 0.6,
        };
        self.y -= after;
    }

    fn code(&mut self, block: &Block) {
        let style = self.style;
        let size = style.code_font_size;
        let line_h = size * style.line_spacing;
        let pad = style.code_padding;
        let x0 = style.margin + block.indent;
        let width = self.content_width() - block.indent;
        let advance = self.fonts.char_width(Face::Mono, 'M', size);
        let max_chars = (((width - 2.0 * pad) / advance).floor() as usize).max(1);

        let raw: String = block.spans.iter().map(|s| s.text.as_str()).collect();
        let raw = raw.replace('\t', "    ");
        let body = raw.strip_suffix('\n').unwrap_or(&raw);

        self.gap(style.font_size * 0.2);
        self.ensure(pad + line_h);
        self.fill_rect(x0, self.y - pad, width, pad, style.shade);
        self.y -= pad;

        for source_line in body.split('\n') {
            let chars: Vec<char> = source_line.chars().collect();
            let chunks: Vec<String> = if chars.is_empty() {
                vec![String::new()]
            } else {
                chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
            };
            for chunk in chunks {
                self.ensure(line_h);
                self.fill_rect(x0, self.y - line_h, width, line_h, style.shade);
                self.text(Face::Mono, size, x0 + pad, self.y - size, &chunk);
                self.y -= line_h;
            }
        }

        self.ensure(pad);
        self.fill_rect(x0, self.y - pad, width, pad, style.shade);
        self.y -= pad + style.font_size * 0.6;
    }

    pub(super) fn finish(mut self) -> (Vec<Vec<Operation>>, BTreeMap<Face, BTreeMap<u16, char>>) {
        if !self.ops.is_empty() || self.pages.is_empty() {
            self.pages.push(std::mem::take(&mut self.ops));
        }
        (self.pages, self.used)
    }
}

pub(super) fn assemble(
    pages: Vec<Vec<Operation>>,
    used: &BTreeMap<Face, BTreeMap<u16, char>>,
    fonts: &FontSet,
    style: &PrintStyle,
) -> PipelineResult<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    // Only faces that were drawn get embedded.
    let mut font_resources = Dictionary::new();
    for (face, glyphs) in used.iter().filter(|(_, g)| !g.is_empty()) {
        let font_id = fonts.font(*face).embed(&mut doc, glyphs);
        font_resources.set(face.resource(), font_id);
    }
    let resources_id = doc.add_object(dictionary! {
        "Font" => font_resources,
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations };
        let bytes = content
            .encode()
            .map_err(|e| PipelineError::processing(format!("failed to encode PDF page: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, bytes));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(style.page_width),
                Object::Real(style.page_height),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| PipelineError::processing(format!("failed to write PDF: {}", e)))?;
    Ok(out)
}
