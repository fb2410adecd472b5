//! Markdown events grouped into styled blocks ready for line layout.

use pulldown_cmark::{Event, Parser, Tag};

use super::font::Face;
use super::{parser_options, PrintStyle};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum BlockKind {
    Paragraph,
    Heading(usize),
    Code,
    Item { marker: String },
    Quote,
    Rule,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Span {
    pub(super) text: String,
    pub(super) face: Face,
    pub(super) shaded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Block {
    pub(super) kind: BlockKind,
    pub(super) spans: Vec<Span>,
    pub(super) indent: f32,
}

#[derive(Default)]
struct BlockCollector {
    blocks: Vec<Block>,
    current: Option<Block>,
    /// Next number per open list; `None` for bullet lists.
    lists: Vec<Option<u64>>,
    quote_depth: usize,
    bold: usize,
    italic: usize,
    in_code: bool,
    indent_step: f32,
}

impl BlockCollector {
    fn indent(&self) -> f32 {
        (self.lists.len() + self.quote_depth) as f32 * self.indent_step
    }

    fn flush(&mut self) {
        if let Some(block) = self.current.take() {
            let keep = !block.spans.is_empty() || matches!(block.kind, BlockKind::Item { .. });
            if keep {
                self.blocks.push(block);
            }
        }
    }

    fn open(&mut self, kind: BlockKind) {
        self.flush();
        self.current = Some(Block {
            kind,
            spans: Vec::new(),
            indent: self.indent(),
        });
    }

    fn text_kind(&self) -> BlockKind {
        if self.quote_depth > 0 {
            BlockKind::Quote
        } else {
            BlockKind::Paragraph
        }
    }

    fn push(&mut self, text: &str, face: Face, shaded: bool) {
        if self.current.is_none() {
            let kind = self.text_kind();
            self.open(kind);
        }
        if let Some(block) = self.current.as_mut() {
            match block.spans.last_mut() {
                Some(last) if last.face == face && last.shaded == shaded => last.text.push_str(text),
                _ => block.spans.push(Span {
                    text: text.to_string(),
                    face,
                    shaded,
                }),
            }
        }
    }

    fn face(&self) -> Face {
        if self.in_code {
            Face::Mono
        } else if self.bold > 0 {
            Face::Bold
        } else if self.italic > 0 || self.quote_depth > 0 {
            Face::Italic
        } else {
            Face::Regular
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                let face = self.face();
                self.push(&text, face, false);
            }
            Event::Code(text) => self.push(&text, Face::Mono, true),
            Event::Html(text) => {
                let face = self.face();
                self.push(&text, face, false);
            }
            Event::SoftBreak => {
                let face = self.face();
                self.push(" ", face, false);
            }
            Event::HardBreak => {
                let face = self.face();
                self.push("\n", face, false);
            }
            Event::Rule => {
                self.flush();
                self.blocks.push(Block {
                    kind: BlockKind::Rule,
                    spans: Vec::new(),
                    indent: self.indent(),
                });
            }
            Event::TaskListMarker(done) => {
                self.push(if done { "[x] " } else { "[ ] " }, Face::Regular, false);
            }
            Event::FootnoteReference(label) => {
                self.push(&format!("[{}]", label), Face::Regular, false);
            }
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                // Loose list items wrap their text in a paragraph.
                let in_fresh_item = matches!(
                    &self.current,
                    Some(Block { kind: BlockKind::Item { .. }, spans, .. }) if spans.is_empty()
                );
                if !in_fresh_item {
                    let kind = self.text_kind();
                    self.open(kind);
                }
            }
            Tag::Heading(level, _, _) => self.open(BlockKind::Heading(level as usize)),
            Tag::CodeBlock(_) => {
                self.open(BlockKind::Code);
                self.in_code = true;
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let m = format!("{}.", n);
                        *n += 1;
                        m
                    }
                    _ => "•".to_string(),
                };
                self.open(BlockKind::Item { marker });
            }
            Tag::BlockQuote => {
                self.flush();
                self.quote_depth += 1;
            }
            Tag::Emphasis => self.italic += 1,
            Tag::Strong => self.bold += 1,
            Tag::TableHead | Tag::TableRow => {
                self.open(BlockKind::Paragraph);
                self.bold += usize::from(matches!(tag, Tag::TableHead));
            }
            Tag::TableCell => {
                let has_cells = self
                    .current
                    .as_ref()
                    .map(|b| !b.spans.is_empty())
                    .unwrap_or(false);
                if has_cells {
                    let face = self.face();
                    self.push(" | ", face, false);
                }
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph | Tag::Heading(..) | Tag::Item | Tag::TableRow | Tag::Table(_) => {
                self.flush()
            }
            Tag::TableHead => {
                self.flush();
                self.bold = self.bold.saturating_sub(1);
            }
            Tag::CodeBlock(_) => {
                self.flush();
                self.in_code = false;
            }
            Tag::List(_) => {
                self.flush();
                self.lists.pop();
            }
            Tag::BlockQuote => {
                self.flush();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            Tag::Emphasis => self.italic = self.italic.saturating_sub(1),
            Tag::Strong => self.bold = self.bold.saturating_sub(1),
            _ => {}
        }
    }
}

pub(super) fn collect_blocks(markdown: &str, style: &PrintStyle) -> Vec<Block> {
    let mut collector = BlockCollector {
        indent_step: style.indent_step,
        ..Default::default()
    };
    for event in Parser::new_ext(markdown, parser_options()) {
        collector.event(event);
    }
    collector.flush();
    collector.blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::SAMPLE;

    #[test]
    fn blocks_follow_markdown_structure() {
        let blocks = collect_blocks(SAMPLE, &PrintStyle::default());
        assert_eq!(blocks[0].kind, BlockKind::Heading(1));
        assert_eq!(blocks[0].spans[0].text, "Cell Biology");
        assert!(blocks[1]
            .spans
            .iter()
            .any(|s| s.shaded && s.face == Face::Mono && s.text == "ATP"));
        let markers: Vec<&str> = blocks
            .iter()
            .filter_map(|b| match &b.kind {
                BlockKind::Item { marker } => Some(marker.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(markers, vec!["•", "•", "1.", "2."]);
        assert!(blocks.iter().any(|b| b.kind == BlockKind::Quote));
        assert!(blocks.iter().any(|b| b.kind == BlockKind::Code));
        assert!(blocks.iter().any(|b| b.kind == BlockKind::Rule));
    }
}
