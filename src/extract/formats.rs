//! Format detection and per-format text extraction for uploaded resources.

use encoding_rs::{Encoding, WINDOWS_1252};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};
use std::io::{Cursor, Read, Seek};
use thiserror::Error;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const ODT_MIME: &str = "application/vnd.oasis.opendocument.text";
const ODP_MIME: &str = "application/vnd.oasis.opendocument.presentation";
const DOCX_BODY: &str = "word/document.xml";
const ODF_BODY: &str = "content.xml";

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Neither UTF-8 nor a legacy 8-bit text: the bytes hold NULs.
    #[error("content is not text: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("unreadable PDF: {0}")]
    Pdf(String),
    #[error("unreadable office document: {0}")]
    Office(String),
    #[error("unsupported format (mime {mime:?}, file {filename:?})")]
    Unsupported { mime: String, filename: String },
}

/// How the bytes of a resource are turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Html,
    Pdf,
    Docx,
    Pptx,
    /// OpenDocument text or presentation.
    OpenDocument,
    Unsupported,
}

impl DocumentFormat {
    /// Pick a format from the stored mime type, using the filename extension
    /// when the mime type is generic or unknown.
    pub fn detect(mime: &str, filename: &str) -> Self {
        let mime = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let by_mime = match mime.as_str() {
            "application/pdf" => Self::Pdf,
            DOCX_MIME => Self::Docx,
            PPTX_MIME => Self::Pptx,
            ODT_MIME | ODP_MIME => Self::OpenDocument,
            "text/html" | "application/xhtml+xml" => Self::Html,
            "application/json" | "application/xml" | "application/yaml" | "application/x-yaml"
            | "application/toml" => Self::PlainText,
            m if m.starts_with("text/") => Self::PlainText,
            _ => Self::Unsupported,
        };
        if by_mime != Self::Unsupported {
            return by_mime;
        }

        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "pptx" => Self::Pptx,
            "odt" | "odp" => Self::OpenDocument,
            "html" | "htm" | "xhtml" => Self::Html,
            "txt" | "md" | "markdown" | "rst" | "csv" | "tsv" | "json" | "xml" | "yaml" | "yml"
            | "toml" | "tex" => Self::PlainText,
            _ => Self::Unsupported,
        }
    }
}

/// Mime type to record for an upload when the caller gives none.
pub fn guess_mime(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "docx" => DOCX_MIME,
        "pptx" => PPTX_MIME,
        "odt" => ODT_MIME,
        "odp" => ODP_MIME,
        "html" | "htm" => "text/html",
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        _ => "application/octet-stream",
    }
}

/// Extract plain text from a resource payload.
pub fn extract_text(data: &[u8], mime: &str, filename: &str) -> Result<String, ExtractError> {
    match DocumentFormat::detect(mime, filename) {
        DocumentFormat::PlainText => decode_text(data),
        DocumentFormat::Html => Ok(strip_html(&decode_text(data)?)),
        DocumentFormat::Pdf => pdf_text(data),
        DocumentFormat::Docx => docx_text(data),
        DocumentFormat::Pptx => pptx_text(data),
        DocumentFormat::OpenDocument => odf_text(data),
        DocumentFormat::Unsupported => Err(ExtractError::Unsupported {
            mime: mime.to_string(),
            filename: filename.to_string(),
        }),
    }
}

/// A byte-order mark wins; otherwise UTF-8, falling back to Windows-1252
/// for legacy text. Bytes with NULs and no BOM are binary.
fn decode_text(data: &[u8]) -> Result<String, ExtractError> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(data) {
        let (text, _) = encoding.decode_without_bom_handling(&data[bom_len..]);
        return Ok(text.into_owned());
    }
    match std::str::from_utf8(data) {
        Ok(text) => Ok(text.to_string()),
        Err(err) if data.contains(&0) => Err(ExtractError::InvalidUtf8(err)),
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(data);
            Ok(text.into_owned())
        }
    }
}

fn pdf_text(data: &[u8]) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(data).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Ok(String::new());
    }
    let text = doc
        .extract_text(&pages)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(text.trim_end().to_string())
}

/// Element names that carry text in one office XML dialect.
struct Markup {
    /// Elements whose character data is document text.
    text: &'static [&'static [u8]],
    /// Elements that end a line.
    line_end: &'static [&'static [u8]],
    breaks: &'static [&'static [u8]],
    tabs: &'static [&'static [u8]],
    /// Space runs, with an optional count attribute.
    spaces: Option<(&'static [u8], &'static [u8])>,
}

const WORDPROCESSING: Markup = Markup {
    text: &[b"w:t"],
    line_end: &[b"w:p"],
    breaks: &[b"w:br", b"w:cr"],
    tabs: &[b"w:tab"],
    spaces: None,
};

const DRAWING: Markup = Markup {
    text: &[b"a:t"],
    line_end: &[b"a:p"],
    breaks: &[b"a:br"],
    tabs: &[],
    spaces: None,
};

const OPEN_DOCUMENT: Markup = Markup {
    text: &[b"text:p", b"text:h"],
    line_end: &[b"text:p", b"text:h"],
    breaks: &[b"text:line-break"],
    tabs: &[b"text:tab"],
    spaces: Some((b"text:s", b"text:c")),
};

static SLIDE_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());

fn open_package(data: &[u8]) -> Result<zip::ZipArchive<Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(data)).map_err(|e| ExtractError::Office(e.to_string()))
}

fn read_part<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String, ExtractError> {
    let mut part = archive
        .by_name(name)
        .map_err(|e| ExtractError::Office(format!("{}: {}", name, e)))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| ExtractError::Office(format!("{}: {}", name, e)))?;
    Ok(xml)
}

fn docx_text(data: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_package(data)?;
    markup_text(&read_part(&mut archive, DOCX_BODY)?, &WORDPROCESSING)
}

/// Slides in slide-number order, separated by a blank line.
fn pptx_text(data: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_package(data)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = SLIDE_PART.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut texts = Vec::with_capacity(slides.len());
    for (_, name) in &slides {
        let text = markup_text(&read_part(&mut archive, name)?, &DRAWING)?;
        if !text.is_empty() {
            texts.push(text);
        }
    }
    Ok(texts.join("\n\n"))
}

fn odf_text(data: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_package(data)?;
    markup_text(&read_part(&mut archive, ODF_BODY)?, &OPEN_DOCUMENT)
}

fn space_count(e: &BytesStart<'_>, attr: &[u8]) -> usize {
    e.try_get_attribute(attr)
        .ok()
        .flatten()
        .and_then(|a| std::str::from_utf8(&a.value).ok()?.trim().parse().ok())
        .unwrap_or(1)
}

/// Walk an office XML part, keeping character data inside text elements and
/// turning paragraphs, breaks, tabs and space runs into whitespace.
fn markup_text(xml: &str, markup: &Markup) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if markup.text.contains(&e.name().as_ref()) => depth += 1,
            Ok(Event::End(ref e)) => {
                let name = e.name();
                if markup.text.contains(&name.as_ref()) {
                    depth = depth.saturating_sub(1);
                }
                if markup.line_end.contains(&name.as_ref()) {
                    out.push('\n');
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = e.name();
                let name = name.as_ref();
                if markup.line_end.contains(&name) || markup.breaks.contains(&name) {
                    out.push('\n');
                } else if markup.tabs.contains(&name) {
                    out.push('\t');
                } else if let Some((element, count)) = markup.spaces {
                    if name == element {
                        out.push_str(&" ".repeat(space_count(e, count)));
                    }
                }
            }
            Ok(Event::Text(ref e)) if depth > 0 => {
                let text = e
                    .unescape()
                    .map_err(|err| ExtractError::Office(err.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(ExtractError::Office(err.to_string())),
            _ => {}
        }
    }

    Ok(out.trim_end().to_string())
}

static SCRIPT_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b.*?</(script|style)\s*>").unwrap());
static BLOCK_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|blockquote|pre|table|ul|ol)\s*>").unwrap()
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*)+").unwrap());

fn strip_html(html: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(html, "");
    let text = BLOCK_END.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    BLANK_RUNS.replace_all(text.trim(), "\n\n").to_string()
}

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap()
});

/// Numeric and named HTML5 references; unknown ones and bare `&` stay as
/// written. Non-breaking spaces become plain spaces.
fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |cap: &Captures<'_>| {
            let raw = &cap[0];
            quick_xml::escape::unescape(raw)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| raw.to_string())
        })
        .replace('\u{a0}', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn package(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zw = zip::ZipWriter::new(&mut buf);
            for (name, xml) in parts {
                zw.start_file(*name, zip::write::FileOptions::default())
                    .unwrap();
                zw.write_all(xml.as_bytes()).unwrap();
            }
            zw.finish().unwrap();
        }
        buf.into_inner()
    }

    fn docx_with_body(xml: &str) -> Vec<u8> {
        package(&[(DOCX_BODY, xml)])
    }

    fn slide(text: &[&str]) -> String {
        let paragraphs: String = text
            .iter()
            .map(|t| format!("<a:p><a:r><a:rPr lang=\"en-US\"/><a:t>{}</a:t></a:r></a:p>", t))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main">
<p:cSld><p:spTree><p:sp><p:txBody><a:bodyPr/>{}<a:p><a:endParaRPr/></a:p></p:txBody></p:sp></p:spTree></p:cSld>
</p:sld>"#,
            paragraphs
        )
    }

    #[test]
    fn detect_prefers_mime_then_extension() {
        assert_eq!(DocumentFormat::detect("application/pdf", "x.bin"), DocumentFormat::Pdf);
        assert_eq!(
            DocumentFormat::detect("text/plain; charset=utf-8", "notes"),
            DocumentFormat::PlainText
        );
        assert_eq!(DocumentFormat::detect("TEXT/HTML", "a"), DocumentFormat::Html);
        assert_eq!(DocumentFormat::detect(DOCX_MIME, "a"), DocumentFormat::Docx);
        assert_eq!(
            DocumentFormat::detect("application/octet-stream", "Lecture.DOCX"),
            DocumentFormat::Docx
        );
        assert_eq!(
            DocumentFormat::detect("application/octet-stream", "slides.md"),
            DocumentFormat::PlainText
        );
        assert_eq!(
            DocumentFormat::detect("image/png", "photo.png"),
            DocumentFormat::Unsupported
        );
    }

    #[test]
    fn guessed_mime_round_trips_through_detection() {
        assert_eq!(guess_mime("notes.MD"), "text/markdown");
        assert_eq!(guess_mime("paper.pdf"), "application/pdf");
        assert_eq!(guess_mime("README"), "application/octet-stream");
        assert_eq!(
            DocumentFormat::detect(guess_mime("essay.docx"), "essay.docx"),
            DocumentFormat::Docx
        );
        assert_eq!(
            DocumentFormat::detect(guess_mime("deck.pptx"), "deck.pptx"),
            DocumentFormat::Pptx
        );
        for name in ["notes.odt", "talk.odp"] {
            assert_eq!(
                DocumentFormat::detect(guess_mime(name), name),
                DocumentFormat::OpenDocument
            );
            assert_eq!(
                DocumentFormat::detect("application/octet-stream", name),
                DocumentFormat::OpenDocument
            );
        }
    }

    #[test]
    fn plain_text_honours_bom_then_utf8_then_windows_1252() {
        assert_eq!(
            extract_text("\u{feff}olá".as_bytes(), "text/plain", "a.txt").unwrap(),
            "olá"
        );
        assert_eq!(
            extract_text(&[0xff, 0xfe, b'o', 0, b'k', 0], "text/plain", "utf16.txt").unwrap(),
            "ok"
        );
        assert_eq!(
            extract_text(b"Resumo: fun\xe7\xe3o", "text/plain", "resumo.txt").unwrap(),
            "Resumo: função"
        );
        assert_eq!(
            extract_text(b"\x93quoted\x94 \x80 5", "text/plain", "cp1252.txt").unwrap(),
            "\u{201c}quoted\u{201d} \u{20ac} 5"
        );
    }

    #[test]
    fn binary_bytes_are_not_text() {
        let err = extract_text(&[0x00, 0x01, 0xc3], "text/plain", "blob.txt").unwrap_err();
        assert!(matches!(err, ExtractError::InvalidUtf8(_)));
    }

    #[test]
    fn legacy_html_is_decoded_before_stripping() {
        let text = extract_text(b"<p>Ol\xe1</p>", "text/html", "old.html").unwrap();
        assert_eq!(text, "Olá");
    }

    #[test]
    fn html_drops_markup_scripts_and_entities() {
        let html = "<html><head><style>p{color:red}</style><script>alert(1)</script></head>\
                    <body><h1>Cells</h1><p>Mitochondria &amp; ribosomes</p><p>&lt;ATP&gt;</p></body></html>";
        let text = extract_text(html.as_bytes(), "text/html", "page.html").unwrap();
        assert_eq!(text, "Cells\nMitochondria & ribosomes\n<ATP>");
    }

    #[test]
    fn html_named_and_numeric_entities_are_decoded() {
        let html = b"<p>Caf&eacute; &#233; &#x2192; &ccedil;</p><p>Q&A &bogus; &nbsp;x&hellip;</p>";
        let text = extract_text(html, "text/html", "entities.html").unwrap();
        assert_eq!(text, "Café é → ç\nQ&A &bogus;  x…");
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>Photosynthesis</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Light </w:t></w:r><w:r><w:tab/><w:t>&amp; dark</w:t></w:r></w:p>
</w:body>
</w:document>"#;
        let text = extract_text(&docx_with_body(xml), DOCX_MIME, "bio.docx").unwrap();
        assert_eq!(text, "Photosynthesis\nLight \t& dark");
    }

    #[test]
    fn pptx_slides_are_read_in_slide_order() {
        let first = slide(&["Cell biology", "Membranes &amp; transport"]);
        let second = slide(&["Osmosis"]);
        let tenth = slide(&["Summary"]);
        let notes = slide(&["speaker notes"]);
        let deck = package(&[
            ("ppt/slides/slide10.xml", tenth.as_str()),
            ("ppt/slides/slide2.xml", second.as_str()),
            ("ppt/slides/slide1.xml", first.as_str()),
            ("ppt/slides/_rels/slide1.xml.rels", "<Relationships/>"),
            ("ppt/notesSlides/notesSlide1.xml", notes.as_str()),
        ]);
        let text = extract_text(&deck, PPTX_MIME, "deck.pptx").unwrap();
        assert_eq!(
            text,
            "Cell biology\nMembranes & transport\n\nOsmosis\n\nSummary"
        );
    }

    #[test]
    fn odt_paragraphs_and_headings_become_lines() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0">
<office:body><office:text>
<text:h text:outline-level="1">Genetics</text:h>
<text:p>Alleles<text:s text:c="2"/>and <text:span>loci</text:span><text:tab/>&amp; traits</text:p>
<text:p/>
<text:p>DNA<text:line-break/>RNA</text:p>
</office:text></office:body>
</office:document-content>"#;
        let doc = package(&[("mimetype", ODT_MIME), (ODF_BODY, xml)]);
        let text = extract_text(&doc, ODT_MIME, "genetics.odt").unwrap();
        assert_eq!(text, "Genetics\nAlleles  and loci\t& traits\n\nDNA\nRNA");
    }

    #[test]
    fn broken_archives_and_pdfs_are_errors() {
        let err = extract_text(b"not a zip", DOCX_MIME, "x.docx").unwrap_err();
        assert!(matches!(err, ExtractError::Office(_)));

        let err = extract_text(&docx_with_body("<w:document/>"), ODT_MIME, "x.odt").unwrap_err();
        assert!(matches!(err, ExtractError::Office(_)));

        let err = extract_text(b"%PDF-garbage", "application/pdf", "x.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));

        let err = extract_text(b"\x89PNG", "image/png", "x.png").unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported { .. }));
    }
}
