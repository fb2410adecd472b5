//! Bundled DejaVu faces, read straight from their TrueType tables and
//! embedded as Type0 fonts (Identity-H, glyph ids as codes) with a
//! ToUnicode map so the PDF text stays searchable.

use std::collections::BTreeMap;

use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Error)]
pub enum FontError {
    #[error("font {font}: missing table {table}")]
    MissingTable { font: &'static str, table: String },
    #[error("font {font}: malformed {what}")]
    Malformed { font: &'static str, what: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Face {
    Regular,
    Bold,
    Italic,
    Mono,
}

impl Face {
    pub(crate) fn resource(self) -> &'static str {
        match self {
            Face::Regular => "F1",
            Face::Bold => "F2",
            Face::Italic => "F3",
            Face::Mono => "F4",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

// FontDescriptor flags.
const FIXED_PITCH: i64 = 1;
const NONSYMBOLIC: i64 = 32;
const ITALIC: i64 = 64;

static BUNDLED: Lazy<Result<FontSet, FontError>> = Lazy::new(|| {
    Ok(FontSet {
        faces: [
            TrueType::parse(
                "DejaVuSans",
                include_bytes!("../../fonts/DejaVuSans.ttf"),
                NONSYMBOLIC,
            )?,
            TrueType::parse(
                "DejaVuSans-Bold",
                include_bytes!("../../fonts/DejaVuSans-Bold.ttf"),
                NONSYMBOLIC,
            )?,
            TrueType::parse(
                "DejaVuSans-Oblique",
                include_bytes!("../../fonts/DejaVuSans-Oblique.ttf"),
                NONSYMBOLIC | ITALIC,
            )?,
            TrueType::parse(
                "DejaVuSansMono",
                include_bytes!("../../fonts/DejaVuSansMono.ttf"),
                NONSYMBOLIC | FIXED_PITCH,
            )?,
        ],
    })
});

pub(crate) fn bundled() -> PipelineResult<&'static FontSet> {
    BUNDLED
        .as_ref()
        .map_err(|e| PipelineError::processing(format!("bundled font unusable: {}", e)))
}

pub(crate) struct FontSet {
    faces: [TrueType; 4],
}

impl FontSet {
    pub(crate) fn font(&self, face: Face) -> &TrueType {
        &self.faces[face.index()]
    }

    pub(crate) fn char_width(&self, face: Face, c: char, size: f32) -> f32 {
        self.font(face).width(c, size)
    }

    pub(crate) fn text_width(&self, face: Face, text: &str, size: f32) -> f32 {
        let font = self.font(face);
        text.chars().map(|c| font.width(c, size)).sum()
    }

    /// Characters of `text` the face has no glyph for. Control characters
    /// are never drawn and are not reported.
    pub(crate) fn missing(&self, face: Face, text: &str) -> Vec<char> {
        let font = self.font(face);
        text.chars()
            .filter(|c| !c.is_control() && font.glyph(*c).is_none())
            .collect()
    }
}

pub(crate) struct TrueType {
    name: &'static str,
    data: &'static [u8],
    flags: i64,
    units_per_em: u16,
    bbox: [i16; 4],
    ascent: i16,
    descent: i16,
    italic_angle: f32,
    cmap: &'static [u8],
    cmap_format: u16,
    hmtx: &'static [u8],
    h_metrics: usize,
}

fn u16_at(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn i16_at(data: &[u8], at: usize) -> Option<i16> {
    u16_at(data, at).map(|v| v as i16)
}

fn u32_at(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

impl TrueType {
    fn parse(name: &'static str, data: &'static [u8], flags: i64) -> Result<Self, FontError> {
        let malformed = |what| FontError::Malformed { font: name, what };
        let table = |tag: &[u8; 4]| -> Result<&'static [u8], FontError> {
            let count = u16_at(data, 4).ok_or_else(|| malformed("table directory"))? as usize;
            for i in 0..count {
                let record = 12 + i * 16;
                if data.get(record..record + 4) != Some(&tag[..]) {
                    continue;
                }
                let offset = u32_at(data, record + 8).ok_or_else(|| malformed("table record"))? as usize;
                let len = u32_at(data, record + 12).ok_or_else(|| malformed("table record"))? as usize;
                return data
                    .get(offset..offset + len)
                    .ok_or_else(|| malformed("table bounds"));
            }
            Err(FontError::MissingTable {
                font: name,
                table: String::from_utf8_lossy(tag).into_owned(),
            })
        };

        let head = table(b"head")?;
        let hhea = table(b"hhea")?;
        let hmtx = table(b"hmtx")?;
        let cmap_table = table(b"cmap")?;

        let units_per_em = u16_at(head, 18)
            .filter(|v| *v > 0)
            .ok_or_else(|| malformed("head"))?;
        let mut bbox = [0i16; 4];
        for (i, v) in bbox.iter_mut().enumerate() {
            *v = i16_at(head, 36 + 2 * i).ok_or_else(|| malformed("head"))?;
        }
        let ascent = i16_at(hhea, 4).ok_or_else(|| malformed("hhea"))?;
        let descent = i16_at(hhea, 6).ok_or_else(|| malformed("hhea"))?;
        let h_metrics = u16_at(hhea, 34)
            .filter(|v| *v > 0 && hmtx.len() >= *v as usize * 4)
            .ok_or_else(|| malformed("hhea"))? as usize;
        let italic_angle = table(b"post")
            .ok()
            .and_then(|post| u32_at(post, 4))
            .map(|fixed| fixed as i32 as f32 / 65536.0)
            .unwrap_or(0.0);
        let (cmap, cmap_format) = select_cmap(cmap_table).ok_or_else(|| malformed("cmap"))?;

        Ok(Self {
            name,
            data,
            flags,
            units_per_em,
            bbox,
            ascent,
            descent,
            italic_angle,
            cmap,
            cmap_format,
            hmtx,
            h_metrics,
        })
    }

    pub(crate) fn glyph(&self, c: char) -> Option<u16> {
        let gid = match self.cmap_format {
            12 => lookup_segmented(self.cmap, c as u32),
            _ => lookup_segment_delta(self.cmap, c as u32),
        };
        gid.filter(|g| *g != 0)
    }

    fn advance(&self, gid: u16) -> u16 {
        let idx = (gid as usize).min(self.h_metrics - 1);
        u16_at(self.hmtx, idx * 4).unwrap_or(0)
    }

    /// Glyph-space units (1/1000 em), as PDF font dictionaries expect.
    fn scaled(&self, v: i32) -> i64 {
        v as i64 * 1000 / self.units_per_em as i64
    }

    fn width(&self, c: char, size: f32) -> f32 {
        match self.glyph(c) {
            Some(gid) => self.advance(gid) as f32 * size / self.units_per_em as f32,
            None => 0.0,
        }
    }

    /// Two-byte glyph ids for an Identity-H string. Unmapped characters
    /// are dropped; callers reject them up front.
    pub(crate) fn encode(&self, text: &str, used: &mut BTreeMap<u16, char>) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() * 2);
        for c in text.chars() {
            if let Some(gid) = self.glyph(c) {
                used.entry(gid).or_insert(c);
                out.extend_from_slice(&gid.to_be_bytes());
            }
        }
        out
    }

    /// Adds the font program, descriptor, descendant CID font and ToUnicode
    /// map, returning the Type0 font to reference from page resources.
    pub(crate) fn embed(&self, doc: &mut Document, used: &BTreeMap<u16, char>) -> ObjectId {
        let file_id = doc.add_object(Stream::new(
            dictionary! { "Length1" => self.data.len() as i64 },
            self.data.to_vec(),
        ));
        let bbox: Vec<Object> = self
            .bbox
            .iter()
            .map(|v| Object::Integer(self.scaled(*v as i32)))
            .collect();
        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => self.name,
            "Flags" => self.flags,
            "FontBBox" => bbox,
            "ItalicAngle" => self.italic_angle,
            "Ascent" => self.scaled(self.ascent as i32),
            "Descent" => self.scaled(self.descent as i32),
            "CapHeight" => self.scaled(self.ascent as i32),
            "StemV" => 80,
            "FontFile2" => file_id,
        });

        let mut widths = Vec::with_capacity(used.len() * 2);
        for gid in used.keys() {
            widths.push(Object::Integer(*gid as i64));
            widths.push(Object::Array(vec![Object::Integer(
                self.scaled(self.advance(*gid) as i32),
            )]));
        }
        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => self.name,
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "W" => widths,
            "CIDToGIDMap" => "Identity",
        });
        let to_unicode_id = doc.add_object(Stream::new(
            dictionary! {},
            to_unicode_cmap(used).into_bytes(),
        ));
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => self.name,
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        })
    }
}

/// Picks the best Unicode subtable: format 12 (full range) over format 4
/// (BMP). Returns the subtable bytes and its format.
fn select_cmap(cmap: &'static [u8]) -> Option<(&'static [u8], u16)> {
    let count = u16_at(cmap, 2)? as usize;
    let mut best: Option<(u8, usize, u16)> = None;
    for i in 0..count {
        let record = 4 + i * 8;
        let platform = u16_at(cmap, record)?;
        let encoding = u16_at(cmap, record + 2)?;
        let offset = u32_at(cmap, record + 4)? as usize;
        let format = u16_at(cmap, offset)?;
        let unicode = platform == 0 || (platform == 3 && (encoding == 1 || encoding == 10));
        let rank = match format {
            12 if unicode => 0,
            4 if unicode => 1,
            _ => continue,
        };
        if best.map_or(true, |(r, _, _)| rank < r) {
            best = Some((rank, offset, format));
        }
    }
    let (_, offset, format) = best?;
    Some((cmap.get(offset..)?, format))
}

/// Format 4: segment mapping to delta values.
fn lookup_segment_delta(table: &[u8], c: u32) -> Option<u16> {
    let c = u16::try_from(c).ok()?;
    let seg_x2 = u16_at(table, 6)? as usize;
    let ends = 14;
    let starts = ends + seg_x2 + 2;
    let deltas = starts + seg_x2;
    let ranges = deltas + seg_x2;
    for seg in (0..seg_x2).step_by(2) {
        if c > u16_at(table, ends + seg)? {
            continue;
        }
        let start = u16_at(table, starts + seg)?;
        if c < start {
            return None;
        }
        let delta = u16_at(table, deltas + seg)?;
        let range = u16_at(table, ranges + seg)? as usize;
        if range == 0 {
            return Some(c.wrapping_add(delta));
        }
        let at = ranges + seg + range + 2 * (c - start) as usize;
        return match u16_at(table, at)? {
            0 => None,
            g => Some(g.wrapping_add(delta)),
        };
    }
    None
}

/// Format 12: segmented coverage with sequential glyph ids.
fn lookup_segmented(table: &[u8], c: u32) -> Option<u16> {
    let groups = u32_at(table, 12)? as usize;
    for i in 0..groups {
        let group = 16 + i * 12;
        let start = u32_at(table, group)?;
        if c < start {
            return None;
        }
        if c <= u32_at(table, group + 4)? {
            let gid = u32_at(table, group + 8)?.checked_add(c - start)?;
            return u16::try_from(gid).ok();
        }
    }
    None
}

fn to_unicode_cmap(used: &BTreeMap<u16, char>) -> String {
    let mut out = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    let entries: Vec<(&u16, &char)> = used.iter().collect();
    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, c) in chunk {
            let mut units = [0u16; 2];
            let utf16: String = c
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{:04X}", u))
                .collect();
            out.push_str(&format!("<{:04X}> <{}>\n", gid, utf16));
        }
        out.push_str("endbfchar\n");
    }
    out.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_faces_parse() {
        let fonts = bundled().unwrap();
        for face in [Face::Regular, Face::Bold, Face::Italic, Face::Mono] {
            let font = fonts.font(face);
            assert!(font.glyph('A').is_some(), "{} has no 'A'", font.name);
            assert!(font.glyph(' ').is_some());
        }
        assert!(fonts.font(Face::Italic).italic_angle < 0.0);
    }

    #[test]
    fn greek_arrows_and_math_have_glyphs() {
        let fonts = bundled().unwrap();
        assert!(fonts.missing(Face::Regular, "α → β ≤ γ, ∑ x², Células").is_empty());
        assert_eq!(fonts.missing(Face::Regular, "漢字"), vec!['漢', '字']);
        assert!(fonts.missing(Face::Regular, "tab\there\r").is_empty());
    }

    #[test]
    fn mono_face_has_uniform_advance() {
        let fonts = bundled().unwrap();
        let i = fonts.char_width(Face::Mono, 'i', 10.0);
        let m = fonts.char_width(Face::Mono, 'M', 10.0);
        assert!(i > 0.0);
        assert_eq!(i, m);
        assert!(
            fonts.char_width(Face::Regular, 'i', 10.0) < fonts.char_width(Face::Regular, 'M', 10.0)
        );
    }

    #[test]
    fn to_unicode_map_uses_utf16() {
        let mut used = BTreeMap::new();
        used.insert(0x0024, 'A');
        used.insert(0x0100, '𝑥');
        let cmap = to_unicode_cmap(&used);
        assert!(cmap.contains("2 beginbfchar"));
        assert!(cmap.contains("<0024> <0041>"));
        assert!(cmap.contains("<0100> <D835DC65>"));
    }
}
