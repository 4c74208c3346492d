//! PDF layout and output with lopdf.
//!
//! Uses the standard Helvetica faces so no fonts need embedding. Those only
//! cover WinAnsi, which limits what text can be rendered.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};

use super::markup::Block;
use super::RenderError;

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;
const BODY_SIZE: f32 = 11.0;
const LINE_SPACING: f32 = 1.4;
const LIST_INDENT: f32 = 18.0;
const BULLET: u8 = 0x95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }

    /// Advance width of a WinAnsi byte in 1/1000 em.
    fn glyph_width(&self, byte: u8) -> u16 {
        if !(32..=126).contains(&byte) {
            return 556;
        }
        let index = (byte - 32) as usize;
        match self {
            Font::Regular => HELVETICA_WIDTHS[index],
            Font::Bold => HELVETICA_BOLD_WIDTHS[index],
        }
    }

    pub fn text_width(&self, text: &[u8], size: f32) -> f32 {
        text.iter()
            .map(|&b| self.glyph_width(b) as f32)
            .sum::<f32>()
            * size
            / 1000.0
    }
}

#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

/// Encode text as WinAnsi (Windows-1252) bytes.
///
/// Tabs become spaces and other control characters are dropped. Anything the
/// encoding cannot represent is an error.
pub fn encode_win_ansi(text: &str) -> Result<Vec<u8>, RenderError> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let byte = match ch {
            '\t' => b' ',
            c if c.is_control() => continue,
            c if (' '..='~').contains(&c) => c as u8,
            c if ('\u{a0}'..='\u{ff}').contains(&c) => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            'ƒ' => 0x83,
            '„' => 0x84,
            '…' => 0x85,
            '†' => 0x86,
            '‡' => 0x87,
            'ˆ' => 0x88,
            '‰' => 0x89,
            'Š' => 0x8a,
            '‹' => 0x8b,
            'Œ' => 0x8c,
            'Ž' => 0x8e,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201c}' => 0x93,
            '\u{201d}' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '˜' => 0x98,
            '™' => 0x99,
            'š' => 0x9a,
            '›' => 0x9b,
            'œ' => 0x9c,
            'ž' => 0x9e,
            'Ÿ' => 0x9f,
            other => return Err(RenderError::Encoding(other)),
        };
        out.push(byte);
    }
    Ok(out)
}

/// Break text into lines no wider than `max_width`.
///
/// Words wider than a whole line are split mid-word.
pub fn wrap(text: &[u8], font: Font, size: f32, max_width: f32) -> Vec<Vec<u8>> {
    let space = font.text_width(b" ", size);
    let mut lines: Vec<Vec<u8>> = Vec::new();
    let mut line: Vec<u8> = Vec::new();
    let mut line_width = 0.0f32;

    for word in text.split(|&b| b == b' ').filter(|w| !w.is_empty()) {
        let word_width = font.text_width(word, size);

        if !line.is_empty() && line_width + space + word_width <= max_width {
            line.push(b' ');
            line.extend_from_slice(word);
            line_width += space + word_width;
            continue;
        }

        if !line.is_empty() {
            lines.push(std::mem::take(&mut line));
        }

        if word_width <= max_width {
            line.extend_from_slice(word);
            line_width = word_width;
            continue;
        }

        // Hard-break an overlong word.
        line_width = 0.0;
        for &byte in word {
            let w = font.text_width(&[byte], size);
            if !line.is_empty() && line_width + w > max_width {
                lines.push(std::mem::take(&mut line));
                line_width = 0.0;
            }
            line.push(byte);
            line_width += w;
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Lays blocks out top to bottom, starting a new page when one fills up.
pub struct PdfWriter {
    pages: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: f32,
}

impl Default for PdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfWriter {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn content_width() -> f32 {
        PAGE_WIDTH - 2.0 * MARGIN
    }

    fn new_page(&mut self) {
        let finished = std::mem::take(&mut self.current);
        self.pages.push(finished);
        self.y = PAGE_HEIGHT - MARGIN;
    }

    /// Make room for `height` points, breaking the page if needed.
    fn reserve(&mut self, height: f32) {
        let at_top = self.y >= PAGE_HEIGHT - MARGIN;
        if self.y - height < MARGIN && !at_top {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f32) {
        if self.y < PAGE_HEIGHT - MARGIN {
            self.y -= height;
        }
    }

    fn draw_text(&mut self, x: f32, font: Font, size: f32, text: Vec<u8>) {
        self.current.extend([
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(font.resource().as_bytes().to_vec()), Object::Real(size)],
            ),
            Operation::new("Td", vec![Object::Real(x), Object::Real(self.y)]),
            Operation::new("Tj", vec![Object::String(text, StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
    }

    /// Write wrapped text; `prefix` is drawn beside the first line.
    fn paragraph(
        &mut self,
        text: &str,
        font: Font,
        size: f32,
        indent: f32,
        prefix: Option<Vec<u8>>,
    ) -> Result<(), RenderError> {
        let encoded = encode_win_ansi(text)?;
        let line_height = size * LINE_SPACING;
        let lines = wrap(&encoded, font, size, Self::content_width() - indent);

        for (i, line) in lines.into_iter().enumerate() {
            self.reserve(line_height);
            self.y -= line_height;
            if i == 0 {
                if let Some(prefix) = prefix.clone() {
                    self.draw_text(MARGIN + indent - LIST_INDENT, Font::Regular, size, prefix);
                }
            }
            self.draw_text(MARGIN + indent, font, size, line);
        }
        Ok(())
    }

    fn rule(&mut self) {
        self.reserve(BODY_SIZE);
        self.y -= BODY_SIZE / 2.0;
        self.current.extend([
            Operation::new("w", vec![Object::Real(0.5)]),
            Operation::new("m", vec![Object::Real(MARGIN), Object::Real(self.y)]),
            Operation::new(
                "l",
                vec![Object::Real(PAGE_WIDTH - MARGIN), Object::Real(self.y)],
            ),
            Operation::new("S", vec![]),
        ]);
        self.y -= BODY_SIZE / 2.0;
    }

    pub fn title(&mut self, text: &str) -> Result<(), RenderError> {
        self.paragraph(text, Font::Bold, 18.0, 0.0, None)?;
        self.gap(BODY_SIZE);
        Ok(())
    }

    pub fn block(&mut self, block: &Block) -> Result<(), RenderError> {
        match block {
            Block::Heading { level, text } => {
                let size = match level {
                    1 => 16.0,
                    2 => 14.0,
                    _ => 12.0,
                };
                self.gap(size * 0.5);
                self.paragraph(text, Font::Bold, size, 0.0, None)?;
                self.gap(size * 0.25);
            }
            Block::Paragraph { text, bold } => {
                let font = if *bold { Font::Bold } else { Font::Regular };
                self.paragraph(text, font, BODY_SIZE, 0.0, None)?;
                self.gap(BODY_SIZE * 0.5);
            }
            Block::Bullet { text } => {
                self.paragraph(text, Font::Regular, BODY_SIZE, LIST_INDENT, Some(vec![BULLET]))?;
            }
            Block::Numbered { number, text } => {
                let marker = format!("{}.", number).into_bytes();
                self.paragraph(text, Font::Regular, BODY_SIZE, LIST_INDENT, Some(marker))?;
            }
            Block::Rule => self.rule(),
        }
        Ok(())
    }

    /// Assemble the document and serialize it.
    pub fn finish(mut self) -> Result<Vec<u8>, RenderError> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.new_page();
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular_id,
                "F2" => bold_id,
            },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(self.pages.len());
        for operations in self.pages {
            let content = Content { operations };
            let stream_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => stream_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(PAGE_WIDTH),
                Object::Real(PAGE_HEIGHT),
            ],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();

        let mut out = Vec::new();
        doc.save_to(&mut out)?;
        Ok(out)
    }
}

/// Render a title and blocks into PDF bytes.
pub fn render_pdf(title: &str, blocks: &[Block]) -> Result<Vec<u8>, RenderError> {
    let mut writer = PdfWriter::new();
    writer.title(title)?;
    for block in blocks {
        writer.block(block)?;
    }
    writer.finish()
}
