//! The assembly listing: one row per statement of the final pass showing
//! where it landed and what it produced.
use crate::address::SegmentKind;
use crate::error::SourcePos;
use crate::files::FileTable;
use crate::symbols::AUTO_LABEL_BASE;
use crate::object::Symbol;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

const BYTES_PER_ROW: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLine {
    pub pos: SourcePos,
    pub segment: SegmentKind,
    pub address: u16,
    pub bytes: Vec<u8>,
    pub text: String,
}

#[derive(Debug, Default, Clone)]
pub struct Listing {
    lines: Vec<ListingLine>,
    symbols: Vec<(String, String)>,
}
impl Listing {
    pub fn new() -> Self { Listing::default() }
    pub fn push(&mut self, line: ListingLine) { self.lines.push(line) }
    pub fn clear(&mut self) {
        self.lines.clear();
        self.symbols.clear();
    }
    pub fn lines(&self) -> &[ListingLine] { &self.lines }

    /// Append the symbol table printed after the source rows.
    pub fn set_symbols<'a>(&mut self, symbols: impl Iterator<Item = &'a Symbol>) {
        self.symbols = symbols
            .filter(|s| s.id < AUTO_LABEL_BASE)
            .map(|s| {
                let flag = if s.public { " PUBLIC" } else { "" };
                (s.name.clone(), format!("{}{}", s.address, flag))
            })
            .collect();
        self.symbols.sort();
    }

    pub fn render(&self, files: &FileTable) -> String {
        let mut out = String::new();
        let mut file = None;
        for line in &self.lines {
            if file != Some(line.pos.file) {
                file = Some(line.pos.file);
                _ = writeln!(out, "; {}", files.filename_display(line.pos.file));
            }
            let mut chunks = line.bytes.chunks(BYTES_PER_ROW);
            let first = chunks.next().unwrap_or(&[]);
            _ = writeln!(
                out,
                "{:5} {}:{:04X}  {:24} {}",
                line.pos.line,
                line.segment.letter(),
                line.address,
                hex_bytes(first),
                line.text
            );
            let mut addr = line.address as usize + first.len();
            for more in chunks {
                _ = writeln!(out, "      {}:{:04X}  {}", line.segment.letter(), addr & 0xffff, hex_bytes(more));
                addr += more.len();
            }
        }
        if !self.symbols.is_empty() {
            _ = writeln!(out, "\nSymbols:");
            for (name, value) in &self.symbols {
                _ = writeln!(out, "  {:20} {}", name, value);
            }
        }
        out
    }

    pub fn write_to_file(&self, path: &Path, files: &FileTable) -> Result<(), io::Error> {
        fs::write(path, self.render(files))
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut s = String::new();
    for b in bytes {
        _ = write!(s, "{:02X} ", b);
    }
    s.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;

    #[test]
    fn rows_wrap_after_eight_bytes() {
        let mut files = FileTable::new();
        let id = files.add_source("demo.asm", "msg: db \"hello world\"\n");
        let mut listing = Listing::new();
        listing.push(ListingLine {
            pos: SourcePos::new(id, 1, 1),
            segment: SegmentKind::Data,
            address: 0x10,
            bytes: b"hello world".to_vec(),
            text: "msg: db \"hello world\"".to_string(),
        });
        let mut sym = Symbol::new(1, "msg", Address::in_segment(SegmentKind::Data, 0x10));
        sym.public = true;
        listing.set_symbols([sym].iter());
        let text = listing.render(&files);
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows[0], "; demo.asm");
        assert!(rows[1].starts_with("    1 D:0010  68 65 6C 6C 6F 20 77 6F"));
        assert!(rows[1].ends_with("msg: db \"hello world\""));
        assert_eq!(rows[2], "      D:0018  72 6C 64");
        assert!(text.contains("msg"));
        assert!(text.contains("D:0010 PUBLIC"));
    }
}
