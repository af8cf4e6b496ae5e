//! Writers for the linked memory image.
use crate::hex::HexRecordCollection;
use crate::Error;
use std::io::Write;
use std::path::Path;

pub trait TargetWriter {
    fn name(&self) -> &'static str;
    /// Write `bytes`, which are to be loaded at `base`.
    fn write(&self, base: u16, bytes: &[u8], out: &mut dyn Write) -> Result<(), Error>;
}

/// The bytes as they are.
pub struct Binary;
impl TargetWriter for Binary {
    fn name(&self) -> &'static str { "binary" }
    fn write(&self, _base: u16, bytes: &[u8], out: &mut dyn Write) -> Result<(), Error> {
        out.write_all(bytes)?;
        Ok(())
    }
}

pub struct IntelHex;
impl TargetWriter for IntelHex {
    fn name(&self) -> &'static str { "Intel HEX" }
    fn write(&self, base: u16, bytes: &[u8], out: &mut dyn Write) -> Result<(), Error> {
        HexRecordCollection::from_image(base, bytes)?.write(out)
    }
}

/// Load address (little-endian) followed by the bytes, as read by Commodore style loaders.
pub struct TapeImage;
impl TargetWriter for TapeImage {
    fn name(&self) -> &'static str { "tape image" }
    fn write(&self, base: u16, bytes: &[u8], out: &mut dyn Write) -> Result<(), Error> {
        out.write_all(&base.to_le_bytes())?;
        out.write_all(bytes)?;
        Ok(())
    }
}

/// Pick the writer for a target file by its extension.
pub fn writer_for(path: &Path) -> Box<dyn TargetWriter> {
    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("hex") => Box::new(IntelHex),
        Some("prg") | Some("tap") => Box::new(TapeImage),
        _ => Box::new(Binary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(path: &str, base: u16, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        writer_for(Path::new(path)).write(base, bytes, &mut out).unwrap();
        out
    }

    #[test]
    fn chosen_by_extension() {
        assert_eq!(writer_for(Path::new("a.HEX")).name(), "Intel HEX");
        assert_eq!(writer_for(Path::new("a.prg")).name(), "tape image");
        assert_eq!(writer_for(Path::new("a.tap")).name(), "tape image");
        assert_eq!(writer_for(Path::new("a.bin")).name(), "binary");
        assert_eq!(writer_for(Path::new("rom")).name(), "binary");
    }

    #[test]
    fn image_formats() {
        assert_eq!(render("x.bin", 0x1000, &[1, 2]), vec![1, 2]);
        assert_eq!(render("x.prg", 0x0801, &[1, 2]), vec![0x01, 0x08, 1, 2]);
        let hex = String::from_utf8(render("x.hex", 0x1000, &[0xa9, 0x00, 0x60])).unwrap();
        assert_eq!(hex, ":03100000A90060E4\n:00000001FF\n");
    }
}
