//! Little-endian byte writer and reader used by the object and library file formats.
use crate::Error;

#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}
impl Writer {
    pub fn new() -> Self { Writer::default() }
    pub fn u8(&mut self, v: u8) { self.buf.push(v) }
    pub fn i8(&mut self, v: i8) { self.buf.push(v as u8) }
    pub fn u16(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_le_bytes()) }
    pub fn bytes(&mut self, b: &[u8]) { self.buf.extend_from_slice(b) }
    /// A string is a u16 byte count followed by UTF-8 bytes.
    pub fn string(&mut self, s: &str) {
        self.u16(s.len() as u16);
        self.bytes(s.as_bytes());
    }
    /// Write a u16 element count, failing if the collection is too large for the format.
    pub fn count(&mut self, n: usize, what: &str) -> Result<(), Error> {
        let n = u16::try_from(n).map_err(|_| format_err!("too many {} ({}) for the object format", what, n))?;
        self.u16(n);
        Ok(())
    }
    pub fn into_bytes(self) -> Vec<u8> { self.buf }
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}
impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self { Reader { buf, pos: 0 } }
    pub fn is_empty(&self) -> bool { self.pos >= self.buf.len() }
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(format_err!("unexpected end of file at offset {}", self.pos));
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }
    pub fn u8(&mut self) -> Result<u8, Error> { Ok(self.bytes(1)?[0]) }
    pub fn u16(&mut self) -> Result<u16, Error> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
    pub fn string(&mut self) -> Result<String, Error> {
        let len = self.u16()? as usize;
        let b = self.bytes(len)?;
        String::from_utf8(b.to_vec()).map_err(|_| format_err!("invalid UTF-8 in name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_and_truncation() -> Result<(), Error> {
        let mut w = Writer::new();
        w.string("LOOP");
        w.u16(0xbeef);
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..6], &[4, 0, b'L', b'O', b'O', b'P']);
        let mut r = Reader::new(&bytes);
        assert_eq!(r.string()?, "LOOP");
        assert_eq!(r.u16()?, 0xbeef);
        assert!(r.u8().is_err());
        Ok(())
    }
}
