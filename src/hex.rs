//! Intel HEX (I8HEX) records, used by the linker to write `.hex` targets.
//!
//! Only the Data and End Of File record types exist in I8HEX, so those are
//! the only ones produced. The format is described in
//! [this wikipedia article](https://en.wikipedia.org/wiki/Intel_HEX).

use crate::Error;
use std::fmt::{self, Display};
use std::io;
use std::ops::Deref;

/// Maximum number of data bytes per record written by [`HexRecordCollection::from_image`].
pub const MAX_DATA: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Data = 0,
    EndOfFile = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    pub address: u16,
    pub record_type: RecordType,
    pub data: Vec<u8>,
}
impl Display for HexRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{:02X}{:04X}{:02X}", self.data.len(), self.address, self.record_type as u8)?;
        for b in &self.data {
            write!(f, "{:02X}", b)?;
        }
        writeln!(f, "{:02X}", self.checksum())
    }
}
impl HexRecord {
    pub fn from_data(address: u16, data: &[u8]) -> Self {
        HexRecord {
            address,
            record_type: RecordType::Data,
            data: data.to_vec(),
        }
    }
    pub fn eof() -> Self {
        HexRecord {
            address: 0,
            record_type: RecordType::EndOfFile,
            data: Vec::new(),
        }
    }
    fn checksum(&self) -> u8 {
        let mut sum = self.data.len() as u8;
        sum = sum.wrapping_add((self.address >> 8) as u8);
        sum = sum.wrapping_add(self.address as u8);
        sum = sum.wrapping_add(self.record_type as u8);
        for &b in &self.data {
            sum = sum.wrapping_add(b);
        }
        sum.wrapping_neg()
    }
}

#[derive(Debug, Default)]
pub struct HexRecordCollection {
    records: Vec<HexRecord>,
    eof: bool,
}

impl HexRecordCollection {
    pub fn new() -> Self { HexRecordCollection::default() }

    /// Records covering `bytes` loaded at `base`, followed by the EOF record.
    pub fn from_image(base: u16, bytes: &[u8]) -> Result<Self, Error> {
        let mut hf = HexRecordCollection::new();
        for (i, chunk) in bytes.chunks(MAX_DATA).enumerate() {
            let address = base.wrapping_add((i * MAX_DATA) as u16);
            hf.add_record(HexRecord::from_data(address, chunk))?;
        }
        hf.add_record(HexRecord::eof())?;
        Ok(hf)
    }
    pub fn add_record(&mut self, h: HexRecord) -> Result<(), Error> {
        if self.eof {
            return Err(format_err!("records after EOF in hex file"));
        }
        if h.record_type == RecordType::EndOfFile {
            self.eof = true
        }
        self.records.push(h);
        Ok(())
    }
    pub fn write(&self, f: &mut dyn io::Write) -> Result<(), Error> {
        if !self.eof {
            return Err(general_err!("cannot write hex file without EOF record"));
        }
        for r in self.iter() {
            f.write_all(r.to_string().as_bytes())?;
        }
        Ok(())
    }
}

impl Deref for HexRecordCollection {
    type Target = Vec<HexRecord>;
    fn deref(&self) -> &Self::Target { &self.records }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_checksums() -> Result<(), Error> {
        let hf = HexRecordCollection::from_image(0x1000, &[0xa9, 0x00, 0x60])?;
        let mut out = Vec::new();
        hf.write(&mut out)?;
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, ":03100000A90060E4\n:00000001FF\n");
        assert_eq!(hf.len(), 2);
        assert_eq!(hf[0], HexRecord::from_data(0x1000, &[0xa9, 0x00, 0x60]));
        Ok(())
    }

    #[test]
    fn long_images_are_split() -> Result<(), Error> {
        let hf = HexRecordCollection::from_image(0xfff0, &[7; 70])?;
        let sizes: Vec<(u16, usize)> = hf.iter().map(|r| (r.address, r.data.len())).collect();
        assert_eq!(sizes, vec![(0xfff0, 32), (0x0010, 32), (0x0030, 6), (0, 0)]);
        Ok(())
    }

    #[test]
    fn eof_record_ends_the_file() {
        let mut hf = HexRecordCollection::new();
        hf.add_record(HexRecord::from_data(0x0200, &[0xea])).unwrap();
        assert!(hf.write(&mut Vec::<u8>::new()).is_err());
        hf.add_record(HexRecord::eof()).unwrap();
        assert!(hf.add_record(HexRecord::from_data(0x0201, &[0x60])).is_err());
        let mut out = Vec::new();
        hf.write(&mut out).unwrap();
        assert_eq!(out, b":01020000EA13\n:00000001FF\n");
    }
}
