//! The relocatable object module: three segments, a symbol table and the
//! address-usage (relocation) table, plus its binary file format.
use crate::address::{Address, AddressType, SegmentKind};
use crate::segment::{new_segments, Segment};
use crate::wire::{Reader, Writer};
use crate::Error;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const OBJECT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: u16,
    pub name: String,
    pub address: Address,
    /// visible to other modules at link time
    pub public: bool,
    /// the pass in which the symbol was last (re)defined; 0 for declarations only
    pub pass: u32,
}
impl Symbol {
    pub fn new(id: u16, name: &str, address: Address) -> Self {
        Symbol {
            id,
            name: name.to_string(),
            address,
            public: false,
            pass: 0,
        }
    }
    /// Symbols that are written to object files: public definitions and external references.
    pub fn is_exported(&self) -> bool { self.address.is_external() || (self.public && !self.address.is_undefined()) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub segments: [Segment; 3],
    pub symbols: BTreeMap<u16, Symbol>,
    /// patch site -> value to be written there once it is known
    pub usage: BTreeMap<Address, Address>,
}
impl Default for Object {
    fn default() -> Self { Object::new() }
}
impl Object {
    pub fn new() -> Self {
        Object {
            segments: new_segments(),
            symbols: BTreeMap::new(),
            usage: BTreeMap::new(),
        }
    }
    pub fn segment(&self, kind: SegmentKind) -> &Segment { &self.segments[kind.index()] }
    pub fn segment_mut(&mut self, kind: SegmentKind) -> &mut Segment { &mut self.segments[kind.index()] }

    /// Record that `value` must be written at `site` once it is known.
    pub fn add_usage(&mut self, site: Address, value: Address) { self.usage.insert(site, value); }

    /// The name behind an `External` address's id.
    pub fn symbol_name(&self, id: u16) -> Option<&str> { self.symbols.get(&id).map(|s| s.name.as_str()) }

    /// Public, defined symbols (the names this module exports).
    pub fn public_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values().filter(|s| s.public && !s.address.is_external() && !s.address.is_undefined())
    }
    /// Names this module references but does not define.
    pub fn externals(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values().filter(|s| s.address.is_external())
    }

    pub fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.u16(OBJECT_VERSION);
        for seg in &self.segments {
            w.count(seg.len(), "segment bytes")?;
            w.bytes(seg.bytes());
        }
        let exported: Vec<&Symbol> = self.symbols.values().filter(|s| s.is_exported()).collect();
        w.count(exported.len(), "symbols")?;
        for sym in exported {
            w.u16(sym.id);
            w.string(&sym.name);
            sym.address.write(w);
        }
        w.count(self.usage.len(), "address usages")?;
        for (site, value) in &self.usage {
            site.write(w);
            value.write(w);
        }
        Ok(())
    }
    pub fn read(r: &mut Reader) -> Result<Object, Error> {
        let version = r.u16()?;
        if version != OBJECT_VERSION {
            return Err(format_err!("unsupported object version {}", version));
        }
        let mut obj = Object::new();
        for kind in SegmentKind::ALL {
            let n = r.u16()? as usize;
            obj.segment_mut(kind).extend(r.bytes(n)?);
        }
        let count = r.u16()?;
        for _ in 0..count {
            let id = r.u16()?;
            let name = r.string()?;
            let address = Address::read(r)?;
            let mut sym = Symbol::new(id, &name, address);
            sym.public = !address.is_external();
            obj.symbols.insert(id, sym);
        }
        let count = r.u16()?;
        for _ in 0..count {
            let site = Address::read(r)?;
            if site.segment().is_none() {
                return Err(format_err!("address usage site {} is not in a segment", site));
            }
            let value = Address::read(r)?;
            if let AddressType::External(id) = value.kind {
                if !obj.symbols.contains_key(&id) {
                    return Err(format_err!("address usage refers to unknown external #{}", id));
                }
            }
            obj.usage.insert(site, value);
        }
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut w = Writer::new();
        self.write(&mut w)?;
        Ok(w.into_bytes())
    }
    pub fn from_bytes(bytes: &[u8]) -> Result<Object, Error> {
        let mut r = Reader::new(bytes);
        let obj = Object::read(&mut r)?;
        if !r.is_empty() {
            return Err(format_err!("trailing bytes after object module"));
        }
        Ok(obj)
    }
    pub fn write_to_file(&self, path: &Path) -> Result<(), Error> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
    pub fn read_from_file(path: &Path) -> Result<Object, Error> {
        let bytes = fs::read(path)
            .map_err(|e| Error::new(crate::ErrorKind::IO, None, &format!("{}: {}", path.display(), e)))?;
        Object::from_bytes(&bytes).map_err(|e| format_err!("{}: {}", path.display(), e.msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Part;

    /// A module with a public routine in code, a private label, an external
    /// reference patched into data and a relocated high byte.
    fn sample() -> Object {
        let mut obj = Object::new();
        obj.segment_mut(SegmentKind::Code).extend(&[0xa9, 0x00, 0x60, 0x4c, 0x00, 0x00]);
        obj.segment_mut(SegmentKind::Data).extend(&[0x00, 0x00]);
        obj.segment_mut(SegmentKind::ZeroPage).extend(&[0; 4]);
        let mut start = Symbol::new(1, "START", Address::in_segment(SegmentKind::Code, 0));
        start.public = true;
        obj.symbols.insert(1, start);
        obj.symbols.insert(2, Symbol::new(2, "local", Address::in_segment(SegmentKind::Code, 2)));
        obj.symbols.insert(3, Symbol::new(3, "PRINT", Address::external(3)));
        obj.add_usage(
            Address::in_segment(SegmentKind::Data, 0),
            Address::new(AddressType::External(3), 1),
        );
        obj.add_usage(
            Address::in_segment(SegmentKind::Code, 1),
            Address {
                part: Part::HighByte,
                ..Address::in_segment(SegmentKind::Data, 0)
            },
        );
        obj.add_usage(
            Address::in_segment(SegmentKind::Code, 4),
            Address::in_segment(SegmentKind::Code, 2),
        );
        obj
    }

    #[test]
    fn round_trip() -> Result<(), Error> {
        let obj = sample();
        let back = Object::from_bytes(&obj.to_bytes()?)?;
        assert_eq!(back.segments, obj.segments);
        assert_eq!(back.usage, obj.usage);
        // only exported symbols travel
        let names: Vec<&str> = back.symbols.values().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["START", "PRINT"]);
        assert_eq!(back.symbols[&1].address, obj.symbols[&1].address);
        assert!(back.symbols[&1].public);
        assert_eq!(back.externals().count(), 1);
        assert_eq!(back.symbol_name(3), Some("PRINT"));
        Ok(())
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Object::from_bytes(&[2, 0]).is_err());
        let mut bytes = sample().to_bytes().unwrap();
        bytes.push(0);
        assert_eq!(Object::from_bytes(&bytes).unwrap_err().kind, crate::ErrorKind::Format);
        let bytes = sample().to_bytes().unwrap();
        assert!(Object::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
