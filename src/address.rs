//! Addresses are the values the assembler and linker compute with. An address
//! is either a plain number (`Const`), a location in one of the three
//! relocatable spaces, a reference to a name defined in another module
//! (`External`) or a forward reference that has not been resolved yet
//! (`Undefined`).
//!
//! Only a few combinations of operands make sense once the final location of
//! a module is unknown: a relocatable address may be offset by a constant,
//! two addresses in the same space may be subtracted to give a distance, and
//! constants combine freely. Everything else is an address-usage error.
use crate::wire::{Reader, Writer};
use crate::{Error, ErrorKind};
use std::fmt;

/// The three relocatable address spaces, in object-file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SegmentKind {
    Code = 0,
    Data = 1,
    ZeroPage = 2,
}
impl SegmentKind {
    pub const ALL: [SegmentKind; 3] = [SegmentKind::Code, SegmentKind::Data, SegmentKind::ZeroPage];
    pub fn index(self) -> usize { self as usize }
    pub fn letter(self) -> char {
        match self {
            SegmentKind::Code => 'C',
            SegmentKind::Data => 'D',
            SegmentKind::ZeroPage => 'Z',
        }
    }
}
impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SegmentKind::Code => "CODE",
            SegmentKind::Data => "DATA",
            SegmentKind::ZeroPage => "ZPAGE",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressType {
    Const,
    Code,
    Data,
    ZeroPage,
    /// reference to the symbol with this id in the module's symbol table
    External(u16),
    Undefined,
}
impl AddressType {
    fn tag(self) -> i8 {
        match self {
            AddressType::Const => 0,
            AddressType::Code => 1,
            AddressType::Data => 2,
            AddressType::ZeroPage => 3,
            AddressType::External(_) => 4,
            AddressType::Undefined => -1,
        }
    }
    pub fn segment(self) -> Option<SegmentKind> {
        match self {
            AddressType::Code => Some(SegmentKind::Code),
            AddressType::Data => Some(SegmentKind::Data),
            AddressType::ZeroPage => Some(SegmentKind::ZeroPage),
            _ => None,
        }
    }
}
impl From<SegmentKind> for AddressType {
    fn from(kind: SegmentKind) -> Self {
        match kind {
            SegmentKind::Code => AddressType::Code,
            SegmentKind::Data => AddressType::Data,
            SegmentKind::ZeroPage => AddressType::ZeroPage,
        }
    }
}

/// Which byte(s) of a (possibly relocatable) 16-bit value an address stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Part {
    Word = 0,
    LowByte = 1,
    HighByte = 2,
}
impl Part {
    /// Select this part of a final 16-bit value.
    pub fn apply(self, value: u16) -> u16 {
        match self {
            Part::Word => value,
            Part::LowByte => value & 0xff,
            Part::HighByte => value >> 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub kind: AddressType,
    pub value: u16,
    pub part: Part,
    pub relative: bool,
}

/// Binary operators understood by [`Address::binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}
impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::And => "&",
            Op::Or => "|",
            Op::Xor => "^",
            Op::Shl => "<<",
            Op::Shr => ">>",
        };
        write!(f, "{}", s)
    }
}

const RELATIVE_FLAG: u8 = 0x80;

impl Address {
    pub fn new(kind: AddressType, value: u16) -> Self {
        Address {
            kind,
            value,
            part: Part::Word,
            relative: false,
        }
    }
    pub fn constant(value: u16) -> Self { Address::new(AddressType::Const, value) }
    pub fn undefined() -> Self { Address::new(AddressType::Undefined, 0) }
    pub fn external(id: u16) -> Self { Address::new(AddressType::External(id), 0) }
    pub fn in_segment(kind: SegmentKind, value: u16) -> Self { Address::new(kind.into(), value) }

    pub fn is_const(&self) -> bool { self.kind == AddressType::Const }
    pub fn is_undefined(&self) -> bool { self.kind == AddressType::Undefined }
    pub fn is_external(&self) -> bool { matches!(self.kind, AddressType::External(_)) }
    pub fn is_relocatable(&self) -> bool { self.kind.segment().is_some() }
    pub fn segment(&self) -> Option<SegmentKind> { self.kind.segment() }

    /// True if a constant fits in a byte, reading it as either signed or unsigned.
    pub fn fits_byte(&self) -> bool { self.value <= 0xff || self.value >= 0xff80 }

    /// The low byte of this address. Constants are split immediately; other
    /// kinds keep their value and defer the split to link time.
    pub fn low(self) -> Result<Address, Error> { self.byte_part(Part::LowByte) }
    /// The high byte of this address (see [`Address::low`]).
    pub fn high(self) -> Result<Address, Error> { self.byte_part(Part::HighByte) }

    fn byte_part(self, part: Part) -> Result<Address, Error> {
        if self.part != Part::Word {
            return Err(Error::new(
                ErrorKind::AddressUsage,
                None,
                "cannot take a byte of a byte-sized address",
            ));
        }
        if self.is_const() {
            return Ok(Address::constant(part.apply(self.value)));
        }
        Ok(Address { part, ..self })
    }

    /// Apply a binary operator. See the module documentation for the legal combinations.
    pub fn binary(self, op: Op, rhs: Address) -> Result<Address, Error> {
        use AddressType::*;
        if self.is_const() && rhs.is_const() {
            return Ok(Address::constant(const_op(op, self.value, rhs.value)?));
        }
        if self.part != Part::Word || rhs.part != Part::Word {
            return Err(illegal(op, &self, &rhs));
        }
        let result = match (self.kind, op, rhs.kind) {
            (Undefined, _, k) | (k, _, Undefined) if arith_ok(k, op) => Address::undefined(),
            (Code | Data | ZeroPage | External(_), Op::Add | Op::Sub, Const) => {
                Address::new(self.kind, const_op(op, self.value, rhs.value)?)
            }
            (Const, Op::Add, Code | Data | ZeroPage | External(_)) => {
                Address::new(rhs.kind, self.value.wrapping_add(rhs.value))
            }
            (Code, Op::Sub, Code) | (Data, Op::Sub, Data) | (ZeroPage, Op::Sub, ZeroPage) => {
                Address::constant(self.value.wrapping_sub(rhs.value))
            }
            _ => return Err(illegal(op, &self, &rhs)),
        };
        Ok(result)
    }

    pub fn negate(self) -> Result<Address, Error> {
        match self.kind {
            AddressType::Const => Ok(Address::constant(self.value.wrapping_neg())),
            AddressType::Undefined => Ok(self),
            _ => Err(Error::new(ErrorKind::AddressUsage, None, "cannot negate an address")),
        }
    }
    pub fn complement(self) -> Result<Address, Error> {
        match self.kind {
            AddressType::Const => Ok(Address::constant(!self.value)),
            AddressType::Undefined => Ok(self),
            _ => Err(Error::new(ErrorKind::AddressUsage, None, "cannot complement an address")),
        }
    }

    pub fn write(&self, w: &mut Writer) {
        if self.relative {
            w.u8(RELATIVE_FLAG);
        }
        w.i8(self.kind.tag());
        w.u16(self.value);
        if let AddressType::External(id) = self.kind {
            w.u16(id);
        }
        if !self.is_const() {
            w.u8(self.part as u8);
        }
    }
    pub fn read(r: &mut Reader) -> Result<Address, Error> {
        let mut relative = false;
        let mut tag = r.u8()?;
        if tag == RELATIVE_FLAG {
            relative = true;
            tag = r.u8()?;
        }
        let value = r.u16()?;
        let kind = match tag as i8 {
            0 => AddressType::Const,
            1 => AddressType::Code,
            2 => AddressType::Data,
            3 => AddressType::ZeroPage,
            4 => AddressType::External(r.u16()?),
            -1 => AddressType::Undefined,
            t => return Err(format_err!("invalid address type tag {}", t)),
        };
        let part = if kind == AddressType::Const {
            Part::Word
        } else {
            match r.u8()? {
                0 => Part::Word,
                1 => Part::LowByte,
                2 => Part::HighByte,
                p => return Err(format_err!("invalid address part {}", p)),
            }
        };
        Ok(Address {
            kind,
            value,
            part,
            relative,
        })
    }
}

fn arith_ok(other: AddressType, op: Op) -> bool {
    match other {
        AddressType::Const | AddressType::Undefined => true,
        _ => matches!(op, Op::Add | Op::Sub),
    }
}

fn const_op(op: Op, l: u16, r: u16) -> Result<u16, Error> {
    let v = match op {
        Op::Add => l.wrapping_add(r),
        Op::Sub => l.wrapping_sub(r),
        Op::Mul => l.wrapping_mul(r),
        Op::Div | Op::Mod if r == 0 => {
            return Err(Error::new(ErrorKind::Syntax, None, "division by zero"));
        }
        Op::Div => l / r,
        Op::Mod => l % r,
        Op::And => l & r,
        Op::Or => l | r,
        Op::Xor => l ^ r,
        Op::Shl => l.checked_shl(r as u32).unwrap_or(0),
        Op::Shr => l.checked_shr(r as u32).unwrap_or(0),
    };
    Ok(v)
}

fn illegal(op: Op, l: &Address, r: &Address) -> Error {
    Error::new(
        ErrorKind::AddressUsage,
        None,
        &format!("illegal operation: {} {} {}", l, op, r),
    )
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let prefix = match self.part {
            Part::Word => "",
            Part::LowByte => "<",
            Part::HighByte => ">",
        };
        let rel = if self.relative { "rel " } else { "" };
        match self.kind {
            AddressType::Const => write!(f, "{}${:04X}", prefix, self.value),
            AddressType::Code => write!(f, "{}{}C:{:04X}", rel, prefix, self.value),
            AddressType::Data => write!(f, "{}{}D:{:04X}", rel, prefix, self.value),
            AddressType::ZeroPage => write!(f, "{}{}Z:{:04X}", rel, prefix, self.value),
            AddressType::External(id) => write!(f, "{}{}ext#{}+{}", rel, prefix, id, self.value),
            AddressType::Undefined => write!(f, "{}<undefined>", prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(v: u16) -> Address { Address::in_segment(SegmentKind::Code, v) }
    fn data(v: u16) -> Address { Address::in_segment(SegmentKind::Data, v) }

    #[test]
    fn legal_arithmetic() -> Result<(), Error> {
        let c = Address::constant;
        assert_eq!(c(2).binary(Op::Mul, c(21))?, c(42));
        assert_eq!(code(0x10).binary(Op::Add, c(5))?, code(0x15));
        assert_eq!(c(5).binary(Op::Add, data(0x10))?, data(0x15));
        assert_eq!(code(0x10).binary(Op::Sub, c(1))?, code(0x0f));
        assert_eq!(code(0x30).binary(Op::Sub, code(0x10))?, c(0x20));
        assert_eq!(Address::external(3).binary(Op::Add, c(2))?, Address::new(AddressType::External(3), 2));
        assert_eq!(Address::undefined().binary(Op::Add, c(2))?, Address::undefined());
        assert_eq!(c(2).binary(Op::Shl, Address::undefined())?, Address::undefined());
        Ok(())
    }

    #[test]
    fn illegal_arithmetic() {
        let c = Address::constant;
        let bad = [
            code(1).binary(Op::Add, code(2)),
            code(1).binary(Op::Sub, data(2)),
            c(1).binary(Op::Sub, code(2)),
            code(4).binary(Op::Mul, c(2)),
            Address::external(1).binary(Op::Sub, Address::external(1)),
            Address::undefined().binary(Op::Mul, code(2)),
        ];
        for r in bad {
            assert_eq!(r.unwrap_err().kind, ErrorKind::AddressUsage);
        }
        assert_eq!(c(1).binary(Op::Div, c(0)).unwrap_err().kind, ErrorKind::Syntax);
        assert!(code(1).negate().is_err());
    }

    #[test]
    fn byte_parts() -> Result<(), Error> {
        assert_eq!(Address::constant(0x1234).low()?, Address::constant(0x34));
        assert_eq!(Address::constant(0x1234).high()?, Address::constant(0x12));
        let hi = code(0x1234).high()?;
        assert_eq!((hi.kind, hi.value, hi.part), (AddressType::Code, 0x1234, Part::HighByte));
        assert!(hi.low().is_err());
        assert!(hi.binary(Op::Add, Address::constant(1)).is_err());
        assert_eq!(Part::HighByte.apply(0xabcd), 0xab);
        Ok(())
    }

    #[test]
    fn binary_layout() -> Result<(), Error> {
        let mut w = Writer::new();
        Address::constant(0x1234).write(&mut w);
        let mut ext = Address::new(AddressType::External(7), 2).low()?;
        ext.relative = true;
        ext.write(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![0x00, 0x34, 0x12, 0x80, 0x04, 0x02, 0x00, 0x07, 0x00, 0x01]);
        let mut r = Reader::new(&bytes);
        assert_eq!(Address::read(&mut r)?, Address::constant(0x1234));
        assert_eq!(Address::read(&mut r)?, ext);
        assert!(r.is_empty());
        Ok(())
    }

    #[test]
    fn byte_range() {
        assert!(Address::constant(0xff).fits_byte());
        assert!(Address::constant(0xff80).fits_byte());
        assert!(!Address::constant(0x100).fits_byte());
        assert!(!Address::constant(0xff7f).fits_byte());
    }
}
