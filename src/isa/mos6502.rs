//! MOS 6502 and WDC 65C02.
//!
//! The opcode tables are plain data built by pure functions: [`base_table`]
//! returns the NMOS instruction set and [`build_table`] layers additions on
//! top of it, which is how the 65C02 table is composed.
use super::{Condition, InstructionSet};
use crate::address::{Address, AddressType, Part};
use crate::assembler::{Assembler, Reach};
use crate::error::SourcePos;
use crate::expr::{self, Operands};
use crate::token::Reserved;
use crate::{Error, ErrorKind};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    /// `(abs)`
    Indirect,
    /// `(zp,X)`
    IndexedIndirect,
    /// `(zp),Y`
    IndirectIndexed,
    /// `(zp)`, 65C02
    ZeroPageIndirect,
    /// `(abs,X)`, 65C02
    AbsoluteIndexedIndirect,
    Relative,
}

pub type OpcodeTable = HashMap<(&'static str, Mode), u8>;

const JMP_ABS: u8 = 0x4c;
const BRA: u8 = 0x80;

/// Opcode offsets of the eight accumulator instructions (ORA, AND, EOR, ADC, STA, LDA, CMP, SBC).
const ALU_MODES: [(Mode, u8); 8] = [
    (Mode::Immediate, 0x09),
    (Mode::ZeroPage, 0x05),
    (Mode::ZeroPageX, 0x15),
    (Mode::Absolute, 0x0d),
    (Mode::AbsoluteX, 0x1d),
    (Mode::AbsoluteY, 0x19),
    (Mode::IndexedIndirect, 0x01),
    (Mode::IndirectIndexed, 0x11),
];
const ALU: [(&str, u8); 8] = [
    ("ORA", 0x00),
    ("AND", 0x20),
    ("EOR", 0x40),
    ("ADC", 0x60),
    ("STA", 0x80),
    ("LDA", 0xa0),
    ("CMP", 0xc0),
    ("SBC", 0xe0),
];
/// Read-modify-write instructions; the shifts also have an accumulator form.
const RMW_MODES: [(Mode, u8); 4] = [
    (Mode::ZeroPage, 0x06),
    (Mode::ZeroPageX, 0x16),
    (Mode::Absolute, 0x0e),
    (Mode::AbsoluteX, 0x1e),
];
const RMW: [(&str, u8); 6] = [
    ("ASL", 0x00),
    ("ROL", 0x20),
    ("LSR", 0x40),
    ("ROR", 0x60),
    ("DEC", 0xc0),
    ("INC", 0xe0),
];

#[rustfmt::skip]
const IMPLIED: [(&str, u8); 25] = [
    ("BRK", 0x00), ("CLC", 0x18), ("CLD", 0xd8), ("CLI", 0x58), ("CLV", 0xb8),
    ("DEX", 0xca), ("DEY", 0x88), ("INX", 0xe8), ("INY", 0xc8), ("NOP", 0xea),
    ("PHA", 0x48), ("PHP", 0x08), ("PLA", 0x68), ("PLP", 0x28), ("RTI", 0x40),
    ("RTS", 0x60), ("SEC", 0x38), ("SED", 0xf8), ("SEI", 0x78), ("TAX", 0xaa),
    ("TAY", 0xa8), ("TSX", 0xba), ("TXA", 0x8a), ("TXS", 0x9a), ("TYA", 0x98),
];

#[rustfmt::skip]
const BRANCHES: [(&str, u8); 8] = [
    ("BPL", 0x10), ("BMI", 0x30), ("BVC", 0x50), ("BVS", 0x70),
    ("BCC", 0x90), ("BCS", 0xb0), ("BNE", 0xd0), ("BEQ", 0xf0),
];

#[rustfmt::skip]
const OTHERS: [(&str, Mode, u8); 20] = [
    ("BIT", Mode::ZeroPage, 0x24), ("BIT", Mode::Absolute, 0x2c),
    ("CPX", Mode::Immediate, 0xe0), ("CPX", Mode::ZeroPage, 0xe4), ("CPX", Mode::Absolute, 0xec),
    ("CPY", Mode::Immediate, 0xc0), ("CPY", Mode::ZeroPage, 0xc4), ("CPY", Mode::Absolute, 0xcc),
    ("JMP", Mode::Absolute, 0x4c), ("JMP", Mode::Indirect, 0x6c),
    ("JSR", Mode::Absolute, 0x20),
    ("LDX", Mode::Immediate, 0xa2), ("LDX", Mode::ZeroPage, 0xa6), ("LDX", Mode::ZeroPageY, 0xb6),
    ("LDX", Mode::Absolute, 0xae), ("LDX", Mode::AbsoluteY, 0xbe),
    ("STX", Mode::ZeroPage, 0x86), ("STX", Mode::ZeroPageY, 0x96), ("STX", Mode::Absolute, 0x8e),
    ("STY", Mode::ZeroPage, 0x84),
];
#[rustfmt::skip]
const OTHERS_Y: [(&str, Mode, u8); 7] = [
    ("STY", Mode::ZeroPageX, 0x94), ("STY", Mode::Absolute, 0x8c),
    ("LDY", Mode::Immediate, 0xa0), ("LDY", Mode::ZeroPage, 0xa4), ("LDY", Mode::ZeroPageX, 0xb4),
    ("LDY", Mode::Absolute, 0xac), ("LDY", Mode::AbsoluteX, 0xbc),
];

/// Instructions and addressing modes the 65C02 adds to the NMOS set.
#[rustfmt::skip]
pub const CMOS_ADDITIONS: [(&str, Mode, u8); 27] = [
    ("ORA", Mode::ZeroPageIndirect, 0x12), ("AND", Mode::ZeroPageIndirect, 0x32),
    ("EOR", Mode::ZeroPageIndirect, 0x52), ("ADC", Mode::ZeroPageIndirect, 0x72),
    ("STA", Mode::ZeroPageIndirect, 0x92), ("LDA", Mode::ZeroPageIndirect, 0xb2),
    ("CMP", Mode::ZeroPageIndirect, 0xd2), ("SBC", Mode::ZeroPageIndirect, 0xf2),
    ("BIT", Mode::Immediate, 0x89), ("BIT", Mode::ZeroPageX, 0x34), ("BIT", Mode::AbsoluteX, 0x3c),
    ("INC", Mode::Accumulator, 0x1a), ("DEC", Mode::Accumulator, 0x3a),
    ("JMP", Mode::AbsoluteIndexedIndirect, 0x7c),
    ("BRA", Mode::Relative, 0x80),
    ("PHX", Mode::Implied, 0xda), ("PHY", Mode::Implied, 0x5a),
    ("PLX", Mode::Implied, 0xfa), ("PLY", Mode::Implied, 0x7a),
    ("STZ", Mode::ZeroPage, 0x64), ("STZ", Mode::ZeroPageX, 0x74),
    ("STZ", Mode::Absolute, 0x9c), ("STZ", Mode::AbsoluteX, 0x9e),
    ("TRB", Mode::ZeroPage, 0x14), ("TRB", Mode::Absolute, 0x1c),
    ("TSB", Mode::ZeroPage, 0x04), ("TSB", Mode::Absolute, 0x0c),
];

/// The NMOS 6502 instruction set.
pub fn base_table() -> OpcodeTable {
    let mut t = OpcodeTable::new();
    for (name, base) in ALU {
        for (mode, offset) in ALU_MODES {
            // there is no STA #imm
            if !(name == "STA" && mode == Mode::Immediate) {
                t.insert((name, mode), base + offset);
            }
        }
    }
    for (name, base) in RMW {
        for (mode, offset) in RMW_MODES {
            t.insert((name, mode), base + offset);
        }
        if base < 0x80 {
            t.insert((name, Mode::Accumulator), base + 0x0a);
        }
    }
    for (name, op) in IMPLIED {
        t.insert((name, Mode::Implied), op);
    }
    for (name, op) in BRANCHES {
        t.insert((name, Mode::Relative), op);
    }
    for (name, mode, op) in OTHERS.into_iter().chain(OTHERS_Y) {
        t.insert((name, mode), op);
    }
    t
}

/// A copy of `base` extended (or overridden) by `additions`.
pub fn build_table(base: &OpcodeTable, additions: &[(&'static str, Mode, u8)]) -> OpcodeTable {
    let mut t = base.clone();
    for &(name, mode, op) in additions {
        t.insert((name, mode), op);
    }
    t
}

pub struct Mos6502 {
    name: &'static str,
    table: OpcodeTable,
    mnemonics: HashSet<&'static str>,
    /// `BRA` is available for unconditional jumps
    has_bra: bool,
}

impl Mos6502 {
    pub fn nmos() -> Self { Mos6502::with_table("6502", base_table()) }
    pub fn cmos() -> Self { Mos6502::with_table("65c02", build_table(&base_table(), &CMOS_ADDITIONS)) }

    fn with_table(name: &'static str, table: OpcodeTable) -> Self {
        let mnemonics = table.keys().map(|&(m, _)| m).collect();
        let has_bra = table.contains_key(&("BRA", Mode::Relative));
        Mos6502 {
            name,
            table,
            mnemonics,
            has_bra,
        }
    }

    pub fn opcode(&self, mnemonic: &str, mode: Mode) -> Option<u8> { self.table.get(&(mnemonic, mode)).copied() }
    fn has(&self, mnemonic: &str, mode: Mode) -> bool { self.table.contains_key(&(mnemonic, mode)) }

    fn emit(&self, asm: &mut Assembler, mnemonic: &str, mode: Mode, pos: SourcePos) -> Result<(), Error> {
        let op = self.opcode(mnemonic, mode).ok_or_else(|| {
            Error::new(
                ErrorKind::Syntax,
                Some(pos),
                &format!("{} does not support {:?} addressing", mnemonic, mode),
            )
        })?;
        asm.write_byte(op);
        Ok(())
    }

    fn encode(&self, asm: &mut Assembler, m: &str, operand: Operand, pos: SourcePos) -> Result<(), Error> {
        match operand {
            Operand::None if self.has(m, Mode::Implied) => self.emit(asm, m, Mode::Implied, pos),
            Operand::None | Operand::Accumulator if self.has(m, Mode::Accumulator) => {
                self.emit(asm, m, Mode::Accumulator, pos)
            }
            Operand::None => Err(syntax_err!(pos, "{} needs an operand", m)),
            Operand::Accumulator => Err(syntax_err!(pos, "{} has no accumulator form", m)),
            Operand::Immediate(a) => {
                self.emit(asm, m, Mode::Immediate, pos)?;
                asm.write_byte_address(pos, a);
                Ok(())
            }
            Operand::Direct(a, Index::None) if self.has(m, Mode::Relative) => self.branch(asm, m, a, pos),
            Operand::Direct(a, index) => {
                let (zp, abs) = match index {
                    Index::None => (Mode::ZeroPage, Mode::Absolute),
                    Index::X => (Mode::ZeroPageX, Mode::AbsoluteX),
                    Index::Y => (Mode::ZeroPageY, Mode::AbsoluteY),
                };
                if self.has(m, zp) && (is_byte_sized(&a) || !self.has(m, abs)) {
                    self.emit(asm, m, zp, pos)?;
                    asm.write_byte_address(pos, a);
                } else {
                    self.emit(asm, m, abs, pos)?;
                    if m == "JMP" || m == "JSR" {
                        asm.write_pointer(pos, a);
                    } else {
                        asm.write_word(pos, a);
                    }
                }
                Ok(())
            }
            Operand::Indirect(a) if self.has(m, Mode::Indirect) => {
                self.emit(asm, m, Mode::Indirect, pos)?;
                asm.write_pointer(pos, a);
                Ok(())
            }
            Operand::Indirect(a) => {
                self.emit(asm, m, Mode::ZeroPageIndirect, pos)?;
                asm.write_byte_address(pos, a);
                Ok(())
            }
            Operand::IndexedIndirect(a) if self.has(m, Mode::AbsoluteIndexedIndirect) => {
                self.emit(asm, m, Mode::AbsoluteIndexedIndirect, pos)?;
                asm.write_pointer(pos, a);
                Ok(())
            }
            Operand::IndexedIndirect(a) => {
                self.emit(asm, m, Mode::IndexedIndirect, pos)?;
                asm.write_byte_address(pos, a);
                Ok(())
            }
            Operand::IndirectIndexed(a) => {
                self.emit(asm, m, Mode::IndirectIndexed, pos)?;
                asm.write_byte_address(pos, a);
                Ok(())
            }
        }
    }

    /// A relative branch written by the programmer.
    fn branch(&self, asm: &mut Assembler, m: &str, target: Address, pos: SourcePos) -> Result<(), Error> {
        let op = self.opcode(m, Mode::Relative).unwrap_or(BRA);
        let long_len = match (asm.long_branches(), op == BRA) {
            (false, _) => 2,
            (true, true) => 3,
            (true, false) => 5,
        };
        match asm.reach(pos, target, 2, long_len)? {
            Reach::Short(offset) => {
                asm.write_byte(op);
                asm.write_byte(offset as u8);
            }
            Reach::Far(offset) if !asm.long_branches() => {
                asm.record_provisional(Error::new(
                    ErrorKind::OutOfRange,
                    Some(pos),
                    &format!("branch target is out of range (offset {})", offset),
                ));
                asm.write_byte(op);
                asm.write_byte(0);
            }
            Reach::Unknown if !asm.long_branches() => {
                asm.write_byte(op);
                asm.write_byte(0);
            }
            _ if op == BRA => {
                asm.write_byte(JMP_ABS);
                asm.write_pointer(pos, target);
            }
            _ => self.long_branch(asm, op, target, pos),
        }
        Ok(())
    }

    /// Inverted short branch over an absolute jump.
    fn long_branch(&self, asm: &mut Assembler, op: u8, target: Address, pos: SourcePos) {
        asm.write_byte(op ^ 0x20);
        asm.write_byte(3);
        asm.write_byte(JMP_ABS);
        asm.write_pointer(pos, target);
    }

    fn parse_operand(&self, asm: &mut Assembler) -> Result<Operand, Error> {
        let t = asm.next_token()?;
        if t.is_end_of_statement() {
            asm.push_back(t);
            return Ok(Operand::None);
        }
        if t.is(Reserved::Hash) {
            return Ok(Operand::Immediate(asm.expression()?));
        }
        if t.is(Reserved::LParen) {
            let a = asm.expression()?;
            let close = asm.next_token()?;
            if close.is(Reserved::Comma) {
                expect_register(asm, "X")?;
                expr::expect(asm, Reserved::RParen)?;
                return Ok(Operand::IndexedIndirect(a));
            }
            if !close.is(Reserved::RParen) {
                let e = syntax_err!(close.pos, "expected `,X)` or `)`, found {}", close);
                asm.push_back(close);
                return Err(e);
            }
            let comma = asm.next_token()?;
            if comma.is(Reserved::Comma) {
                expect_register(asm, "Y")?;
                return Ok(Operand::IndirectIndexed(a));
            }
            asm.push_back(comma);
            return Ok(Operand::Indirect(a));
        }
        let value = match t.identifier() {
            Some(name) if name.eq_ignore_ascii_case("A") => {
                let next = asm.next_token()?;
                let alone = next.is_end_of_statement();
                asm.push_back(next);
                if alone {
                    return Ok(Operand::Accumulator);
                }
                let lhs = asm.resolve(name, t.pos)?;
                expr::climb_from(asm, lhs, 1)?
            }
            _ => {
                asm.push_back(t);
                asm.expression()?
            }
        };
        let comma = asm.next_token()?;
        if !comma.is(Reserved::Comma) {
            asm.push_back(comma);
            return Ok(Operand::Direct(value, Index::None));
        }
        let reg = asm.next_token()?;
        match reg.identifier().map(str::to_ascii_uppercase).as_deref() {
            Some("X") => Ok(Operand::Direct(value, Index::X)),
            Some("Y") => Ok(Operand::Direct(value, Index::Y)),
            _ => Err(syntax_err!(reg.pos, "expected index register X or Y, found {}", reg)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Index {
    None,
    X,
    Y,
}

#[derive(Debug, Clone, Copy)]
enum Operand {
    None,
    Accumulator,
    Immediate(Address),
    Direct(Address, Index),
    Indirect(Address),
    IndexedIndirect(Address),
    IndirectIndexed(Address),
}

fn expect_register(asm: &mut Assembler, reg: &str) -> Result<(), Error> {
    let t = asm.next_token()?;
    match t.identifier() {
        Some(name) if name.eq_ignore_ascii_case(reg) => Ok(()),
        _ => Err(syntax_err!(t.pos, "expected register {}, found {}", reg, t)),
    }
}

/// Operands that fit the one-byte zero page forms.
fn is_byte_sized(a: &Address) -> bool {
    a.part != Part::Word
        || a.kind == AddressType::ZeroPage
        || (a.kind == AddressType::Const && a.value < 0x100)
}

impl InstructionSet for Mos6502 {
    fn name(&self) -> &'static str { self.name }
    fn is_mnemonic(&self, word: &str) -> bool { self.mnemonics.contains(word.to_ascii_uppercase().as_str()) }

    fn assemble(&self, asm: &mut Assembler, mnemonic: &str, pos: SourcePos) -> Result<(), Error> {
        let m = mnemonic.to_ascii_uppercase();
        let operand = self.parse_operand(asm)?;
        self.encode(asm, &m, operand, pos)
    }

    fn condition(&self, word: &str) -> Option<Condition> {
        let op = match word.to_ascii_uppercase().as_str() {
            "EQ" => 0xf0,
            "NE" => 0xd0,
            "CS" | "GE" => 0xb0,
            "CC" | "LT" => 0x90,
            "MI" => 0x30,
            "PL" => 0x10,
            "VS" => 0x70,
            "VC" => 0x50,
            _ => return None,
        };
        Some(Condition(op))
    }
    fn invert(&self, cond: Condition) -> Condition { Condition(cond.0 ^ 0x20) }

    fn branch_if(&self, asm: &mut Assembler, cond: Condition, target: Address, pos: SourcePos) -> Result<(), Error> {
        match asm.reach(pos, target, 2, 5)? {
            Reach::Short(offset) => {
                asm.write_byte(cond.0);
                asm.write_byte(offset as u8);
            }
            Reach::Far(_) | Reach::Unknown => self.long_branch(asm, cond.0, target, pos),
        }
        Ok(())
    }

    fn jump(&self, asm: &mut Assembler, target: Address, pos: SourcePos) -> Result<(), Error> {
        if self.has_bra {
            if let Reach::Short(offset) = asm.reach(pos, target, 2, 3)? {
                asm.write_byte(BRA);
                asm.write_byte(offset as u8);
                return Ok(());
            }
        }
        asm.write_byte(JMP_ABS);
        asm.write_pointer(pos, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{assemble_source, Options};
    use crate::address::SegmentKind;

    fn code(isa: &dyn InstructionSet, src: &str) -> Vec<u8> {
        let out = assemble_source(isa, Options::default(), "t.asm", src).unwrap();
        out.object.segment(SegmentKind::Code).bytes().to_vec()
    }

    #[test]
    fn table_composition() {
        let base = base_table();
        assert_eq!(base.len(), 151);
        let cmos = build_table(&base, &CMOS_ADDITIONS);
        assert_eq!(cmos.len(), 151 + CMOS_ADDITIONS.len());
        // every opcode is used by exactly one (mnemonic, mode) pair
        let distinct: HashSet<u8> = cmos.values().copied().collect();
        assert_eq!(distinct.len(), cmos.len());
        assert_eq!(base.get(&("STA", Mode::Immediate)), None);
        assert_eq!(base.get(&("LSR", Mode::Accumulator)), Some(&0x4a));
        assert_eq!(cmos.get(&("LDA", Mode::ZeroPageIndirect)), Some(&0xb2));
    }

    #[test]
    fn addressing_modes() {
        let isa = Mos6502::nmos();
        let src = "
            lda #$12
            lda $12
            lda $1234
            lda $12,x
            sta $1234,y
            lda ($12,x)
            lda ($12),y
            jmp ($1234)
            ldx $12,y
            asl
            rol a
            rts";
        assert_eq!(
            code(&isa, src),
            vec![
                0xa9, 0x12, 0xa5, 0x12, 0xad, 0x34, 0x12, 0xb5, 0x12, 0x99, 0x34, 0x12, 0xa1, 0x12, 0xb1, 0x12, 0x6c,
                0x34, 0x12, 0xb6, 0x12, 0x0a, 0x2a, 0x60
            ]
        );
    }

    #[test]
    fn cmos_only_forms() {
        let cmos = Mos6502::cmos();
        assert_eq!(
            code(&cmos, "lda ($12)\nstz $10\njmp ($1234,x)\nphx\ninc a"),
            vec![0xb2, 0x12, 0x64, 0x10, 0x7c, 0x34, 0x12, 0xda, 0x1a]
        );
        let nmos = Mos6502::nmos();
        assert!(!nmos.is_mnemonic("stz"));
        assert!(assemble_source(&nmos, Options::default(), "t.asm", "lda ($12)").is_err());
    }

    #[test]
    fn conditions_invert() {
        let isa = Mos6502::nmos();
        let eq = isa.condition("eq").unwrap();
        assert_eq!(isa.invert(eq), isa.condition("NE").unwrap());
        assert_eq!(isa.condition("lt"), isa.condition("cc"));
        assert_eq!(isa.invert(isa.condition("GE").unwrap()), Condition(0x90));
        assert_eq!(isa.condition("xx"), None);
    }

    #[test]
    fn jumps_prefer_bra_on_cmos() {
        let src = "loop: nop\n jmp loop";
        assert_eq!(code(&Mos6502::nmos(), src), vec![0xea, 0x4c, 0x00, 0x00]);
        let src = "top: nop\n if eq\n nop\n else\n nop\n endif";
        // IF: BNE +3, NOP, BRA +1, NOP
        assert_eq!(code(&Mos6502::cmos(), src), vec![0xea, 0xd0, 0x03, 0xea, 0x80, 0x01, 0xea]);
        // the 6502 needs a JMP for the ELSE
        assert_eq!(
            code(&Mos6502::nmos(), src),
            vec![0xea, 0xd0, 0x04, 0xea, 0x4c, 0x08, 0x00, 0xea]
        );
    }
}
