//! The interface between the assembly engine and a CPU family.
//!
//! An instruction set parses the operand of one of its mnemonics and emits
//! bytes through the engine's write primitives; it also knows how to encode
//! the conditional branch and the jump that the structured pseudo-ops
//! (`IF`/`ELSE`/`DO`/`WHILE`...) expand into.
pub mod mos6502;

use crate::address::Address;
use crate::assembler::Assembler;
use crate::error::SourcePos;
use crate::Error;
use clap::ValueEnum;
use std::fmt;

/// A branch condition. The value is private to the instruction set that
/// produced it (the 6502 uses the opcode of the matching branch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition(pub u8);

pub trait InstructionSet {
    fn name(&self) -> &'static str;
    fn is_mnemonic(&self, word: &str) -> bool;
    /// Parse the operand that follows `mnemonic` and emit the instruction.
    fn assemble(&self, asm: &mut Assembler, mnemonic: &str, pos: SourcePos) -> Result<(), Error>;
    /// Map a condition name used by `IF`/`ELSEIF`/`WHILE`.
    fn condition(&self, word: &str) -> Option<Condition>;
    fn invert(&self, cond: Condition) -> Condition;
    /// Branch to `target` if `cond` holds, using a long form when the short one does not reach.
    fn branch_if(&self, asm: &mut Assembler, cond: Condition, target: Address, pos: SourcePos) -> Result<(), Error>;
    /// Unconditional jump to `target`.
    fn jump(&self, asm: &mut Assembler, target: Address, pos: SourcePos) -> Result<(), Error>;
}

/// CPUs selectable with `--cpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Cpu {
    #[value(name = "6502")]
    Mos6502,
    #[value(name = "65c02")]
    Wdc65C02,
}
impl Cpu {
    pub fn instruction_set(self) -> Box<dyn InstructionSet> {
        match self {
            Cpu::Mos6502 => Box::new(mos6502::Mos6502::nmos()),
            Cpu::Wdc65C02 => Box::new(mos6502::Mos6502::cmos()),
        }
    }
}
impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Cpu::Mos6502 => write!(f, "6502"),
            Cpu::Wdc65C02 => write!(f, "65c02"),
        }
    }
}
