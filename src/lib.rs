//! # A relocatable 6502/65C02 assembler, librarian and linker written in Rust.
//!
//! Three tools share this library:
//! - `relasm` assembles a source file into a relocatable object module (`.obj`)
//!   and a listing (`.lst`)
//! - `rellib` bundles object modules into a static library (`.lib`)
//! - `rellink` places objects and the library modules they need at fixed
//!   addresses and writes a binary, Intel HEX or tape image plus a `.map`
//!
//! ## Getting Started
//! ```text
//! relasm main.asm
//! relasm --cpu 65c02 print.asm
//! rellib std.lib print.obj
//! rellink game.prg $0801 $4000 $80 main.obj std.lib
//! ```
//! Help for command line options is available using -h or --help.
#[macro_use]
mod macros;
pub mod address;
pub mod archive;
pub mod assembler;
pub mod block;
pub mod config;
pub mod error;
pub mod expr;
pub mod files;
pub mod hex;
pub mod isa;
pub mod linker;
pub mod listing;
pub mod object;
pub mod segment;
pub mod symbols;
pub mod target;
pub mod token;
pub mod wire;

pub use crate::error::{Diagnostics, Error, ErrorKind, SourcePos};
