use crate::isa::Cpu;
use clap::Parser;
use clap_num::maybe_hex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Command line for `relasm`, the assembler.
#[derive(Parser, Debug)]
#[command(author,version,about="Assemble 6502 family source into a relocatable object module",long_about=None)]
pub struct AsmArgs {
    /// Assembly source file (.asm, .s)
    pub file: String,

    /// CPU variant to assemble for
    #[arg(long, value_enum, default_value_t = Cpu::Mos6502)]
    pub cpu: Cpu,

    /// Disable automatic branch->long_branch conversion
    #[arg(long)]
    pub lbr_disable: bool,

    /// Dump the program listing to stdout
    #[arg(short, long)]
    pub list: bool,

    /// Object file to write (defaults to the source name with an .obj extension)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Maximum number of passes before giving up on convergence
    #[arg(long, default_value_t = 16)]
    pub max_passes: u32,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Command line for `rellink`, the linker.
#[derive(Parser, Debug)]
#[command(author,version,about="Link relocatable object modules and libraries into a memory image",long_about=None)]
pub struct LinkArgs {
    /// Target file (.hex = Intel HEX, .prg/.tap = tape image, anything else = raw binary)
    pub target: String,

    /// Base address of the code segment ($hex, 0xhex or decimal)
    pub code_base: String,

    /// Base address of the data segment ($hex, 0xhex or decimal)
    pub data_base: String,

    /// Optional zero page base address followed by object (.obj) and library (.lib) files
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Print the symbol map to stdout
    #[arg(short, long)]
    pub map: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Command line for `rellib`, the librarian.
#[derive(Parser, Debug)]
#[command(author,version,about="Bundle object modules into a static library",long_about=None)]
pub struct LibArgs {
    /// Library file to create
    pub library: String,

    /// Object modules to include, in order
    #[arg(required = true)]
    pub objects: Vec<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn set_verbose(on: bool) { VERBOSE.store(on, Ordering::Relaxed) }
pub fn verbose() -> bool { VERBOSE.load(Ordering::Relaxed) }

/// Parse an address literal as accepted on the linker command line.
pub fn parse_address(s: &str) -> Option<u16> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('$') {
        return u16::from_str_radix(hex, 16).ok();
    }
    maybe_hex::<u16>(s).ok()
}
