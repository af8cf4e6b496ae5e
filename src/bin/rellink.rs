//! # rellink: link object modules and libraries into a memory image.
//!
//! ```text
//! rellink game.prg $0801 $4000 [$80] main.obj std.lib
//! ```
//! The target format follows the target's extension: `.hex` is Intel HEX,
//! `.prg` and `.tap` are tape images, anything else is a raw binary.
//! A `.map` file listing every public symbol is written next to the target.
use clap::Parser;
use relasm::archive::Library;
use relasm::config::{self, parse_address, LinkArgs};
use relasm::linker::{Bases, Linker};
use relasm::object::Object;
use relasm::target::writer_for;
use relasm::{general_err, info, warn, Error};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = LinkArgs::parse();
    config::set_verbose(args.verbose);
    if let Err(e) = link(&args) {
        println!("{}", e);
        return Err(e);
    }
    Ok(())
}

fn address_arg(what: &str, s: &str) -> Result<u16, Error> {
    parse_address(s).ok_or_else(|| general_err!("invalid {} address \"{}\"", what, s))
}

fn link(args: &LinkArgs) -> Result<(), Box<dyn std::error::Error>> {
    let code = address_arg("code", &args.code_base)?;
    let data = address_arg("data", &args.data_base)?;
    let mut inputs = args.inputs.as_slice();
    let mut zero_page = 0;
    if let Some(zp) = inputs.first().and_then(|s| parse_address(s)) {
        zero_page = zp;
        inputs = &inputs[1..];
    }
    if inputs.is_empty() {
        return Err(Box::new(general_err!("no object files to link")));
    }

    let mut linker = Linker::new(Bases::new(code, data, zero_page));
    for name in inputs {
        let path = Path::new(name);
        let is_lib = path.extension().and_then(OsStr::to_str).is_some_and(|e| e.eq_ignore_ascii_case("lib"));
        if is_lib {
            linker.add_library(name, Library::read_from_file(path)?);
        } else {
            linker.add_object(name, &Object::read_from_file(path)?);
        }
    }
    let output = linker.link()?;

    let target = Path::new(&args.target);
    let writer = writer_for(target);
    let (base, image) = output.image();
    if image.is_empty() {
        warn!("code and data segments are empty; {} will hold no bytes", args.target);
    }
    let mut out = BufWriter::new(File::create(target)?);
    writer.write(base, &image, &mut out)?;
    out.flush()?;
    info!(
        "Wrote {} ({}, {} bytes at ${:04X}) from {} modules",
        args.target,
        writer.name(),
        image.len(),
        base,
        output.modules.len()
    );

    let map = output.map_text();
    fs::write(target.with_extension("map"), &map)?;
    if args.map {
        print!("{}", map);
    }
    Ok(())
}
