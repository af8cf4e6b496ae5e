//! # relasm: assemble 6502 family source into a relocatable object module.
//!
//! ```text
//! relasm /path/to/program.asm
//! ```
//! writes `program.obj` and `program.lst` next to the source (or next to the
//! object file named with `-o`).
//! Help for command line options is available using -h or --help.
use clap::Parser;
use relasm::assembler::{Assembler, Options};
use relasm::config::{self, AsmArgs};
use relasm::{info, Error};
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = AsmArgs::parse();
    config::set_verbose(args.verbose);
    // process_file does all the work
    if let Err(e) = process_file(&args) {
        println!("{}", e);
        return Err(e);
    }
    Ok(())
}

/// process_file assembles the source and writes the object and listing files
fn process_file(args: &AsmArgs) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(&args.file);
    let isa = args.cpu.instruction_set();
    let options = Options {
        long_branches: !args.lbr_disable,
        max_passes: args.max_passes,
    };
    info!("Assembling {} for the {}", args.file, isa.name());
    let mut asm = Assembler::new(isa.as_ref(), options);
    let assembly = asm.assemble_file(path)?;

    let obj_path = args.output.as_ref().map_or_else(|| path.with_extension("obj"), PathBuf::from);
    assembly.object.write_to_file(&obj_path)?;
    let lst_path = obj_path.with_extension("lst");
    assembly
        .listing
        .write_to_file(&lst_path, asm.files())
        .map_err(|e| Error::new(relasm::ErrorKind::IO, None, &format!("{}: {}", lst_path.display(), e)))?;
    if args.list {
        print!("{}", assembly.listing.render(asm.files()));
    }
    let sizes: Vec<String> =
        assembly.object.segments.iter().map(|s| format!("{} {} bytes", s.kind, s.len())).collect();
    info!(
        "Wrote {} ({}) after {} passes",
        obj_path.display(),
        sizes.join(", "),
        assembly.passes
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relasm::archive::Library;
    use relasm::isa::Cpu;
    use relasm::linker::{Bases, Linker};
    use relasm::object::Object;
    use relasm::ErrorKind;
    use std::{fs, io};

    fn asm_files(dir: &str) -> Result<Vec<PathBuf>, io::Error> {
        let mut entries = fs::read_dir(dir)?
            .map(|res| res.map(|e| e.path()))
            .collect::<Result<Vec<_>, io::Error>>()?;
        entries.retain(|p| p.is_file() && p.extension().is_some_and(|e| e.eq_ignore_ascii_case("asm")));
        entries.sort();
        Ok(entries)
    }

    fn out_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("relasm-tests").join(name);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Command line for assembling `src` into `dir`; files named for the 65C02 select it.
    fn args_for(src: &Path, dir: &Path) -> AsmArgs {
        let stem = src.file_stem().unwrap().to_str().unwrap();
        let obj = dir.join(format!("{}.obj", stem));
        let cpu = if stem.contains("65c02") { "65c02" } else { "6502" };
        AsmArgs::parse_from(["relasm", src.to_str().unwrap(), "--cpu", cpu, "-o", obj.to_str().unwrap()])
    }

    #[test]
    fn various_programs() -> Result<(), Box<dyn std::error::Error>> {
        // every .asm file in ./test should assemble cleanly
        let dir = out_dir("programs");
        for src in asm_files("test")? {
            println!("Assembling {}", src.display());
            let args = args_for(&src, &dir);
            process_file(&args)?;
            let obj = Object::read_from_file(&dir.join(src.with_extension("obj").file_name().unwrap()))?;
            assert!(!obj.segment(relasm::address::SegmentKind::Code).is_empty());
            assert!(obj.public_symbols().count() > 0);
        }
        Ok(())
    }

    #[test]
    fn assembly_errors() -> Result<(), Box<dyn std::error::Error>> {
        // every .asm file in ./test/errors should fail without writing an object file
        let dir = out_dir("errors");
        for src in asm_files("test/errors")? {
            let args = args_for(&src, &dir);
            let obj = PathBuf::from(args.output.clone().unwrap());
            _ = fs::remove_file(&obj);
            if process_file(&args).is_ok() {
                panic!("expected errors assembling {}", src.display());
            }
            assert!(!obj.exists());
        }
        Ok(())
    }

    #[test]
    fn missing_source_is_fatal() {
        let args = AsmArgs::parse_from(["relasm", "test/no_such_file.asm"]);
        let e = process_file(&args).unwrap_err();
        let d = e.downcast_ref::<relasm::Diagnostics>().unwrap();
        assert_eq!(d.count_kind(ErrorKind::IO), 1);
    }

    #[test]
    fn link_with_library() -> Result<(), Box<dyn std::error::Error>> {
        let cpu = Cpu::Mos6502.instruction_set();
        let assemble = |path: &str| -> Result<Object, relasm::Diagnostics> {
            let mut asm = Assembler::new(cpu.as_ref(), Options::default());
            Ok(asm.assemble_file(Path::new(path))?.object)
        };
        let main = assemble("test/link/main.asm")?;
        let hello = assemble("test/hello.asm")?;
        let lib = Library::from_objects(
            vec![assemble("test/link/chrout.asm")?, assemble("test/link/unused.asm")?],
            &["chrout.obj".to_string(), "unused.obj".to_string()],
        )?;
        let lib = Library::from_bytes(&lib.to_bytes()?)?;

        let mut linker = Linker::new(Bases::new(0x1000, 0x2000, 0x80));
        linker.add_object("main.obj", &main);
        linker.add_library("std.lib", lib);
        linker.add_object("hello.obj", &hello);
        let out = linker.link()?;
        assert_eq!(out.modules, vec!["main.obj", "hello.obj", "std.lib[0]"]);
        let (base, image) = out.image();
        assert_eq!(base, 0x1000);
        // JSR hello; BRK; then hello itself loads the low byte of the message address
        assert_eq!(&image[..6], &[0x20, 0x04, 0x10, 0x00, 0xa9, 0x00]);
        assert_eq!(&image[0x1000..0x1005], b"Hello");
        assert!(out.map.iter().any(|e| e.name == "chrout" && e.module == "std.lib[0]"));
        assert!(!out.map.iter().any(|e| e.name == "unused"));
        Ok(())
    }
}
