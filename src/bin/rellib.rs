//! # rellib: bundle object modules into a static library.
//!
//! ```text
//! rellib std.lib print.obj math.obj
//! ```
use clap::Parser;
use relasm::archive::Library;
use relasm::config::{self, LibArgs};
use relasm::object::Object;
use relasm::{info, verbose_println, Error};
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = LibArgs::parse();
    config::set_verbose(args.verbose);
    if let Err(e) = build_library(&args) {
        println!("{}", e);
        return Err(Box::new(e));
    }
    Ok(())
}

fn build_library(args: &LibArgs) -> Result<(), Error> {
    let mut objects = Vec::with_capacity(args.objects.len());
    for name in &args.objects {
        let obj = Object::read_from_file(Path::new(name))?;
        verbose_println!("{}: {} public symbols", name, obj.public_symbols().count());
        objects.push(obj);
    }
    let library = Library::from_objects(objects, &args.objects)?;
    library.write_to_file(Path::new(&args.library))?;
    info!(
        "Wrote {} ({} modules, {} symbols)",
        args.library,
        library.objects.len(),
        library.index.len()
    );
    Ok(())
}
