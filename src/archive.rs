//! Static libraries: an ordered bundle of object modules with an index of the
//! names each module exports, and the loader state the linker keeps for one.
use crate::object::Object;
use crate::wire::{Reader, Writer};
use crate::{Error, ErrorKind};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const LIBRARY_VERSION: u16 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Library {
    pub objects: Vec<Object>,
    /// exported name -> index into `objects`
    pub index: BTreeMap<String, u16>,
}

impl Library {
    /// Bundle `objects` in order. `names` label the modules in error messages.
    pub fn from_objects(objects: Vec<Object>, names: &[String]) -> Result<Library, Error> {
        if objects.len() > u16::MAX as usize {
            return Err(general_err!("too many modules ({}) for one library", objects.len()));
        }
        let mut index = BTreeMap::new();
        for (i, obj) in objects.iter().enumerate() {
            for sym in obj.public_symbols() {
                if let Some(&first) = index.get(&sym.name) {
                    let label = |n: usize| names.get(n).cloned().unwrap_or_else(|| format!("module {}", n));
                    return Err(Error::new(
                        ErrorKind::DuplicateSymbol,
                        None,
                        &format!("{} is exported by both {} and {}", sym.name, label(first as usize), label(i)),
                    ));
                }
                index.insert(sym.name.clone(), i as u16);
            }
        }
        Ok(Library { objects, index })
    }

    /// The module exporting `name`, if any.
    pub fn find(&self, name: &str) -> Option<usize> { self.index.get(name).map(|&i| i as usize) }

    pub fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.u16(LIBRARY_VERSION);
        w.count(self.objects.len(), "library modules")?;
        for obj in &self.objects {
            obj.write(w)?;
        }
        w.count(self.index.len(), "library symbols")?;
        for (name, &i) in &self.index {
            w.string(name);
            w.u16(i);
        }
        Ok(())
    }
    pub fn read(r: &mut Reader) -> Result<Library, Error> {
        let version = r.u16()?;
        if version != LIBRARY_VERSION {
            return Err(format_err!("unsupported library version {}", version));
        }
        let count = r.u16()?;
        let mut objects = Vec::with_capacity(count as usize);
        for _ in 0..count {
            objects.push(Object::read(r)?);
        }
        let count = r.u16()?;
        let mut index = BTreeMap::new();
        for _ in 0..count {
            let name = r.string()?;
            let i = r.u16()?;
            if i as usize >= objects.len() {
                return Err(format_err!("library index entry {} refers to missing module {}", name, i));
            }
            index.insert(name, i);
        }
        Ok(Library { objects, index })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut w = Writer::new();
        self.write(&mut w)?;
        Ok(w.into_bytes())
    }
    pub fn from_bytes(bytes: &[u8]) -> Result<Library, Error> {
        let mut r = Reader::new(bytes);
        let lib = Library::read(&mut r)?;
        if !r.is_empty() {
            return Err(format_err!("trailing bytes after library"));
        }
        Ok(lib)
    }
    pub fn write_to_file(&self, path: &Path) -> Result<(), Error> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
    pub fn read_from_file(path: &Path) -> Result<Library, Error> {
        let bytes =
            fs::read(path).map_err(|e| Error::new(ErrorKind::IO, None, &format!("{}: {}", path.display(), e)))?;
        Library::from_bytes(&bytes).map_err(|e| format_err!("{}: {}", path.display(), e.msg))
    }
}

/// A library as seen by the linker: each module is pulled in at most once.
#[derive(Debug)]
pub struct Archive {
    pub name: String,
    library: Library,
    loaded: Vec<bool>,
}
impl Archive {
    pub fn new(name: &str, library: Library) -> Self {
        let loaded = vec![false; library.objects.len()];
        Archive {
            name: name.to_string(),
            library,
            loaded,
        }
    }
    /// The not yet loaded module that exports `name`.
    pub fn provider(&self, name: &str) -> Option<usize> { self.library.find(name).filter(|&i| !self.loaded[i]) }

    /// Mark module `i` loaded and hand it out.
    pub fn take(&mut self, i: usize) -> Option<&Object> {
        if *self.loaded.get(i)? {
            return None;
        }
        self.loaded[i] = true;
        self.library.objects.get(i)
    }
    /// The name used for module `i` in maps and messages.
    pub fn module_name(&self, i: usize) -> String { format!("{}[{}]", self.name, i) }
}
