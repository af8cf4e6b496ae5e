//! Source files known to an assembly run. Each file gets a small integer id
//! the first time it is loaded; tokens and diagnostics refer to files by id.
use crate::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug)]
struct SourceFile {
    path: PathBuf,
    text: Rc<str>,
}

#[derive(Debug, Default)]
pub struct FileTable {
    files: Vec<SourceFile>,
}
impl FileTable {
    pub fn new() -> Self { FileTable::default() }

    /// Register in-memory source under the given name and return its id.
    /// Includes that name this path are served from memory rather than disk.
    pub fn add_source(&mut self, name: &str, text: &str) -> usize {
        let path = PathBuf::from(name);
        if let Some(id) = self.id_from_path(&path) {
            self.files[id].text = Rc::from(text);
            return id;
        }
        self.files.push(SourceFile {
            path,
            text: Rc::from(text),
        });
        self.files.len() - 1
    }

    /// Load a file from disk (once) and return its id. A missing file is an `ErrorKind::IO` error.
    pub fn load(&mut self, path: &Path) -> Result<usize, Error> {
        if let Some(id) = self.id_from_path(path) {
            return Ok(id);
        }
        let text = fs::read_to_string(path)
            .map_err(|e| Error::new(crate::ErrorKind::IO, None, &format!("{}: {}", path.display(), e)))?;
        verbose_println!("Loaded source file: {}", path.display());
        self.files.push(SourceFile {
            path: path.to_path_buf(),
            text: Rc::from(text.as_str()),
        });
        Ok(self.files.len() - 1)
    }

    /// Resolve an include name relative to the directory of the including file.
    pub fn resolve_include(&self, from: usize, name: &str) -> PathBuf {
        let candidate = PathBuf::from(name);
        if candidate.is_absolute() || self.id_from_path(&candidate).is_some() {
            return candidate;
        }
        self.files
            .get(from)
            .and_then(|f| f.path.parent())
            .map_or(candidate.clone(), |dir| dir.join(&candidate))
    }

    pub fn id_from_path(&self, path: &Path) -> Option<usize> { self.files.iter().position(|f| f.path == path) }
    pub fn path(&self, id: usize) -> Option<&Path> { self.files.get(id).map(|f| f.path.as_path()) }
    pub fn text(&self, id: usize) -> Option<Rc<str>> { self.files.get(id).map(|f| f.text.clone()) }

    /// The text of one (1-based) line of a file, without its line terminator.
    pub fn line(&self, id: usize, line: u32) -> Option<&str> {
        let file = self.files.get(id)?;
        file.text
            .lines()
            .nth((line as usize).checked_sub(1)?)
            .map(|l| l.trim_end_matches('\r'))
    }

    pub fn filename_display(&self, id: usize) -> String {
        self.path(id).map_or_else(
            || "<NO_PATH>".to_string(),
            |p| p.file_name().map_or("<NO_FILE_NAME>".to_string(), |f| f.to_string_lossy().to_string()),
        )
    }
    pub fn display_names(&self) -> Vec<String> { (0..self.files.len()).map(|id| self.filename_display(id)).collect() }
    pub fn len(&self) -> usize { self.files.len() }
    pub fn is_empty(&self) -> bool { self.files.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sources_and_lines() {
        let mut files = FileTable::new();
        let a = files.add_source("dir/main.asm", "one\r\ntwo\nthree");
        let b = files.add_source("dir/inc.asm", "x");
        assert_eq!((a, b), (0, 1));
        assert_eq!(files.add_source("dir/main.asm", "replaced"), 0);
        assert_eq!(files.line(0, 1), Some("replaced"));
        assert_eq!(files.line(1, 1), Some("x"));
        assert_eq!(files.line(1, 2), None);
        assert_eq!(files.filename_display(1), "inc.asm");
        assert_eq!(files.resolve_include(0, "other.asm"), PathBuf::from("dir/other.asm"));
        assert_eq!(files.resolve_include(0, "dir/inc.asm"), PathBuf::from("dir/inc.asm"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut files = FileTable::new();
        let e = files.load(Path::new("/definitely/not/here.asm")).unwrap_err();
        assert_eq!(e.kind, crate::ErrorKind::IO);
    }
}
