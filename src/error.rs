use crate::files::FileTable;
use std::collections::BTreeMap;
use std::{convert::From, fmt};

/// A location in assembly source: the id of the file (see [`FileTable`]) and
/// the 1-based line and column of the token that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourcePos {
    pub file: usize,
    pub line: u32,
    pub col: u32,
}
impl SourcePos {
    pub fn new(file: usize, line: u32, col: u32) -> Self { SourcePos { file, line, col } }
}
impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}:{}", self.line, self.col) }
}

/// Simple custom Error for the assembler, librarian and linker
pub struct Error {
    pub kind: ErrorKind,
    pub pos: Option<SourcePos>,
    pub msg: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// error in syntax of assembly code
    Syntax,
    /// relocatable or external value used where it is not allowed
    AddressUsage,
    /// value or branch offset does not fit its encoding
    OutOfRange,
    /// symbol still undefined after the first pass
    Undefined,
    /// symbol defined twice within one pass
    Duplicate,
    /// misuse of IF/ELSE/ENDIF or DO/WHILE/WEND
    Block,
    /// two modules define the same public symbol
    DuplicateSymbol,
    /// external reference never satisfied at link time
    UndefinedExternal,
    /// underlying io error (including missing files)
    IO,
    /// malformed object or library file
    Format,
    /// catch-all for other errors
    General,
}

impl Error {
    pub fn new(kind: ErrorKind, pos: Option<SourcePos>, message: &str) -> Error {
        Error {
            kind,
            pos,
            msg: String::from(message),
        }
    }
    /// Errors that stop the current run immediately instead of being collected.
    pub fn is_fatal(&self) -> bool { matches!(self.kind, ErrorKind::IO | ErrorKind::Format) }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self { Error::new(ErrorKind::IO, None, e.to_string().as_str()) }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {:?}: {}", red!("relasm::Error"), self.kind, self.msg)
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(pos) = self.pos {
            write!(f, "{}: {}", pos, self.msg)
        } else {
            write!(f, "{}", self.msg)
        }
    }
}
impl std::error::Error for Error {}

/// The set of errors collected over an assembly or link run.
///
/// Errors that carry a source position are kept once per position (the first
/// one recorded wins) so the same mistake seen again in a later pass is not
/// reported twice. Positionless errors are kept once per message.
#[derive(Debug, Default)]
pub struct Diagnostics {
    positioned: BTreeMap<SourcePos, Error>,
    other: Vec<Error>,
    files: Vec<String>,
}
impl Diagnostics {
    pub fn new() -> Self { Diagnostics::default() }
    /// Record an error. Returns false if an error was already known for the same position.
    pub fn record(&mut self, e: Error) -> bool {
        match e.pos {
            Some(pos) => {
                if self.positioned.contains_key(&pos) {
                    return false;
                }
                self.positioned.insert(pos, e);
                true
            }
            None => {
                if self.other.iter().any(|o| o.kind == e.kind && o.msg == e.msg) {
                    return false;
                }
                self.other.push(e);
                true
            }
        }
    }
    pub fn len(&self) -> usize { self.positioned.len() + self.other.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn has_fatal(&self) -> bool { self.iter().any(|e| e.is_fatal()) }
    /// Errors in source order followed by positionless errors in the order recorded.
    pub fn iter(&self) -> impl Iterator<Item = &Error> { self.positioned.values().chain(self.other.iter()) }
    pub fn count_kind(&self, kind: ErrorKind) -> usize { self.iter().filter(|e| e.kind == kind).count() }
    /// Remember file names so positions can be rendered as `file:line:col`.
    pub fn attach_files(&mut self, files: &FileTable) { self.files = files.display_names(); }
}
impl From<Error> for Diagnostics {
    fn from(e: Error) -> Self {
        let mut d = Diagnostics::new();
        d.record(e);
        d
    }
}
impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for e in self.iter() {
            let label = match e.kind {
                ErrorKind::Syntax => red!("Syntax Error"),
                ErrorKind::AddressUsage => red!("Address Usage Error"),
                ErrorKind::OutOfRange => red!("Range Error"),
                ErrorKind::Undefined => red!("Undefined Symbol"),
                ErrorKind::Duplicate | ErrorKind::DuplicateSymbol => red!("Duplicate Symbol"),
                ErrorKind::Block => red!("Block Error"),
                ErrorKind::UndefinedExternal => red!("Undefined External"),
                _ => red!("Error"),
            };
            match e.pos {
                Some(pos) => {
                    let file = self.files.get(pos.file).map_or("<source>", String::as_str);
                    writeln!(f, "{}:{}:{}: {}: {}", file, pos.line, pos.col, label, e.msg)?;
                }
                None => writeln!(f, "{}: {}", label, e.msg)?,
            }
        }
        write!(f, "{} error(s)", self.len())
    }
}
impl std::error::Error for Diagnostics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_by_position() {
        let mut d = Diagnostics::new();
        let pos = SourcePos::new(0, 3, 7);
        assert!(d.record(syntax_err!(pos, "bad {}", 1)));
        assert!(!d.record(syntax_err!(pos, "bad again")));
        assert!(d.record(syntax_err!(SourcePos::new(0, 4, 1), "other line")));
        assert_eq!(d.len(), 2);
        assert_eq!(d.iter().next().map(|e| e.msg.as_str()), Some("bad 1"));
    }

    #[test]
    fn positionless_dedup_by_message() {
        let mut d = Diagnostics::new();
        d.record(Error::new(ErrorKind::UndefinedExternal, None, "undefined external \"FOO\""));
        d.record(Error::new(ErrorKind::UndefinedExternal, None, "undefined external \"FOO\""));
        d.record(Error::new(ErrorKind::UndefinedExternal, None, "undefined external \"BAR\""));
        assert_eq!(d.count_kind(ErrorKind::UndefinedExternal), 2);
        assert!(!d.has_fatal());
        d.record(Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")));
        assert!(d.has_fatal());
    }
}
