//! Line-oriented tokenizer for assembly source.
//!
//! Source is a sequence of statements, one per line:
//! ```text
//!  line      = { label ":" } [ statement ] [ ";" comment ]
//!  statement = directive | mnemonic [ operand ] | name ("EQU" | "=") expr
//!  number    = /\d+/ | /$[0-9a-f]+/ | /0x[0-9a-f]+/ | /%[01]+/ | /'.'/
//!  name      = /[a-z_.][a-z0-9_.]*/   (case sensitive; keywords are not)
//! ```
//! Included files are read through a stack of cursors; reaching the end of an
//! included file yields an end-of-line so the `INCLUDE` statement is terminated.
use crate::error::SourcePos;
use crate::files::FileTable;
use crate::{Error, ErrorKind};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::rc::Rc;

lazy_static! {
    static ref RE_NAME: Regex = Regex::new(r"^[A-Za-z_.][A-Za-z0-9_.]*").unwrap();
    static ref RE_DEC: Regex = Regex::new(r"^[0-9]+").unwrap();
    static ref RE_HEX: Regex = Regex::new(r"^(?:\$|0[xX])([0-9A-Fa-f]+)").unwrap();
    static ref RE_BIN: Regex = Regex::new(r"^%([01]+)").unwrap();
}

/// Punctuation and keywords of the engine itself. Instruction mnemonics and
/// condition names belong to the instruction set and arrive as identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reserved {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Hash,
    Colon,
    Equals,
    Less,
    Greater,
    // directives
    Code,
    Data,
    ZPage,
    Db,
    Dw,
    Ds,
    Equ,
    Include,
    Public,
    Extern,
    End,
    // structured pseudo-ops
    If,
    ElseIf,
    Else,
    EndIf,
    Do,
    While,
    Wend,
}
impl Reserved {
    pub fn from_word(word: &str) -> Option<Reserved> {
        let r = match word.to_ascii_uppercase().as_str() {
            "CODE" => Reserved::Code,
            "DATA" => Reserved::Data,
            "ZPAGE" => Reserved::ZPage,
            "DB" | "BYTE" | "DEFB" => Reserved::Db,
            "DW" | "WORD" | "DEFW" => Reserved::Dw,
            "DS" | "DEFS" | "RES" => Reserved::Ds,
            "EQU" => Reserved::Equ,
            "INCLUDE" => Reserved::Include,
            "PUBLIC" => Reserved::Public,
            "EXTERN" => Reserved::Extern,
            "END" => Reserved::End,
            "IF" => Reserved::If,
            "ELSEIF" => Reserved::ElseIf,
            "ELSE" => Reserved::Else,
            "ENDIF" => Reserved::EndIf,
            "DO" => Reserved::Do,
            "WHILE" => Reserved::While,
            "WEND" => Reserved::Wend,
            _ => return None,
        };
        Some(r)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Reserved(Reserved),
    Identifier(String),
    Number(u32),
    Str(String),
    Eol,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePos,
}
impl Token {
    pub fn is(&self, r: Reserved) -> bool { self.kind == TokenKind::Reserved(r) }
    pub fn is_end_of_statement(&self) -> bool { matches!(self.kind, TokenKind::Eol | TokenKind::Eof) }
    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(s) => Some(s.as_str()),
            _ => None,
        }
    }
}
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            TokenKind::Reserved(r) => write!(f, "{:?}", r),
            TokenKind::Identifier(s) => write!(f, "\"{}\"", s),
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Str(s) => write!(f, "string \"{}\"", s),
            TokenKind::Eol => write!(f, "end of line"),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}

#[derive(Debug)]
struct Cursor {
    file: usize,
    text: Rc<str>,
    at: usize,
    line: u32,
    col: u32,
}
impl Cursor {
    fn rest(&self) -> &str { &self.text[self.at..] }
    fn pos(&self) -> SourcePos { SourcePos::new(self.file, self.line, self.col) }
    fn advance(&mut self, n: usize) {
        self.at += n;
        self.col += n as u32;
    }
}

/// Produces tokens from a root file and any files it includes, with a
/// one-token lookahead buffer for parsers that need to peek.
#[derive(Debug)]
pub struct Tokenizer {
    stack: Vec<Cursor>,
    lookahead: Option<Token>,
    last_pos: SourcePos,
}
impl Tokenizer {
    pub fn new(files: &FileTable, root: usize) -> Self {
        let text = files.text(root).unwrap_or_else(|| Rc::from(""));
        Tokenizer {
            stack: vec![Cursor {
                file: root,
                text,
                at: 0,
                line: 1,
                col: 1,
            }],
            lookahead: None,
            last_pos: SourcePos::new(root, 1, 1),
        }
    }

    /// Continue reading from `file` until its end, then resume the current file.
    pub fn push_file(&mut self, files: &FileTable, file: usize, pos: SourcePos) -> Result<(), Error> {
        if self.stack.iter().any(|c| c.file == file) {
            return Err(Error::new(
                ErrorKind::Syntax,
                Some(pos),
                &format!("INCLUDE recursion: \"{}\" is already being read", files.filename_display(file)),
            ));
        }
        let text = files
            .text(file)
            .ok_or_else(|| Error::new(ErrorKind::IO, Some(pos), "include file not loaded"))?;
        self.stack.push(Cursor {
            file,
            text,
            at: 0,
            line: 1,
            col: 1,
        });
        Ok(())
    }

    pub fn next(&mut self) -> Result<Token, Error> {
        let t = match self.lookahead.take() {
            Some(t) => t,
            None => self.scan()?,
        };
        self.last_pos = t.pos;
        Ok(t)
    }
    pub fn peek(&mut self) -> Result<&Token, Error> {
        let t = match self.lookahead.take() {
            Some(t) => t,
            None => self.scan()?,
        };
        Ok(self.lookahead.insert(t))
    }
    /// Return a token so the next call to `next` yields it again.
    pub fn unread(&mut self, t: Token) {
        debug_assert!(self.lookahead.is_none(), "only one token of lookahead");
        self.lookahead = Some(t);
    }
    /// Discard tokens up to and including the end of the current line.
    pub fn skip_line(&mut self) {
        loop {
            match self.next() {
                Ok(t) if t.kind == TokenKind::Eof => {
                    self.unread(t);
                    return;
                }
                Ok(t) if t.kind == TokenKind::Eol => return,
                Ok(_) => {}
                Err(_) => {
                    // unscannable characters: drop the rest of the physical line
                    if let Some(c) = self.stack.last_mut() {
                        let n = c.rest().find('\n').unwrap_or(c.rest().len());
                        c.advance(n);
                    }
                }
            }
        }
    }

    fn scan(&mut self) -> Result<Token, Error> {
        {
            let depth = self.stack.len();
            let Some(c) = self.stack.last_mut() else {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    pos: self.last_pos,
                });
            };
            // skip blanks and comments
            let rest = c.rest();
            let blank = rest.len() - rest.trim_start_matches(&[' ', '\t', '\r'][..]).len();
            c.advance(blank);
            if c.rest().starts_with(';') {
                let n = c.rest().find('\n').unwrap_or(c.rest().len());
                c.advance(n);
            }
            let pos = c.pos();
            let Some(ch) = c.rest().chars().next() else {
                if depth > 1 {
                    self.stack.pop();
                    return Ok(Token { kind: TokenKind::Eol, pos });
                }
                return Ok(Token { kind: TokenKind::Eof, pos });
            };
            if ch == '\n' {
                c.at += 1;
                c.line += 1;
                c.col = 1;
                return Ok(Token { kind: TokenKind::Eol, pos });
            }
            let kind = Self::scan_token(c, ch, pos)?;
            Ok(Token { kind, pos })
        }
    }

    fn scan_token(c: &mut Cursor, ch: char, pos: SourcePos) -> Result<TokenKind, Error> {
        let rest = c.rest();
        if let Some(m) = RE_HEX.captures(rest) {
            let len = m[0].len();
            let v = parse_number(&m[1], 16, pos)?;
            c.advance(len);
            return Ok(TokenKind::Number(v));
        }
        if let Some(m) = RE_DEC.find(rest) {
            let (v, end) = (parse_number(m.as_str(), 10, pos)?, m.end());
            c.advance(end);
            return Ok(TokenKind::Number(v));
        }
        if let Some(m) = RE_BIN.captures(rest) {
            let len = m[0].len();
            let v = parse_number(&m[1], 2, pos)?;
            c.advance(len);
            return Ok(TokenKind::Number(v));
        }
        if let Some(m) = RE_NAME.find(rest) {
            let (word, end) = (m.as_str().to_string(), m.end());
            c.advance(end);
            return Ok(match Reserved::from_word(&word) {
                Some(r) => TokenKind::Reserved(r),
                None => TokenKind::Identifier(word),
            });
        }
        match ch {
            '\'' => {
                let mut chars = rest.chars();
                chars.next();
                let v = chars.next().filter(|&v| v != '\n').ok_or_else(|| {
                    Error::new(ErrorKind::Syntax, Some(pos), "missing character after `'`")
                })?;
                let mut len = 1 + v.len_utf8();
                // closing quote is optional
                if chars.next() == Some('\'') {
                    len += 1;
                }
                c.advance(len);
                Ok(TokenKind::Number(v as u32))
            }
            '"' => Self::scan_string(c, pos),
            _ => {
                let two = rest.get(..2);
                let punct = match (ch, two) {
                    (_, Some("<<")) => Some((Reserved::Shl, 2)),
                    (_, Some(">>")) => Some((Reserved::Shr, 2)),
                    ('+', _) => Some((Reserved::Plus, 1)),
                    ('-', _) => Some((Reserved::Minus, 1)),
                    ('*', _) => Some((Reserved::Star, 1)),
                    ('/', _) => Some((Reserved::Slash, 1)),
                    ('%', _) => Some((Reserved::Percent, 1)),
                    ('&', _) => Some((Reserved::Amp, 1)),
                    ('|', _) => Some((Reserved::Pipe, 1)),
                    ('^', _) => Some((Reserved::Caret, 1)),
                    ('~', _) => Some((Reserved::Tilde, 1)),
                    ('(', _) => Some((Reserved::LParen, 1)),
                    (')', _) => Some((Reserved::RParen, 1)),
                    ('[', _) => Some((Reserved::LBracket, 1)),
                    (']', _) => Some((Reserved::RBracket, 1)),
                    (',', _) => Some((Reserved::Comma, 1)),
                    ('#', _) => Some((Reserved::Hash, 1)),
                    (':', _) => Some((Reserved::Colon, 1)),
                    ('=', _) => Some((Reserved::Equals, 1)),
                    ('<', _) => Some((Reserved::Less, 1)),
                    ('>', _) => Some((Reserved::Greater, 1)),
                    _ => None,
                };
                match punct {
                    Some((r, len)) => {
                        c.advance(len);
                        Ok(TokenKind::Reserved(r))
                    }
                    None => {
                        c.advance(ch.len_utf8());
                        Err(syntax_err!(pos, "unexpected character '{}'", ch))
                    }
                }
            }
        }
    }

    fn scan_string(c: &mut Cursor, pos: SourcePos) -> Result<TokenKind, Error> {
        let mut s = String::new();
        let mut chars = c.rest().char_indices().skip(1);
        while let Some((i, ch)) = chars.next() {
            match ch {
                '"' => {
                    c.advance(i + 1);
                    return Ok(TokenKind::Str(s));
                }
                '\n' => break,
                '\\' => {
                    let esc = match chars.next() {
                        Some((_, 'n')) => '\n',
                        Some((_, 'r')) => '\r',
                        Some((_, 't')) => '\t',
                        Some((_, '0')) => '\0',
                        Some((_, e)) if e != '\n' => e,
                        _ => break,
                    };
                    s.push(esc);
                }
                _ => s.push(ch),
            }
        }
        // leave the newline for the next scan
        let n = c.rest().find('\n').unwrap_or(c.rest().len());
        c.advance(n);
        Err(Error::new(ErrorKind::Syntax, Some(pos), "unterminated string"))
    }
}

fn parse_number(digits: &str, radix: u32, pos: SourcePos) -> Result<u32, Error> {
    match u32::from_str_radix(digits, radix) {
        Ok(v) if v <= 0xffff => Ok(v),
        _ => Err(Error::new(
            ErrorKind::OutOfRange,
            Some(pos),
            &format!("number \"{}\" does not fit in 16 bits", digits),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut files = FileTable::new();
        let id = files.add_source("t.asm", src);
        let mut t = Tokenizer::new(&files, id);
        let mut out = Vec::new();
        loop {
            let tok = t.next().unwrap();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                return out;
            }
        }
    }

    #[test]
    fn numbers_and_names() {
        use TokenKind::*;
        assert_eq!(
            kinds("start: lda #$1F ; comment\n db %101, 0x10, 'A', 42"),
            vec![
                Identifier("start".into()),
                Reserved(super::Reserved::Colon),
                Identifier("lda".into()),
                Reserved(super::Reserved::Hash),
                Number(0x1f),
                Eol,
                Reserved(super::Reserved::Db),
                Number(5),
                Reserved(super::Reserved::Comma),
                Number(16),
                Reserved(super::Reserved::Comma),
                Number(65),
                Reserved(super::Reserved::Comma),
                Number(42),
                Eof
            ]
        );
    }

    #[test]
    fn operators_and_strings() {
        use TokenKind::*;
        assert_eq!(
            kinds("x = 1<<2 >> 3 % 4\n\"hi\\n\""),
            vec![
                Identifier("x".into()),
                Reserved(super::Reserved::Equals),
                Number(1),
                Reserved(super::Reserved::Shl),
                Number(2),
                Reserved(super::Reserved::Shr),
                Number(3),
                Reserved(super::Reserved::Percent),
                Number(4),
                Eol,
                Str("hi\n".into()),
                Eof
            ]
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(kinds("endif")[0], TokenKind::Reserved(Reserved::EndIf));
        assert_eq!(kinds("Zpage")[0], TokenKind::Reserved(Reserved::ZPage));
        assert_eq!(kinds("ENDIFX")[0], TokenKind::Identifier("ENDIFX".into()));
    }

    #[test]
    fn errors_and_recovery() {
        let mut files = FileTable::new();
        let id = files.add_source("t.asm", "lda @ x\nrts \"open\nnop");
        let mut t = Tokenizer::new(&files, id);
        assert_eq!(t.next().unwrap().identifier(), Some("lda"));
        let e = t.next().unwrap_err();
        assert_eq!((e.kind, e.pos.map(|p| p.col)), (ErrorKind::Syntax, Some(5)));
        t.skip_line();
        assert_eq!(t.next().unwrap().identifier(), Some("rts"));
        assert!(t.next().is_err());
        assert_eq!(t.next().unwrap().kind, TokenKind::Eol);
        let nop = t.next().unwrap();
        assert_eq!((nop.pos.line, nop.pos.col), (3, 1));
        let overflow = files.add_source("big.asm", "70000");
        assert_eq!(Tokenizer::new(&files, overflow).next().unwrap_err().kind, ErrorKind::OutOfRange);
    }

    #[test]
    fn lookahead_and_includes() -> Result<(), Error> {
        let mut files = FileTable::new();
        let root = files.add_source("main.asm", "a\nb");
        let inc = files.add_source("inc.asm", "x");
        let mut t = Tokenizer::new(&files, root);
        assert_eq!(t.peek()?.identifier(), Some("a"));
        let a = t.next()?;
        assert_eq!(a.identifier(), Some("a"));
        t.push_file(&files, inc, a.pos)?;
        assert!(t.push_file(&files, inc, a.pos).is_err());
        assert_eq!(t.next()?.identifier(), Some("x"));
        assert_eq!(t.next()?.kind, TokenKind::Eol);
        let eol = t.next()?;
        assert_eq!((eol.kind, eol.pos.file), (TokenKind::Eol, root));
        let b = t.next()?;
        t.unread(b);
        assert_eq!(t.next()?.identifier(), Some("b"));
        assert_eq!(t.next()?.kind, TokenKind::Eof);
        assert_eq!(t.next()?.kind, TokenKind::Eof);
        Ok(())
    }
}
