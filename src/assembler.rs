//! Assembling a source file into a relocatable object module is an N-pass
//! process. Every pass reads the whole source again from the top:
//!
//!  1. Segments, the address-usage table, open blocks and the auto-label
//!     counter start out empty.
//!  2. Each statement emits bytes into the current segment. Symbols that are
//!     not defined yet evaluate to `Undefined` and the instruction set picks
//!     its longest encoding for them.
//!  3. Every (re)definition of a symbol is compared against the value it had
//!     in the previous pass; any difference means another pass is needed.
//!
//! \[_repeat until a pass (the second or later) changes nothing_\]
//!
//! Encodings only ever get shorter from one pass to the next: a forward
//! reference starts as the long form and shrinks once its target is known.
//! Relative branches to forward targets use the previous pass's address of
//! the target, corrected by how much the code in front of the branch (and the
//! branch itself) has shrunk since, so the estimate never undershoots.
//!
//! Diagnostics accumulate over the whole run, so an error recorded in any
//! pass fails the assembly. The one exception is a short branch found out of
//! range while long branches are disabled: its offset may still shrink, so
//! those errors are held per pass and only the final pass's are kept.
use crate::address::{Address, AddressType, Part, SegmentKind};
use crate::block::{Block, BlockStack};
use crate::error::{Diagnostics, SourcePos};
use crate::expr::{self, Operands};
use crate::files::FileTable;
use crate::isa::{Condition, InstructionSet};
use crate::listing::{Listing, ListingLine};
use crate::object::Object;
use crate::segment::{new_segments, Segment};
use crate::symbols::{Definition, IdentifierTable, SymbolTable, AUTO_LABEL_BASE};
use crate::token::{Reserved, Token, TokenKind, Tokenizer};
use crate::{Error, ErrorKind};
use std::collections::BTreeMap;
use std::path::Path;

/// A pass stops reading once it has collected more errors than this.
pub const MAX_ERRORS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// expand out-of-range relative branches into a branch around a JMP
    pub long_branches: bool,
    pub max_passes: u32,
}
impl Default for Options {
    fn default() -> Self {
        Options {
            long_branches: true,
            max_passes: 16,
        }
    }
}

/// Outcome of [`Assembler::reach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    /// the short form reaches; the offset to encode
    Short(i8),
    /// the target is out of short range (offset from the end of the short form)
    Far(i32),
    /// the target is not known yet
    Unknown,
}

/// The result of a successful assembly.
#[derive(Debug)]
pub struct Assembly {
    pub object: Object,
    pub listing: Listing,
    pub passes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReachEntry {
    pos: SourcePos,
    here: u16,
    len: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct Assembler<'a> {
    isa: &'a dyn InstructionSet,
    options: Options,
    files: FileTable,
    tokens: Tokenizer,
    /// the last token read ended a line
    line_ended: bool,
    idents: IdentifierTable,
    symbols: SymbolTable,
    blocks: BlockStack,
    segments: [Segment; 3],
    current: SegmentKind,
    usage: BTreeMap<Address, Address>,
    pass: u32,
    address_changed: bool,
    next_auto_label: u32,
    stmt_start: Address,
    reach_log: Vec<ReachEntry>,
    prev_reach_log: Vec<ReachEntry>,
    diagnostics: Diagnostics,
    /// branch range errors of the current pass
    provisional: Vec<Error>,
    listing: Listing,
    fatal: bool,
}

/// Assemble in-memory source.
pub fn assemble_source(
    isa: &dyn InstructionSet, options: Options, name: &str, text: &str,
) -> Result<Assembly, Diagnostics> {
    let mut asm = Assembler::new(isa, options);
    let root = asm.add_source(name, text);
    asm.run(root)
}

impl<'a> Assembler<'a> {
    pub fn new(isa: &'a dyn InstructionSet, options: Options) -> Self {
        let files = FileTable::new();
        let tokens = Tokenizer::new(&files, 0);
        Assembler {
            isa,
            options,
            files,
            tokens,
            line_ended: true,
            idents: IdentifierTable::new(),
            symbols: SymbolTable::new(),
            blocks: BlockStack::new(),
            segments: new_segments(),
            current: SegmentKind::Code,
            usage: BTreeMap::new(),
            pass: 0,
            address_changed: false,
            next_auto_label: AUTO_LABEL_BASE as u32,
            stmt_start: Address::in_segment(SegmentKind::Code, 0),
            reach_log: Vec::new(),
            prev_reach_log: Vec::new(),
            diagnostics: Diagnostics::new(),
            provisional: Vec::new(),
            listing: Listing::new(),
            fatal: false,
        }
    }

    /// Register in-memory source (also makes it available to `INCLUDE`).
    pub fn add_source(&mut self, name: &str, text: &str) -> usize { self.files.add_source(name, text) }
    pub fn files(&self) -> &FileTable { &self.files }
    pub fn segment(&self, kind: SegmentKind) -> &Segment { &self.segments[kind.index()] }
    pub fn long_branches(&self) -> bool { self.options.long_branches }

    pub fn assemble_file(&mut self, path: &Path) -> Result<Assembly, Diagnostics> {
        let root = self.files.load(path)?;
        self.run(root)
    }

    /// Run passes over the file with id `root` until the addresses settle.
    pub fn run(&mut self, root: usize) -> Result<Assembly, Diagnostics> {
        verbose_println!("Assembling for the {}...", self.isa.name());
        self.pass = 0;
        self.reach_log.clear();
        self.diagnostics = Diagnostics::new();
        loop {
            self.pass += 1;
            verbose_println!("Assembly pass {}...", self.pass);
            self.begin_pass(root);
            self.run_pass();
            self.end_pass();
            if self.fatal || self.diagnostics.len() > MAX_ERRORS {
                break;
            }
            if self.pass >= 2 && !self.address_changed {
                break;
            }
            if self.pass >= self.options.max_passes {
                self.record(general_err!("addresses did not converge after {} passes", self.pass));
                break;
            }
        }
        for e in std::mem::take(&mut self.provisional) {
            self.diagnostics.record(e);
        }
        self.diagnostics.attach_files(&self.files);
        if !self.diagnostics.is_empty() {
            return Err(std::mem::take(&mut self.diagnostics));
        }
        verbose_println!("Assembly complete after {} passes.", self.pass);
        self.listing.set_symbols(self.symbols.iter());
        Ok(Assembly {
            object: self.to_object(),
            listing: self.listing.clone(),
            passes: self.pass,
        })
    }

    fn begin_pass(&mut self, root: usize) {
        for seg in self.segments.iter_mut() {
            seg.clear();
        }
        self.current = SegmentKind::Code;
        self.usage.clear();
        self.blocks.clear();
        self.listing.clear();
        self.next_auto_label = AUTO_LABEL_BASE as u32;
        self.address_changed = false;
        self.provisional.clear();
        self.prev_reach_log = std::mem::take(&mut self.reach_log);
        self.tokens = Tokenizer::new(&self.files, root);
        self.line_ended = true;
    }

    fn run_pass(&mut self) {
        loop {
            if self.diagnostics.len() > MAX_ERRORS {
                break;
            }
            let first = match self.next_token() {
                Ok(t) => t,
                Err(e) => {
                    self.record(e);
                    self.tokens.skip_line();
                    continue;
                }
            };
            match first.kind {
                TokenKind::Eof => break,
                TokenKind::Eol => continue,
                _ => {}
            }
            let pos = first.pos;
            let (segment, start) = (self.current, self.segment(self.current).len());
            self.stmt_start = self.here();
            let flow = match self.statement(first) {
                Ok(flow) => flow,
                Err(e) => {
                    let fatal = e.is_fatal();
                    self.record(e);
                    if fatal {
                        self.fatal = true;
                        break;
                    }
                    if !self.line_ended {
                        self.tokens.skip_line();
                    }
                    Flow::Continue
                }
            };
            self.list_statement(pos, segment, start);
            if flow == Flow::Stop {
                break;
            }
        }
    }

    fn end_pass(&mut self) {
        for (block, pos) in self.blocks.drain() {
            self.record(Error::new(
                ErrorKind::Block,
                Some(pos),
                &format!("{} block is not closed", block.name()),
            ));
            if let Err(e) = self.define_pending(&block, pos) {
                self.record(e);
            }
        }
        if self.pass >= 2 {
            let missing: Vec<String> = self
                .symbols
                .iter()
                .filter(|s| s.public && s.address.is_undefined())
                .map(|s| s.name.clone())
                .collect();
            for name in missing {
                self.record(Error::new(
                    ErrorKind::Undefined,
                    None,
                    &format!("public symbol \"{}\" is never defined", name),
                ));
            }
        }
    }

    fn list_statement(&mut self, pos: SourcePos, segment: SegmentKind, start: usize) {
        let bytes = if self.current == segment {
            self.segment(segment).bytes()[start..].to_vec()
        } else {
            Vec::new()
        };
        let text = self.files.line(pos.file, pos.line).unwrap_or("").to_string();
        self.listing.push(ListingLine {
            pos,
            segment,
            address: start as u16,
            bytes,
            text,
        });
    }

    fn to_object(&self) -> Object {
        let mut obj = Object::new();
        obj.segments = self.segments.clone();
        obj.symbols = self.symbols.to_object_symbols();
        obj.usage = self.usage.clone();
        obj
    }

    pub fn record(&mut self, e: Error) { self.diagnostics.record(e); }
    /// Record an error that stands only if it is still there in the final pass.
    pub fn record_provisional(&mut self, e: Error) { self.provisional.push(e); }

    /// Read one statement starting with `first`, including its end of line.
    fn statement(&mut self, first: Token) -> Result<Flow, Error> {
        let mut t = first;
        loop {
            let name = match t.kind {
                TokenKind::Identifier(ref name) => name.clone(),
                TokenKind::Reserved(r) => return self.directive(r, t.pos),
                _ => return Err(syntax_err!(t.pos, "unexpected {}", t)),
            };
            let pos = t.pos;
            let next = self.next_token()?;
            if next.is(Reserved::Colon) {
                self.define_name(&name, self.here(), pos)?;
                t = self.next_token()?;
                if t.is_end_of_statement() {
                    self.push_back(t);
                    return self.end_of_statement();
                }
                continue;
            }
            if next.is(Reserved::Equ) || next.is(Reserved::Equals) {
                let value = self.expression()?;
                self.define_name(&name, value, pos)?;
                return self.end_of_statement();
            }
            self.push_back(next);
            if !self.isa.is_mnemonic(&name) {
                return Err(syntax_err!(pos, "unknown instruction \"{}\"", name));
            }
            let isa = self.isa;
            isa.assemble(self, &name, pos)?;
            return self.end_of_statement();
        }
    }

    fn end_of_statement(&mut self) -> Result<Flow, Error> {
        let t = self.next_token()?;
        match t.kind {
            TokenKind::Eol => Ok(Flow::Continue),
            TokenKind::Eof => {
                self.push_back(t);
                Ok(Flow::Continue)
            }
            _ => Err(syntax_err!(t.pos, "unexpected {} at end of statement", t)),
        }
    }

    /// Consume a comma if one follows.
    fn comma(&mut self) -> Result<bool, Error> {
        let t = self.next_token()?;
        if t.is(Reserved::Comma) {
            return Ok(true);
        }
        self.push_back(t);
        Ok(false)
    }

    pub fn expression(&mut self) -> Result<Address, Error> { expr::expression(self) }

    fn directive(&mut self, r: Reserved, pos: SourcePos) -> Result<Flow, Error> {
        match r {
            Reserved::Code => self.current = SegmentKind::Code,
            Reserved::Data => self.current = SegmentKind::Data,
            Reserved::ZPage => self.current = SegmentKind::ZeroPage,
            Reserved::Db => self.define_bytes()?,
            Reserved::Dw => self.define_words()?,
            Reserved::Ds => self.reserve(pos)?,
            Reserved::Public => self.declare(true)?,
            Reserved::Extern => self.declare(false)?,
            Reserved::Include => return self.include(pos),
            Reserved::End => {
                self.end_of_statement()?;
                return Ok(Flow::Stop);
            }
            Reserved::If => self.structured_if(pos)?,
            Reserved::ElseIf => self.structured_elseif(pos)?,
            Reserved::Else => self.structured_else(pos)?,
            Reserved::EndIf => self.structured_endif(pos)?,
            Reserved::Do => self.structured_do(pos)?,
            Reserved::While => return self.structured_while(pos),
            Reserved::Wend => self.structured_wend(pos)?,
            _ => return Err(syntax_err!(pos, "unexpected {:?}", r)),
        }
        self.end_of_statement()
    }

    fn define_bytes(&mut self) -> Result<(), Error> {
        loop {
            let t = self.next_token()?;
            match t.kind {
                TokenKind::Str(ref s) => {
                    for b in s.bytes() {
                        self.write_byte(b);
                    }
                }
                _ => {
                    let pos = t.pos;
                    self.push_back(t);
                    let value = self.expression()?;
                    self.write_byte_address(pos, value);
                }
            }
            if !self.comma()? {
                return Ok(());
            }
        }
    }

    fn define_words(&mut self) -> Result<(), Error> {
        loop {
            let t = self.next_token()?;
            let pos = t.pos;
            self.push_back(t);
            let value = self.expression()?;
            self.write_word(pos, value);
            if !self.comma()? {
                return Ok(());
            }
        }
    }

    /// `DS count [, fill]`
    fn reserve(&mut self, pos: SourcePos) -> Result<(), Error> {
        let t = self.next_token()?;
        let count_pos = t.pos;
        self.push_back(t);
        let count = self.expression()?;
        let count = match count.kind {
            AddressType::Const => count.value,
            // a pass must never lay out less than the passes after it
            AddressType::Undefined => {
                return Err(Error::new(
                    ErrorKind::Undefined,
                    Some(count_pos),
                    "the size of DS must be defined before the DS",
                ))
            }
            _ => return Err(usage_err!(pos, "the size of DS must be a constant, not {}", count)),
        };
        let mut fill = 0;
        if self.comma()? {
            let f = self.expression()?;
            if !f.is_const() || !f.fits_byte() {
                return Err(usage_err!(pos, "DS fill value must be a byte constant"));
            }
            fill = f.value as u8;
        }
        for _ in 0..count {
            self.write_byte(fill);
        }
        Ok(())
    }

    /// `PUBLIC name, ...` or `EXTERN name, ...`
    fn declare(&mut self, public: bool) -> Result<(), Error> {
        loop {
            let t = self.next_token()?;
            let name = t
                .identifier()
                .ok_or_else(|| syntax_err!(t.pos, "expected a symbol name, found {}", t))?
                .to_string();
            let id = self.idents.intern(&name).map_err(|e| expr::at(e, t.pos))?;
            if public {
                self.symbols.declare_public(id, &name);
            } else {
                self.define_id(id, &name, Address::external(id), t.pos)?;
            }
            if !self.comma()? {
                return Ok(());
            }
        }
    }

    fn include(&mut self, pos: SourcePos) -> Result<Flow, Error> {
        let t = self.next_token()?;
        let name = match t.kind {
            TokenKind::Str(ref s) => s.clone(),
            _ => return Err(syntax_err!(t.pos, "INCLUDE expects a quoted file name, found {}", t)),
        };
        let end = self.next_token()?;
        if !end.is_end_of_statement() {
            return Err(syntax_err!(end.pos, "unexpected {} after INCLUDE", end));
        }
        let path = self.files.resolve_include(pos.file, &name);
        let id = self
            .files
            .load(&path)
            .map_err(|e| Error::new(ErrorKind::IO, Some(pos), &e.msg))?;
        self.tokens.push_file(&self.files, id, pos)?;
        Ok(Flow::Continue)
    }

    fn define_name(&mut self, name: &str, address: Address, pos: SourcePos) -> Result<(), Error> {
        let id = self.idents.intern(name).map_err(|e| expr::at(e, pos))?;
        self.define_id(id, name, address, pos)
    }

    fn define_id(&mut self, id: u16, name: &str, address: Address, pos: SourcePos) -> Result<(), Error> {
        match self.symbols.define(id, name, address, self.pass) {
            Definition::Unchanged => Ok(()),
            Definition::Moved => {
                self.address_changed = true;
                Ok(())
            }
            Definition::Duplicate => Err(Error::new(
                ErrorKind::Duplicate,
                Some(pos),
                &format!("symbol \"{}\" is already defined", name),
            )),
        }
    }

    fn auto_label(&mut self) -> Result<u16, Error> {
        if self.next_auto_label > u16::MAX as u32 {
            return Err(general_err!("too many structured blocks"));
        }
        let id = self.next_auto_label as u16;
        self.next_auto_label += 1;
        Ok(id)
    }
    fn define_auto(&mut self, id: u16, pos: SourcePos) -> Result<(), Error> { self.define_id(id, "", self.here(), pos) }
    fn define_pending(&mut self, block: &Block, pos: SourcePos) -> Result<(), Error> {
        for id in block.pending_ids() {
            self.define_auto(id, pos)?;
        }
        Ok(())
    }

    fn condition(&mut self) -> Result<Condition, Error> {
        let t = self.next_token()?;
        match t.identifier().and_then(|w| self.isa.condition(w)) {
            Some(c) => Ok(c),
            None => Err(syntax_err!(t.pos, "expected a condition (EQ, NE, CS, CC, ...), found {}", t)),
        }
    }

    fn block_err(pos: SourcePos, msg: &str) -> Error { Error::new(ErrorKind::Block, Some(pos), msg) }

    /// Pop blocks up to and including the innermost IF (`want_if`) or DO,
    /// closing any other blocks left open on the way.
    fn close_block(&mut self, pos: SourcePos, want_if: bool, keyword: &str) -> Result<Block, Error> {
        let opener = if want_if { "IF" } else { "DO" };
        let found = if want_if {
            self.blocks.has_if()
        } else {
            self.blocks.has_while()
        };
        if !found {
            return Err(Self::block_err(pos, &format!("{} without {}", keyword, opener)));
        }
        while let Some(b) = self.blocks.pop() {
            if matches!(b, Block::If { .. }) == want_if {
                return Ok(b);
            }
            self.record(Self::block_err(pos, &format!("{} block is not closed before {}", b.name(), keyword)));
            self.define_pending(&b, pos)?;
        }
        Err(Self::block_err(pos, &format!("{} without {}", keyword, opener)))
    }

    fn structured_if(&mut self, pos: SourcePos) -> Result<(), Error> {
        let cond = self.condition()?;
        let else_id = self.auto_label()?;
        let end_id = self.auto_label()?;
        self.blocks.push(
            Block::If {
                else_id: Some(else_id),
                end_id,
            },
            pos,
        );
        let isa = self.isa;
        let target = self.symbols.address(else_id);
        isa.branch_if(self, isa.invert(cond), target, pos)
    }

    fn structured_elseif(&mut self, pos: SourcePos) -> Result<(), Error> {
        let cond = self.condition()?;
        let (else_id, end_id) = match self.blocks.top() {
            Some(&Block::If {
                else_id: Some(else_id),
                end_id,
            }) => (else_id, end_id),
            Some(Block::If { else_id: None, .. }) => return Err(Self::block_err(pos, "ELSEIF after ELSE")),
            _ => return Err(Self::block_err(pos, "ELSEIF without IF")),
        };
        let next_else = self.auto_label()?;
        if let Some(Block::If { else_id, .. }) = self.blocks.top_mut() {
            *else_id = Some(next_else);
        }
        let isa = self.isa;
        let end = self.symbols.address(end_id);
        isa.jump(self, end, pos)?;
        self.define_auto(else_id, pos)?;
        let target = self.symbols.address(next_else);
        isa.branch_if(self, isa.invert(cond), target, pos)
    }

    fn structured_else(&mut self, pos: SourcePos) -> Result<(), Error> {
        let (else_id, end_id) = match self.blocks.top() {
            Some(&Block::If {
                else_id: Some(else_id),
                end_id,
            }) => (else_id, end_id),
            Some(Block::If { else_id: None, .. }) => {
                return Err(Self::block_err(pos, "multiple ELSE in one IF block"));
            }
            _ => return Err(Self::block_err(pos, "ELSE without IF")),
        };
        if let Some(Block::If { else_id, .. }) = self.blocks.top_mut() {
            *else_id = None;
        }
        let isa = self.isa;
        let end = self.symbols.address(end_id);
        isa.jump(self, end, pos)?;
        self.define_auto(else_id, pos)
    }

    fn structured_endif(&mut self, pos: SourcePos) -> Result<(), Error> {
        let block = self.close_block(pos, true, "ENDIF")?;
        self.define_pending(&block, pos)
    }

    fn structured_do(&mut self, pos: SourcePos) -> Result<(), Error> {
        let begin_id = self.auto_label()?;
        let repeat_id = self.auto_label()?;
        let end_id = self.auto_label()?;
        self.define_auto(repeat_id, pos)?;
        self.blocks.push(
            Block::While {
                begin_id,
                repeat_id,
                end_id,
                tested: false,
            },
            pos,
        );
        Ok(())
    }

    fn structured_while(&mut self, pos: SourcePos) -> Result<Flow, Error> {
        let cond = self.condition()?;
        let (begin_id, repeat_id, end_id) = match self.blocks.top_mut() {
            Some(Block::While {
                begin_id,
                repeat_id,
                end_id,
                tested,
            }) => {
                if *tested {
                    return Err(Self::block_err(pos, "multiple WHILE in one DO block"));
                }
                *tested = true;
                (*begin_id, *repeat_id, *end_id)
            }
            _ => return Err(Self::block_err(pos, "WHILE without DO")),
        };
        self.end_of_statement()?;
        // look past blank lines for a WEND that closes the loop right here
        loop {
            let t = self.next_token()?;
            if t.kind != TokenKind::Eol {
                self.push_back(t);
                self.line_ended = true;
                break;
            }
        }
        let isa = self.isa;
        let repeat = self.symbols.address(repeat_id);
        if self.tokens.peek()?.is(Reserved::Wend) && self.reaches_back(repeat, 2) {
            // DO ... WHILE cond / WEND: a single branch back to the top
            self.next_token()?;
            isa.branch_if(self, cond, repeat, pos)?;
            self.define_auto(begin_id, pos)?;
            self.symbols.erase(end_id);
            self.blocks.pop();
            return self.end_of_statement();
        }
        let end = self.symbols.address(end_id);
        isa.branch_if(self, isa.invert(cond), end, pos)?;
        self.define_auto(begin_id, pos)?;
        Ok(Flow::Continue)
    }

    fn structured_wend(&mut self, pos: SourcePos) -> Result<(), Error> {
        let block = self.close_block(pos, false, "WEND")?;
        if let Block::While { repeat_id, .. } = block {
            let isa = self.isa;
            let repeat = self.symbols.address(repeat_id);
            isa.jump(self, repeat, pos)?;
        }
        self.define_pending(&block, pos)
    }

    /// True if a short branch of `short_len` bytes emitted here reaches `target`,
    /// which must already be defined in this pass.
    fn reaches_back(&self, target: Address, short_len: u16) -> bool {
        let here = self.here();
        if target.kind != here.kind || target.part != Part::Word || target.value > here.value {
            return false;
        }
        let offset = target.value as i32 - (here.value as i32 + short_len as i32);
        (-128..=127).contains(&offset)
    }

    /// The address the next emitted byte will get.
    pub fn here(&self) -> Address { self.segment(self.current).tail() }

    pub fn write_byte(&mut self, b: u8) { self.segments[self.current.index()].push(b) }

    fn add_usage(&mut self, value: Address) {
        let site = self.here();
        self.usage.insert(site, value);
    }

    /// Emit a one-byte operand. Relocatable values must name a byte of an
    /// address (or be in the zero page); constants must fit in 8 bits.
    pub fn write_byte_address(&mut self, pos: SourcePos, a: Address) {
        let b = match a.kind {
            AddressType::Const => {
                if !a.fits_byte() {
                    self.record(Error::new(
                        ErrorKind::OutOfRange,
                        Some(pos),
                        &format!("value {} does not fit in a byte", a),
                    ));
                }
                a.value as u8
            }
            AddressType::Undefined => 0,
            _ => match a.part {
                Part::LowByte | Part::HighByte => {
                    self.add_usage(a);
                    a.part.apply(a.value) as u8
                }
                Part::Word if a.kind == AddressType::ZeroPage => {
                    self.add_usage(Address {
                        part: Part::LowByte,
                        ..a
                    });
                    a.value as u8
                }
                Part::Word => {
                    self.record(usage_err!(pos, "{} is a 16-bit address; select a byte with < or >", a));
                    0
                }
            },
        };
        self.write_byte(b);
    }

    /// Emit a little-endian word, recording a relocation for non-constant values.
    pub fn write_word(&mut self, _pos: SourcePos, a: Address) {
        let v = match a.kind {
            AddressType::Const => a.value,
            AddressType::Undefined => 0,
            _ => {
                self.add_usage(a);
                a.part.apply(a.value)
            }
        };
        for b in v.to_le_bytes() {
            self.write_byte(b);
        }
    }

    /// Emit a 16-bit address operand (jump targets, indirect vectors).
    pub fn write_pointer(&mut self, pos: SourcePos, a: Address) {
        if a.part != Part::Word {
            self.record(usage_err!(pos, "{} is a single byte and cannot be used as an address", a));
            self.write_word(pos, Address::constant(0));
            return;
        }
        self.write_word(pos, a);
    }

    /// Decide whether a relative branch from here with a short form of
    /// `short_len` bytes reaches `target`. `long_len` is the length the caller
    /// emits when it does not; it feeds the estimate of the next pass.
    pub fn reach(&mut self, pos: SourcePos, target: Address, short_len: u16, long_len: u16) -> Result<Reach, Error> {
        let here = self.here();
        let index = self.reach_log.len();
        let (reach, len) = self.estimate_reach(pos, here, target, short_len, long_len, index);
        self.reach_log.push(ReachEntry {
            pos,
            here: here.value,
            len,
        });
        reach
    }

    fn estimate_reach(
        &self, pos: SourcePos, here: Address, target: Address, short_len: u16, long_len: u16, index: usize,
    ) -> (Result<Reach, Error>, u16) {
        if target.is_undefined() {
            return (Ok(Reach::Unknown), long_len);
        }
        if target.kind != here.kind || target.part != Part::Word {
            let e = usage_err!(pos, "branch target {} is not in the current {} segment", target, self.current);
            return (Err(e), short_len);
        }
        let actual = target.value as i32 - (here.value as i32 + short_len as i32);
        let mut estimate = actual;
        if target.value > here.value {
            // forward: the target's address is the one from the previous pass
            if let Some(prev) = self.prev_reach_log.get(index).filter(|e| e.pos == pos) {
                let shift = prev.here as i32 - here.value as i32;
                let shrink = prev.len as i32 - short_len as i32;
                estimate = actual - shift - shrink;
            }
        }
        if (-128..=127).contains(&estimate) {
            (Ok(Reach::Short(estimate as i8)), short_len)
        } else {
            (Ok(Reach::Far(actual)), long_len)
        }
    }
}

impl<'a> Operands for Assembler<'a> {
    fn next_token(&mut self) -> Result<Token, Error> {
        let t = self.tokens.next()?;
        self.line_ended = t.kind == TokenKind::Eol;
        Ok(t)
    }
    fn push_back(&mut self, t: Token) {
        if t.is_end_of_statement() {
            self.line_ended = false;
        }
        self.tokens.unread(t)
    }
    fn resolve(&mut self, name: &str, pos: SourcePos) -> Result<Address, Error> {
        let id = self.idents.intern(name).map_err(|e| expr::at(e, pos))?;
        let a = self.symbols.address(id);
        if a.is_undefined() && self.pass >= 2 {
            self.record(Error::new(
                ErrorKind::Undefined,
                Some(pos),
                &format!("undefined symbol \"{}\"", name),
            ));
        }
        Ok(a)
    }
    fn location(&self) -> Address { self.stmt_start }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::mos6502::Mos6502;

    fn build(src: &str) -> Result<Assembly, Diagnostics> {
        assemble_source(&Mos6502::nmos(), Options::default(), "test.asm", src)
    }
    fn code(src: &str) -> Vec<u8> {
        match build(src) {
            Ok(out) => out.object.segment(SegmentKind::Code).bytes().to_vec(),
            Err(d) => panic!("{}", d),
        }
    }
    fn errors(src: &str) -> Diagnostics {
        match build(src) {
            Ok(_) => panic!("expected errors assembling {:?}", src),
            Err(d) => d,
        }
    }

    #[test]
    fn forward_references_shrink_and_converge() {
        let src = "
start:  lda ptr
        sta ptr+1,x
        jmp start
        zpage
ptr:    ds 2";
        let isa = Mos6502::nmos();
        // a single pass cannot confirm convergence, but shows the pessimistic first layout
        let options = Options {
            max_passes: 1,
            ..Options::default()
        };
        let mut first = Assembler::new(&isa, options);
        let root = first.add_source("test.asm", src);
        assert!(first.run(root).is_err());
        let pass1_len = first.segment(SegmentKind::Code).len();

        let out = build(src).unwrap();
        let bytes = out.object.segment(SegmentKind::Code).bytes();
        assert_eq!(bytes, &[0xa5, 0x00, 0x95, 0x01, 0x4c, 0x00, 0x00]);
        assert!(pass1_len >= bytes.len());
        assert!(out.passes >= 2);
        assert_eq!(
            out.object.usage.get(&Address::in_segment(SegmentKind::Code, 3)),
            Some(&Address {
                part: Part::LowByte,
                ..Address::in_segment(SegmentKind::ZeroPage, 1)
            })
        );
        assert_eq!(
            out.object.usage.get(&Address::in_segment(SegmentKind::Code, 5)),
            Some(&Address::in_segment(SegmentKind::Code, 0))
        );
    }

    #[test]
    fn another_pass_changes_nothing() {
        let src = "
        if eq
          ldx #0
          do
            inx
            cpx #10
          while ne
          wend
        else
          jsr far
        endif
        rts
far:    ds 100
        rts";
        let out = build(src).unwrap();
        let isa = Mos6502::nmos();
        let more = Options {
            max_passes: out.passes + 1,
            ..Options::default()
        };
        let again = assemble_source(&isa, more, "test.asm", src).unwrap();
        assert_eq!(again.object, out.object);
    }

    #[test]
    fn short_branch_at_exact_boundary() {
        let body = |n: usize| format!("        if eq\n        ds {}\n        endif\n        rts", n);
        let short = code(&body(127));
        assert_eq!(short.len(), 2 + 127 + 1);
        assert_eq!(&short[..2], &[0xd0, 0x7f]);
        let long = code(&body(128));
        assert_eq!(long.len(), 5 + 128 + 1);
        assert_eq!(&long[..5], &[0xf0, 0x03, 0x4c, 0x85, 0x00]);
    }

    #[test]
    fn user_branches_expand_unless_disabled() {
        let src = "  bne far\n  ds 200\nfar: rts";
        assert_eq!(&code(src)[..5], &[0xf0, 0x03, 0x4c, 0xcd, 0x00]);
        let isa = Mos6502::nmos();
        let options = Options {
            long_branches: false,
            ..Options::default()
        };
        let d = assemble_source(&isa, options, "test.asm", src).unwrap_err();
        assert_eq!(d.count_kind(ErrorKind::OutOfRange), 1);
        assert_eq!(code("back: nop\n  beq back"), vec![0xea, 0xf0, 0xfd]);
    }

    #[test]
    fn errors_from_early_passes_are_kept() {
        // zp1 is not known to be zero page until the second pass, so the
        // first pass places `after` $0100 bytes past `start`
        let src = "
start:  lda zp1
        ds 253
after:  lda #after-start
        zpage
zp1:    ds 1";
        let d = errors(src);
        assert_eq!(d.count_kind(ErrorKind::OutOfRange), 1);
        assert_eq!(d.iter().next().and_then(|e| e.pos).map(|p| p.line), Some(4));
    }

    #[test]
    fn branch_range_errors_wait_for_the_final_pass() {
        // the second pass still sees the target 150 bytes away; it settles at 100
        let src = format!("  bne fwd\n{}fwd: rts\n  zpage\nzp1: ds 1", "  lda zp1\n".repeat(50));
        let isa = Mos6502::nmos();
        let options = Options {
            long_branches: false,
            ..Options::default()
        };
        let out = assemble_source(&isa, options, "test.asm", &src).unwrap();
        assert_eq!(&out.object.segment(SegmentKind::Code).bytes()[..2], &[0xd0, 100]);
    }

    #[test]
    fn if_elseif_else() {
        let src = "
        if eq
          lda #1
        elseif cs
          lda #2
        else
          lda #3
        endif
        rts";
        assert_eq!(
            code(src),
            vec![0xd0, 0x05, 0xa9, 0x01, 0x4c, 0x10, 0x00, 0x90, 0x05, 0xa9, 0x02, 0x4c, 0x10, 0x00, 0xa9, 0x03, 0x60]
        );
    }

    #[test]
    fn do_while_loops() {
        // test at the bottom collapses into one backward branch
        assert_eq!(code("  do\n  dex\n  while ne\n\n  wend\n  rts"), vec![0xca, 0xd0, 0xfd, 0x60]);
        // test at the top: exit branch plus a jump back
        assert_eq!(
            code("  do\n  while eq\n  inx\n  wend\n  rts"),
            vec![0xd0, 0x04, 0xe8, 0x4c, 0x00, 0x00, 0x60]
        );
        let out = build("  do\n  dex\n  while ne\n  wend").unwrap();
        assert!(out.object.symbols.is_empty());
    }

    #[test]
    fn block_errors() {
        let d = errors("  if eq\n  else\n  else\n  endif");
        assert_eq!(d.count_kind(ErrorKind::Block), 1);
        let d = errors("  else\n  wend\n  endif");
        assert_eq!(d.count_kind(ErrorKind::Block), 3);
        let d = errors("  do\n  while eq\n  while ne\n  wend");
        assert_eq!(d.count_kind(ErrorKind::Block), 1);
        // the unclosed DO is reported at its own line, the ENDIF still closes the IF
        let d = errors("  if eq\n  do\n  endif");
        let lines: Vec<u32> = d.iter().filter_map(|e| e.pos.map(|p| p.line)).collect();
        assert_eq!(lines, vec![3]);
        let d = errors("  if ne\n  nop");
        assert_eq!(d.iter().next().and_then(|e| e.pos).map(|p| p.line), Some(1));
        assert_eq!(errors("  if zz\n  endif").count_kind(ErrorKind::Syntax), 1);
    }

    #[test]
    fn symbol_errors() {
        let d = errors("a: nop\na: nop");
        assert_eq!(d.count_kind(ErrorKind::Duplicate), 1);
        let d = errors("  jmp nowhere\n  lda nowhere");
        assert_eq!(d.count_kind(ErrorKind::Undefined), 2);
        let d = errors("  public entry\n  rts");
        assert_eq!(d.count_kind(ErrorKind::Undefined), 1);
        let d = errors("msg: nop\n  lda #msg\n  lda #300");
        assert_eq!(d.count_kind(ErrorKind::AddressUsage), 1);
        assert_eq!(d.count_kind(ErrorKind::OutOfRange), 1);
        let d = errors("  nop\n  data\nx: db 0\n  code\n  beq x");
        assert_eq!(d.count_kind(ErrorKind::AddressUsage), 1);
    }

    #[test]
    fn syntax_errors_skip_the_line() {
        let d = errors("  lda #1 2\n  foo\n  lda ($12),z\n  nop");
        assert_eq!(d.count_kind(ErrorKind::Syntax), 3);
        let lines: Vec<u32> = d.iter().filter_map(|e| e.pos.map(|p| p.line)).collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn data_directives_and_expressions() {
        let src = "
size = tail - table
        data
table:  db \"AB\", 1, -1, <table, >table
        dw table, size, *
tail:
        zpage
        ds 3, $ff";
        let out = build(src).unwrap();
        let data = out.object.segment(SegmentKind::Data).bytes();
        assert_eq!(data, &[b'A', b'B', 1, 0xff, 0, 0, 0, 0, 12, 0, 6, 0]);
        assert_eq!(out.object.segment(SegmentKind::ZeroPage).bytes(), &[0xff; 3]);
        // <table, >table, dw table, dw * each leave a relocation
        assert_eq!(out.object.usage.len(), 4);
        assert_eq!(
            out.object.usage.get(&Address::in_segment(SegmentKind::Data, 10)),
            Some(&Address::in_segment(SegmentKind::Data, 6))
        );
        assert_eq!(errors("x: nop\n  ds x").count_kind(ErrorKind::AddressUsage), 1);
        assert_eq!(errors("  ds nothing").count_kind(ErrorKind::Undefined), 1);
        // the first pass could not reserve the space
        assert_eq!(errors("  ds size\nsize = 4").count_kind(ErrorKind::Undefined), 1);
        // reserved words are never labels
        assert_eq!(errors("end: nop").count_kind(ErrorKind::Syntax), 1);
    }

    #[test]
    fn externals_and_publics() {
        let src = "
        extern print
        public main
main:   jsr print
        lda #<msg
        ldx #>msg
        rts
        data
msg:    db \"hi\", 0";
        let out = build(src).unwrap();
        assert_eq!(
            out.object.segment(SegmentKind::Code).bytes(),
            &[0x20, 0x00, 0x00, 0xa9, 0x00, 0xa2, 0x00, 0x60]
        );
        let exported: Vec<&str> = out.object.symbols.values().filter(|s| s.is_exported()).map(|s| s.name.as_str()).collect();
        assert_eq!(exported, vec!["print", "main"]);
        let print_id = out.object.externals().map(|s| s.id).next().unwrap();
        assert_eq!(
            out.object.usage.get(&Address::in_segment(SegmentKind::Code, 1)),
            Some(&Address::external(print_id))
        );
        let hi = out.object.usage[&Address::in_segment(SegmentKind::Code, 6)];
        assert_eq!((hi.kind, hi.part), (AddressType::Data, Part::HighByte));
        assert_eq!(errors("  extern x\nx: nop").count_kind(ErrorKind::Duplicate), 1);
    }

    #[test]
    fn includes_and_end() {
        let isa = Mos6502::nmos();
        let mut asm = Assembler::new(&isa, Options::default());
        asm.add_source("defs.asm", "answer = 42\n  db answer");
        let root = asm.add_source("main.asm", "  include \"defs.asm\"\n  db answer + 1\n  end\n  db 99");
        let out = asm.run(root).unwrap();
        assert_eq!(out.object.segment(SegmentKind::Code).bytes(), &[42, 43]);
        let rows: Vec<(usize, u32)> = out.listing.lines().iter().map(|l| (l.pos.file, l.pos.line)).collect();
        assert_eq!(rows, vec![(1, 1), (0, 1), (0, 2), (1, 2), (1, 3)]);

        let d = errors("  include \"does-not-exist.inc\"\n  nop");
        assert!(d.has_fatal());
        assert_eq!(d.len(), 1);
    }
}
