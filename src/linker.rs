//! The linker: places object modules one after another in each address
//! space, resolves the names they share and patches every recorded address
//! usage with its final value.
//!
//! Libraries are searched lazily. A library module is loaded only when it
//! exports a name that is still unresolved, and loading it may create new
//! unresolved names, so the search repeats until nothing new is pulled in.
use crate::address::{Address, AddressType, Part, SegmentKind};
use crate::archive::{Archive, Library};
use crate::error::Diagnostics;
use crate::object::Object;
use crate::segment::{new_segments, Segment};
use crate::{Error, ErrorKind};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Final load address of each space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bases {
    pub code: u16,
    pub data: u16,
    pub zero_page: u16,
}
impl Bases {
    pub fn new(code: u16, data: u16, zero_page: u16) -> Self { Bases { code, data, zero_page } }
    pub fn of(&self, kind: SegmentKind) -> u16 {
        match kind {
            SegmentKind::Code => self.code,
            SegmentKind::Data => self.data,
            SegmentKind::ZeroPage => self.zero_page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Global {
    /// referenced by `module` but not defined anywhere yet
    Wanted { module: String },
    Defined { value: u16, space: Option<SegmentKind>, module: String },
}

#[derive(Debug)]
struct Fixup {
    space: SegmentKind,
    offset: usize,
    name: String,
    extra: u16,
    part: Part,
    relative: bool,
    module: String,
}

/// One line of the symbol map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub name: String,
    pub address: u16,
    /// `None` for constants
    pub space: Option<SegmentKind>,
    pub module: String,
}

#[derive(Debug)]
pub struct LinkOutput {
    pub segments: [Segment; 3],
    pub bases: Bases,
    /// sorted by address, then name
    pub map: Vec<MapEntry>,
    pub modules: Vec<String>,
}
impl LinkOutput {
    pub fn segment(&self, kind: SegmentKind) -> &Segment { &self.segments[kind.index()] }

    /// The code and data spaces as one image: its load address and bytes, with
    /// any gap between the two filled with zeros. Zero page is storage only and
    /// is not part of the image.
    pub fn image(&self) -> (u16, Vec<u8>) {
        let spans: Vec<(usize, &[u8])> = [SegmentKind::Code, SegmentKind::Data]
            .iter()
            .map(|&k| (self.bases.of(k) as usize, self.segment(k).bytes()))
            .filter(|(_, b)| !b.is_empty())
            .collect();
        let Some(start) = spans.iter().map(|(s, _)| *s).min() else {
            return (self.bases.code, Vec::new());
        };
        let end = spans.iter().map(|(s, b)| s + b.len()).max().unwrap_or(start);
        let mut image = vec![0u8; end - start];
        for (s, b) in spans {
            image[s - start..s - start + b.len()].copy_from_slice(b);
        }
        (start as u16, image)
    }

    /// The text of the `.map` file.
    pub fn map_text(&self) -> String {
        let mut out = String::new();
        for kind in SegmentKind::ALL {
            let len = self.segment(kind).len();
            let base = self.bases.of(kind) as usize;
            let last = if len == 0 { base } else { base + len - 1 };
            _ = writeln!(out, "{:6} ${:04X}-${:04X} {:5} bytes", kind.to_string(), base, last, len);
        }
        _ = writeln!(out);
        for e in &self.map {
            let space = e.space.map_or("CONST".to_string(), |k| k.to_string());
            _ = writeln!(out, "${:04X} {:6} {:24} {}", e.address, space, e.name, e.module);
        }
        out
    }
}

pub struct Linker {
    bases: Bases,
    segments: [Segment; 3],
    globals: BTreeMap<String, Global>,
    fixups: Vec<Fixup>,
    archives: Vec<Archive>,
    modules: Vec<String>,
    diagnostics: Diagnostics,
}

impl Linker {
    pub fn new(bases: Bases) -> Self {
        Linker {
            bases,
            segments: new_segments(),
            globals: BTreeMap::new(),
            fixups: Vec::new(),
            archives: Vec::new(),
            modules: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Load an object module unconditionally.
    pub fn add_object(&mut self, name: &str, obj: &Object) {
        verbose_println!("loading {}", name);
        self.modules.push(name.to_string());
        let offsets = SegmentKind::ALL.map(|k| self.segments[k.index()].len());
        for kind in SegmentKind::ALL {
            self.segments[kind.index()].extend(obj.segment(kind).bytes());
        }
        let bases = self.bases;
        let translate = |a: Address| -> u16 {
            match a.segment() {
                Some(k) => bases.of(k).wrapping_add(offsets[k.index()] as u16).wrapping_add(a.value),
                None => a.value,
            }
        };
        for sym in obj.public_symbols() {
            self.define(&sym.name, translate(sym.address), sym.address.segment(), name);
        }
        for sym in obj.externals() {
            self.globals.entry(sym.name.clone()).or_insert_with(|| Global::Wanted {
                module: name.to_string(),
            });
        }

        for (site, value) in &obj.usage {
            let Some(space) = site.segment() else {
                self.diagnostics.record(format_err!("{}: address usage site {} is not in a segment", name, site));
                continue;
            };
            let offset = offsets[space.index()] + site.value as usize;
            match value.kind {
                AddressType::External(id) => match obj.symbol_name(id) {
                    Some(sym) => self.fixups.push(Fixup {
                        space,
                        offset,
                        name: sym.to_string(),
                        extra: value.value,
                        part: value.part,
                        relative: value.relative,
                        module: name.to_string(),
                    }),
                    None => {
                        self.diagnostics.record(format_err!("{}: address usage refers to unknown external #{}", name, id));
                    }
                },
                AddressType::Undefined => {
                    self.diagnostics.record(Error::new(
                        ErrorKind::AddressUsage,
                        None,
                        &format!("{}: address usage at {} has no value", name, site),
                    ));
                }
                _ => {
                    let v = translate(*value);
                    self.patch(space, offset, v, value.part, value.relative, name);
                }
            }
        }
    }

    /// Make a library available for resolving names still missing at [`Linker::link`].
    pub fn add_library(&mut self, name: &str, library: Library) {
        verbose_println!("library {} with {} modules", name, library.objects.len());
        self.archives.push(Archive::new(name, library));
    }

    fn define(&mut self, name: &str, value: u16, space: Option<SegmentKind>, module: &str) {
        if let Some(Global::Defined { module: first, .. }) = self.globals.get(name) {
            self.diagnostics.record(Error::new(
                ErrorKind::DuplicateSymbol,
                None,
                &format!("{} is defined in both {} and {}", name, first, module),
            ));
            return;
        }
        self.globals.insert(
            name.to_string(),
            Global::Defined {
                value,
                space,
                module: module.to_string(),
            },
        );
    }

    fn wanted(&self) -> Vec<String> {
        self.globals
            .iter()
            .filter(|(_, g)| matches!(g, Global::Wanted { .. }))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Pull library modules until no library can satisfy a wanted name.
    fn pull_from_libraries(&mut self) {
        let mut archives = std::mem::take(&mut self.archives);
        loop {
            let mut loaded = false;
            for name in self.wanted() {
                if !matches!(self.globals.get(&name), Some(Global::Wanted { .. })) {
                    continue;
                }
                for ar in archives.iter_mut() {
                    if let Some(i) = ar.provider(&name) {
                        let module = ar.module_name(i);
                        if let Some(obj) = ar.take(i) {
                            verbose_println!("{} resolves {}", module, name);
                            self.add_object(&module, obj);
                            loaded = true;
                        }
                        break;
                    }
                }
            }
            if !loaded {
                break;
            }
        }
        self.archives = archives;
    }

    fn patch(&mut self, space: SegmentKind, offset: usize, value: u16, part: Part, relative: bool, module: &str) {
        let seg = &mut self.segments[space.index()];
        let ok = if relative {
            let site = self.bases.of(space).wrapping_add(offset as u16);
            let delta = value.wrapping_sub(site.wrapping_add(1)) as i16;
            if !(-128..=127).contains(&delta) {
                self.diagnostics.record(Error::new(
                    ErrorKind::OutOfRange,
                    None,
                    &format!("{}: relative offset to ${:04X} at ${:04X} is out of range", module, value, site),
                ));
                return;
            }
            seg.patch(offset, delta as u8)
        } else {
            match part {
                Part::Word => {
                    let [lo, hi] = value.to_le_bytes();
                    seg.patch(offset, lo) && seg.patch(offset + 1, hi)
                }
                _ => seg.patch(offset, part.apply(value) as u8),
            }
        };
        if !ok {
            self.diagnostics.record(format_err!("{}: patch site {}:{:04X} is outside the segment", module, space, offset));
        }
    }

    fn check_layout(&mut self) {
        let zp_end = self.bases.zero_page as usize + self.segments[SegmentKind::ZeroPage.index()].len();
        if zp_end > 0x100 {
            self.diagnostics
                .record(general_err!("zero page segment ends at ${:04X}, past the end of zero page", zp_end - 1));
        }
        let mut ranges = Vec::new();
        for kind in SegmentKind::ALL {
            let len = self.segments[kind.index()].len();
            let start = self.bases.of(kind) as usize;
            if len == 0 {
                continue;
            }
            if start + len > 0x10000 {
                self.diagnostics.record(general_err!("{} segment does not fit below $10000", kind));
            }
            ranges.push((kind, start, start + len));
        }
        for (i, &(a, a0, a1)) in ranges.iter().enumerate() {
            for &(b, b0, b1) in &ranges[i + 1..] {
                if a0 < b1 && b0 < a1 {
                    self.diagnostics.record(general_err!("{} and {} segments overlap", a, b));
                }
            }
        }
    }

    /// Resolve, patch and lay out everything loaded so far.
    pub fn link(mut self) -> Result<LinkOutput, Diagnostics> {
        self.pull_from_libraries();
        for name in self.wanted() {
            if let Some(Global::Wanted { module }) = self.globals.get(&name) {
                let msg = format!("{} (referenced by {})", name, module);
                self.diagnostics.record(Error::new(ErrorKind::UndefinedExternal, None, &msg));
            }
        }
        for f in std::mem::take(&mut self.fixups) {
            let value = match self.globals.get(&f.name) {
                Some(Global::Defined { value, .. }) => value.wrapping_add(f.extra),
                _ => continue,
            };
            self.patch(f.space, f.offset, value, f.part, f.relative, &f.module);
        }
        self.check_layout();
        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }
        let mut map: Vec<MapEntry> = self
            .globals
            .into_iter()
            .filter_map(|(name, g)| match g {
                Global::Defined { value, space, module } => Some(MapEntry {
                    name,
                    address: value,
                    space,
                    module,
                }),
                Global::Wanted { .. } => None,
            })
            .collect();
        map.sort_by(|a, b| (a.address, &a.name).cmp(&(b.address, &b.name)));
        Ok(LinkOutput {
            segments: self.segments,
            bases: self.bases,
            map,
            modules: self.modules,
        })
    }
}
