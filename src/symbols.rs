//! Identifier interning and the assembler's symbol table.
//!
//! Named symbols get their ids from the identifier table (1, 2, 3, ...) while
//! auto-labels generated for IF/DO blocks count up from [`AUTO_LABEL_BASE`].
//! The two ranges never meet: interning fails before a name could receive an
//! id in the auto-label range.
use crate::address::Address;
use crate::object::Symbol;
use crate::{Error, ErrorKind};
use std::collections::{BTreeMap, HashMap};

pub const AUTO_LABEL_BASE: u16 = 0x8000;

#[derive(Debug, Default)]
pub struct IdentifierTable {
    ids: HashMap<String, u16>,
}
impl IdentifierTable {
    pub fn new() -> Self { IdentifierTable::default() }
    /// The id for `name`, allocating the next one on first sight.
    pub fn intern(&mut self, name: &str) -> Result<u16, Error> {
        if let Some(&id) = self.ids.get(name) {
            return Ok(id);
        }
        let id = self.ids.len() as u32 + 1;
        if id >= AUTO_LABEL_BASE as u32 {
            return Err(Error::new(
                ErrorKind::General,
                None,
                "too many identifiers: the identifier table ran into the auto-label range",
            ));
        }
        self.ids.insert(name.to_string(), id as u16);
        Ok(id as u16)
    }
}

/// What happened when a symbol was (re)defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Definition {
    /// first definition, or same address as in the previous pass
    Unchanged,
    /// the address differs from the one recorded in an earlier pass
    Moved,
    /// already defined in this pass
    Duplicate,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    map: BTreeMap<u16, Symbol>,
}
impl SymbolTable {
    pub fn new() -> Self { SymbolTable::default() }
    pub fn get(&self, id: u16) -> Option<&Symbol> { self.map.get(&id) }

    /// Define (or redefine) symbol `id` during `pass`.
    pub fn define(&mut self, id: u16, name: &str, address: Address, pass: u32) -> Definition {
        match self.map.get_mut(&id) {
            Some(sym) if sym.pass == pass => Definition::Duplicate,
            Some(sym) => {
                let moved = sym.address != address;
                sym.address = address;
                sym.pass = pass;
                if moved {
                    Definition::Moved
                } else {
                    Definition::Unchanged
                }
            }
            None => {
                let mut sym = Symbol::new(id, name, address);
                sym.pass = pass;
                self.map.insert(id, sym);
                if pass > 1 {
                    // references in earlier passes saw it as undefined
                    Definition::Moved
                } else {
                    Definition::Unchanged
                }
            }
        }
    }

    /// Mark a symbol as visible to the linker, creating a placeholder if it has
    /// not been defined yet.
    pub fn declare_public(&mut self, id: u16, name: &str) {
        self.map
            .entry(id)
            .or_insert_with(|| Symbol::new(id, name, Address::undefined()))
            .public = true;
    }

    /// Remove an auto-label whose block was compiled without it.
    pub fn erase(&mut self, id: u16) { self.map.remove(&id); }

    /// The current value of a symbol; `Undefined` for unknown ids.
    pub fn address(&self, id: u16) -> Address { self.map.get(&id).map_or(Address::undefined(), |s| s.address) }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> { self.map.values() }

    /// Copy of the named symbols for the object module (auto-labels stay behind).
    pub fn to_object_symbols(&self) -> BTreeMap<u16, Symbol> {
        self.map
            .iter()
            .filter(|(&id, _)| id < AUTO_LABEL_BASE)
            .map(|(&id, s)| (id, s.clone()))
            .collect()
    }
}
