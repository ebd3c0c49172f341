//! Working memory: the agent-side graph long-term memory reads and writes.
//!
//! The rule engine that normally owns working memory lives outside this
//! crate. This module is the narrow surface the kernel needs from it: WMEs
//! (identifier, attribute, value) stamped with a monotonic timetag, grouped
//! per identifier, plus the [`SymbolTable`] they are built from.

use std::collections::HashMap;
use std::rc::Rc;

use crate::symbol::{Constant, IdName, SymbolRef, SymbolTable};

/// How a WME entered working memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WmeKind {
    /// A regular, non-acceptable element.
    Normal,
    /// Backed only by an acceptable preference; never stored.
    Acceptable,
    /// Added by the input link. Stored like a normal element.
    Input,
    /// Architecture-created impasse augmentation; never stored.
    Impasse,
    /// Architecture bookkeeping such as memory headers and result status.
    Architecture,
}

impl WmeKind {
    /// Whether long-term memory persists elements of this kind.
    pub fn is_storable(self) -> bool {
        matches!(self, WmeKind::Normal | WmeKind::Input)
    }
}

/// A working-memory element.
#[derive(Debug)]
pub struct Wme {
    pub id: SymbolRef,
    pub attr: SymbolRef,
    pub value: SymbolRef,
    pub timetag: u64,
    pub kind: WmeKind,
}

pub type WmeRef = Rc<Wme>;

impl std::fmt::Display for Wme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}: {} ^{} {})", self.timetag, self.id, self.attr, self.value)
    }
}

/// Working-memory graph keyed by identifier.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    symbols: SymbolTable,
    slots: HashMap<IdName, Vec<WmeRef>>,
    last_timetag: u64,
    count: usize,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Shorthand for minting an identifier through the symbol table.
    pub fn new_identifier(&mut self, letter: char, level: u32) -> SymbolRef {
        self.symbols.new_identifier(letter, level)
    }

    /// Add a normal WME.
    ///
    /// # Panics
    ///
    /// If `id` is not an identifier.
    pub fn add(&mut self, id: &SymbolRef, attr: &SymbolRef, value: &SymbolRef) -> WmeRef {
        self.add_with_kind(id, attr, value, WmeKind::Normal)
    }

    /// Add a WME of the given kind. An identical live element is returned
    /// instead of adding a duplicate.
    pub fn add_with_kind(
        &mut self,
        id: &SymbolRef,
        attr: &SymbolRef,
        value: &SymbolRef,
        kind: WmeKind,
    ) -> WmeRef {
        let name = id
            .identifier()
            .map(|i| i.name())
            .unwrap_or_else(|| panic!("WME id must be an identifier, got {id}"));
        let slot = self.slots.entry(name).or_default();
        if let Some(existing) = slot.iter().find(|w| {
            Rc::ptr_eq(&w.attr, attr) && Rc::ptr_eq(&w.value, value) && w.kind == kind
        }) {
            return Rc::clone(existing);
        }
        self.last_timetag += 1;
        let wme = Rc::new(Wme {
            id: Rc::clone(id),
            attr: Rc::clone(attr),
            value: Rc::clone(value),
            timetag: self.last_timetag,
            kind,
        });
        slot.push(Rc::clone(&wme));
        self.count += 1;
        wme
    }

    /// Convenience: add `id ^attr value` where attr is a string constant.
    pub fn add_str_attr(&mut self, id: &SymbolRef, attr: &str, value: &SymbolRef) -> WmeRef {
        let attr = self.symbols.str(attr);
        self.add(id, &attr, value)
    }

    /// Remove a WME. Returns whether it was present.
    pub fn remove(&mut self, wme: &WmeRef) -> bool {
        let Some(name) = wme.id.identifier().map(|i| i.name()) else {
            return false;
        };
        let Some(slot) = self.slots.get_mut(&name) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|w| !Rc::ptr_eq(w, wme));
        let removed = slot.len() != before;
        if slot.is_empty() {
            self.slots.remove(&name);
        }
        if removed {
            self.count -= 1;
        }
        removed
    }

    /// Remove every WME whose identifier is `id`.
    pub fn remove_all_of(&mut self, id: &SymbolRef) -> usize {
        let Some(name) = id.identifier().map(|i| i.name()) else {
            return 0;
        };
        let removed = self.slots.remove(&name).map(|s| s.len()).unwrap_or(0);
        self.count -= removed;
        removed
    }

    /// All WMEs whose identifier is `id`, in insertion order.
    pub fn wmes_of(&self, id: &SymbolRef) -> &[WmeRef] {
        id.identifier()
            .and_then(|i| self.slots.get(&i.name()))
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    /// Values of `id ^attr` for a string attribute.
    pub fn values_of(&self, id: &SymbolRef, attr: &str) -> Vec<SymbolRef> {
        self.wmes_of(id)
            .iter()
            .filter(|w| matches!(w.attr.constant(), Some(Constant::Str(a)) if a == attr))
            .map(|w| Rc::clone(&w.value))
            .collect()
    }

    pub fn has_children(&self, id: &SymbolRef) -> bool {
        !self.wmes_of(id).is_empty()
    }

    /// Timetag of the most recently added WME.
    pub fn last_timetag(&self) -> u64 {
        self.last_timetag
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Drop every WME. Symbols survive as long as outside handles do.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.count = 0;
        self.symbols.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove() {
        let mut wm = WorkingMemory::new();
        let b = wm.new_identifier('B', 1);
        let red = wm.symbols_mut().str("red");
        let w = wm.add_str_attr(&b, "color", &red);
        assert_eq!(wm.len(), 1);
        assert_eq!(wm.wmes_of(&b).len(), 1);
        assert_eq!(w.timetag, 1);

        assert!(wm.remove(&w));
        assert!(!wm.remove(&w));
        assert!(wm.is_empty());
        assert!(!wm.has_children(&b));
    }

    #[test]
    fn duplicates_are_merged() {
        let mut wm = WorkingMemory::new();
        let b = wm.new_identifier('B', 1);
        let red = wm.symbols_mut().str("red");
        let first = wm.add_str_attr(&b, "color", &red);
        let second = wm.add_str_attr(&b, "color", &red);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(wm.len(), 1);
        assert_eq!(wm.last_timetag(), 1);
    }

    #[test]
    fn values_of_filters_by_attribute() {
        let mut wm = WorkingMemory::new();
        let b = wm.new_identifier('B', 1);
        let red = wm.symbols_mut().str("red");
        let two = wm.symbols_mut().int(2);
        wm.add_str_attr(&b, "color", &red);
        wm.add_str_attr(&b, "size", &two);

        let colors = wm.values_of(&b, "color");
        assert_eq!(colors.len(), 1);
        assert!(Rc::ptr_eq(&colors[0], &red));
        assert!(wm.values_of(&b, "shape").is_empty());
    }

    #[test]
    fn remove_all_of_clears_slot() {
        let mut wm = WorkingMemory::new();
        let b = wm.new_identifier('B', 1);
        let c = wm.new_identifier('C', 1);
        wm.add_str_attr(&b, "next", &c);
        let red = wm.symbols_mut().str("red");
        wm.add_str_attr(&b, "color", &red);
        wm.add_str_attr(&c, "color", &red);
        assert_eq!(wm.remove_all_of(&b), 2);
        assert_eq!(wm.len(), 1);
    }

    #[test]
    fn storable_kinds() {
        assert!(WmeKind::Normal.is_storable());
        assert!(WmeKind::Input.is_storable());
        assert!(!WmeKind::Acceptable.is_storable());
        assert!(!WmeKind::Impasse.is_storable());
        assert!(!WmeKind::Architecture.is_storable());
    }

    #[test]
    #[should_panic(expected = "must be an identifier")]
    fn constant_id_panics() {
        let mut wm = WorkingMemory::new();
        let red = wm.symbols_mut().str("red");
        let attr = wm.symbols_mut().str("a");
        wm.add(&red, &attr, &red);
    }
}
