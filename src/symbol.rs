//! Symbol handles shared between working memory and long-term memory.
//!
//! A [`Symbol`] is either a [`Constant`] (string, integer, float) or an
//! [`Identifier`] (a named graph node such as `B3`). Symbols are handed out as
//! reference-counted [`SymbolRef`]s by the [`SymbolTable`], which interns them
//! so that every live value has exactly one handle. Dropping the last handle
//! frees the symbol; nobody balances reference counts by hand.
//!
//! Each symbol carries a small cache slot the long-term memory writes into:
//! the constant's hash id, and for identifiers the persistent id it is bound
//! to. Both are tagged with the validation epoch they were computed in and
//! read back through that epoch, so a reset of long-term memory invalidates
//! every cached value without touching the symbols themselves.

use std::cell::Cell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

/// Validation epoch. Incremented whenever long-term memory is reset.
pub type Epoch = u64;

/// Compact id of a hashed constant, stable within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct HashId(u64);

impl HashId {
    pub fn new(raw: u64) -> Self {
        HashId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HashId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hash:{}", self.0)
    }
}

/// Persistent id of a chunk in long-term memory.
///
/// Uses `NonZeroU64` so that `Option<LtiId>` is the same size as `LtiId`.
/// Persistent ids are never reused or renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LtiId(NonZeroU64);

impl LtiId {
    /// Create an `LtiId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(LtiId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for LtiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lti:{}", self.0)
    }
}

/// A constant value.
///
/// Floats compare and hash by bit pattern so constants can key hash maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    Str(String),
    Int(i64),
    Float(f64),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Str(s) => s.hash(state),
            Constant::Int(i) => i.hash(state),
            Constant::Float(x) => x.to_bits().hash(state),
        }
    }
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Str(s) => write!(f, "{s}"),
            Constant::Int(i) => write!(f, "{i}"),
            Constant::Float(x) => write!(f, "{x:?}"),
        }
    }
}

/// The in-session name of an identifier: a letter and a number, e.g. `B3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdName {
    pub letter: char,
    pub number: u64,
}

impl IdName {
    pub fn new(letter: char, number: u64) -> Self {
        Self {
            letter: normalize_letter(letter),
            number,
        }
    }

    /// Parse `B3`-style names. The letter is upper-cased.
    pub fn parse(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let letter = chars.next().filter(|c| c.is_ascii_alphabetic())?;
        let number = chars.as_str().parse().ok()?;
        Some(Self::new(letter, number))
    }
}

impl std::fmt::Display for IdName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.letter, self.number)
    }
}

fn normalize_letter(letter: char) -> char {
    if letter.is_ascii_alphabetic() {
        letter.to_ascii_uppercase()
    } else {
        'I'
    }
}

/// Identifier-specific state.
#[derive(Debug)]
pub struct Identifier {
    name: IdName,
    level: Cell<u32>,
    lti: Cell<Option<(LtiId, Epoch)>>,
    tc: Cell<u64>,
    retrieved: Cell<bool>,
}

impl Identifier {
    pub fn name(&self) -> IdName {
        self.name
    }

    /// Goal-stack level the identifier lives at.
    pub fn level(&self) -> u32 {
        self.level.get()
    }

    pub fn set_level(&self, level: u32) {
        self.level.set(level);
    }

    /// Persistent id this identifier stands for, if bound during `epoch`.
    pub fn lti(&self, epoch: Epoch) -> Option<LtiId> {
        match self.lti.get() {
            Some((id, at)) if at == epoch => Some(id),
            _ => None,
        }
    }

    pub fn set_lti(&self, id: LtiId, epoch: Epoch) {
        self.lti.set(Some((id, epoch)));
    }

    /// Tag the identifier with a transitive-closure marker.
    ///
    /// Returns `false` if it already carried `tc`.
    pub fn mark_tc(&self, tc: u64) -> bool {
        if self.tc.get() == tc {
            return false;
        }
        self.tc.set(tc);
        true
    }

    /// Whether the identifier's chunk has been expanded from long-term memory.
    pub fn is_retrieved(&self) -> bool {
        self.retrieved.get()
    }

    pub fn mark_retrieved(&self) {
        self.retrieved.set(true);
    }
}

/// Whether a symbol is a constant or an identifier.
#[derive(Debug)]
pub enum SymbolKind {
    Constant(Constant),
    Identifier(Identifier),
}

/// An interned symbol.
#[derive(Debug)]
pub struct Symbol {
    kind: SymbolKind,
    hash: Cell<Option<(HashId, Epoch)>>,
}

/// Shared handle to an interned symbol.
pub type SymbolRef = Rc<Symbol>;

impl Symbol {
    pub fn kind(&self) -> &SymbolKind {
        &self.kind
    }

    pub fn constant(&self) -> Option<&Constant> {
        match &self.kind {
            SymbolKind::Constant(c) => Some(c),
            SymbolKind::Identifier(_) => None,
        }
    }

    pub fn identifier(&self) -> Option<&Identifier> {
        match &self.kind {
            SymbolKind::Identifier(id) => Some(id),
            SymbolKind::Constant(_) => None,
        }
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, SymbolKind::Identifier(_))
    }

    /// Cached hash id, if it was computed during `epoch`.
    pub fn cached_hash(&self, epoch: Epoch) -> Option<HashId> {
        match self.hash.get() {
            Some((id, at)) if at == epoch => Some(id),
            _ => None,
        }
    }

    pub fn cache_hash(&self, id: HashId, epoch: Epoch) {
        self.hash.set(Some((id, epoch)));
    }

    /// Persistent id of an identifier symbol in `epoch`; `None` for constants.
    pub fn lti(&self, epoch: Epoch) -> Option<LtiId> {
        self.identifier().and_then(|id| id.lti(epoch))
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SymbolKind::Constant(c) => write!(f, "{c}"),
            SymbolKind::Identifier(id) => write!(f, "{}", id.name),
        }
    }
}

/// Interning table and identifier-name generator.
///
/// Holds weak references only: a symbol lives exactly as long as somebody
/// (working memory, a cue, a test) holds a [`SymbolRef`] to it.
#[derive(Debug, Default)]
pub struct SymbolTable {
    constants: HashMap<Constant, Weak<Symbol>>,
    identifiers: HashMap<IdName, Weak<Symbol>>,
    /// Highest number handed out per letter.
    counters: HashMap<char, u64>,
    next_tc: u64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a constant.
    pub fn constant(&mut self, value: Constant) -> SymbolRef {
        if let Some(sym) = self.constants.get(&value).and_then(Weak::upgrade) {
            return sym;
        }
        let sym = Rc::new(Symbol {
            kind: SymbolKind::Constant(value.clone()),
            hash: Cell::new(None),
        });
        self.constants.insert(value, Rc::downgrade(&sym));
        sym
    }

    pub fn str(&mut self, value: &str) -> SymbolRef {
        self.constant(Constant::Str(value.to_string()))
    }

    pub fn int(&mut self, value: i64) -> SymbolRef {
        self.constant(Constant::Int(value))
    }

    pub fn float(&mut self, value: f64) -> SymbolRef {
        self.constant(Constant::Float(value))
    }

    /// Mint a fresh identifier with the next free number for `letter`.
    pub fn new_identifier(&mut self, letter: char, level: u32) -> SymbolRef {
        let letter = normalize_letter(letter);
        loop {
            let counter = self.counters.entry(letter).or_insert(0);
            *counter += 1;
            let name = IdName::new(letter, *counter);
            if self.find_identifier(name).is_none() {
                return self.insert_identifier(name, level);
            }
        }
    }

    /// Return the live identifier called `name`, creating it if needed.
    ///
    /// The boolean is `true` when the identifier was created by this call.
    pub fn identifier_named(&mut self, name: IdName, level: u32) -> (SymbolRef, bool) {
        if let Some(sym) = self.find_identifier(name) {
            return (sym, false);
        }
        self.raise_counter(name.letter, name.number);
        (self.insert_identifier(name, level), true)
    }

    pub fn find_identifier(&self, name: IdName) -> Option<SymbolRef> {
        self.identifiers.get(&name).and_then(Weak::upgrade)
    }

    /// Make sure future minted names for `letter` are numbered above `number`.
    pub fn raise_counter(&mut self, letter: char, number: u64) {
        let counter = self.counters.entry(normalize_letter(letter)).or_insert(0);
        if *counter < number {
            *counter = number;
        }
    }

    /// Highest number handed out so far for `letter`.
    pub fn counter(&self, letter: char) -> u64 {
        self.counters
            .get(&normalize_letter(letter))
            .copied()
            .unwrap_or(0)
    }

    /// Allocate a new transitive-closure marker.
    pub fn new_tc(&mut self) -> u64 {
        self.next_tc += 1;
        self.next_tc
    }

    /// Drop table entries whose symbols are gone.
    pub fn prune(&mut self) {
        self.constants.retain(|_, weak| weak.strong_count() > 0);
        self.identifiers.retain(|_, weak| weak.strong_count() > 0);
    }

    /// Number of live interned symbols.
    pub fn len(&self) -> usize {
        self.constants.values().filter(|w| w.strong_count() > 0).count()
            + self
                .identifiers
                .values()
                .filter(|w| w.strong_count() > 0)
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_identifier(&mut self, name: IdName, level: u32) -> SymbolRef {
        let sym = Rc::new(Symbol {
            kind: SymbolKind::Identifier(Identifier {
                name,
                level: Cell::new(level),
                lti: Cell::new(None),
                tc: Cell::new(0),
                retrieved: Cell::new(false),
            }),
            hash: Cell::new(None),
        });
        self.identifiers.insert(name, Rc::downgrade(&sym));
        sym
    }
}
