//! Capability scopes.
//!
//! A scope namespaces commands by device capability. The scope travels as a
//! single byte in every packet header, and a device declares the scopes it
//! serves as a [`ScopeSet`] bitmask when it greets the server.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Capability area a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Scope {
    /// Connection management (greeting, welcome). Always supported.
    System = 0,
    /// Generic device lifecycle (status, reset).
    Device = 1,
    /// Card readers.
    Reader = 2,
    /// Cash and note validators.
    Validator = 3,
    /// Receipt printers.
    Printer = 4,
    /// PIN entry pads.
    PinPad = 5,
}

impl Scope {
    /// Every scope, in wire order.
    pub const ALL: [Scope; 6] = [
        Scope::System,
        Scope::Device,
        Scope::Reader,
        Scope::Validator,
        Scope::Printer,
        Scope::PinPad,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable scope name.
    pub fn name(self) -> &'static str {
        match self {
            Scope::System => "System",
            Scope::Device => "Device",
            Scope::Reader => "Reader",
            Scope::Validator => "Validator",
            Scope::Printer => "Printer",
            Scope::PinPad => "PinPad",
        }
    }

    fn bit(self) -> u32 {
        1 << self.as_u8()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|scope| scope.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown scope '{s}'"))
    }
}

/// Set of scopes a device supports, carried as a bitmask (bit `n` = scope
/// value `n`). [`Scope::System`] is always a member.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct ScopeSet(u32);

impl ScopeSet {
    const KNOWN_BITS: u32 = (1 << Scope::ALL.len()) - 1;

    /// A set holding only [`Scope::System`].
    pub fn system_only() -> Self {
        Self(Scope::System.bit())
    }

    /// Build from raw bits, discarding bits of unknown scopes.
    pub fn from_bits(bits: u32) -> Self {
        Self((bits & Self::KNOWN_BITS) | Scope::System.bit())
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn with(mut self, scope: Scope) -> Self {
        self.insert(scope);
        self
    }

    pub fn insert(&mut self, scope: Scope) {
        self.0 |= scope.bit();
    }

    pub fn contains(self, scope: Scope) -> bool {
        self.0 & scope.bit() != 0
    }

    /// Scopes present in both sets.
    pub fn intersection(self, other: ScopeSet) -> Self {
        Self::from_bits(self.0 & other.0)
    }

    /// Scopes present in either set.
    pub fn union(self, other: ScopeSet) -> Self {
        Self::from_bits(self.0 | other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = Scope> {
        Scope::ALL.into_iter().filter(move |scope| self.contains(*scope))
    }
}

impl Default for ScopeSet {
    fn default() -> Self {
        Self::system_only()
    }
}

impl From<u32> for ScopeSet {
    fn from(bits: u32) -> Self {
        Self::from_bits(bits)
    }
}

impl From<ScopeSet> for u32 {
    fn from(set: ScopeSet) -> Self {
        set.bits()
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        iter.into_iter().fold(Self::system_only(), ScopeSet::with)
    }
}

impl fmt::Debug for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Scope::name).collect();
        f.write_str(&names.join(","))
    }
}
