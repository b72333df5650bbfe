//! Process-wide symbol interning.
//!
//! Hot paths compare and hash 16-bit ids instead of strings; the registry
//! lives for the whole process, so ids are stable once assigned.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

const INVALID_SYMBOL_ID: u16 = 0;

static SYMBOLS: Lazy<RwLock<SymbolRegistry>> = Lazy::new(|| {
    RwLock::new(SymbolRegistry {
        next_id: 1,
        ..SymbolRegistry::default()
    })
});

/// Interned handle for a market symbol such as `BTCUSDT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u16);

impl SymbolId {
    /// Reserved id for "no symbol"; never handed out by the registry.
    pub const INVALID: Self = Self(INVALID_SYMBOL_ID);

    #[must_use]
    pub const fn from_raw(value: u16) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 != INVALID_SYMBOL_ID
    }

    /// Intern `name`, returning its stable id. Registration is idempotent.
    pub fn register(name: impl AsRef<str>) -> Self {
        let name = canonicalize(name.as_ref());
        if name.is_empty() {
            return Self::INVALID;
        }
        let mut registry = SYMBOLS.write();
        if let Some(id) = registry.name_to_id.get(&name) {
            return *id;
        }
        let id = SymbolId(registry.next_id);
        registry.next_id = registry.next_id.saturating_add(1);
        let stored = leak_string(name.clone());
        registry.id_to_name.insert(id, stored);
        registry.name_to_id.insert(name, id);
        id
    }

    /// Look up an already-registered symbol without interning it.
    #[must_use]
    pub fn lookup(name: impl AsRef<str>) -> Option<Self> {
        let name = canonicalize(name.as_ref());
        SYMBOLS.read().name_to_id.get(&name).copied()
    }

    /// The interned name, or `"UNKNOWN"` for the invalid id.
    #[must_use]
    pub fn name(self) -> &'static str {
        if self == Self::INVALID {
            return "UNKNOWN";
        }
        let registry = SYMBOLS.read();
        registry
            .id_to_name
            .get(&self)
            .copied()
            .unwrap_or_else(|| leak_string(format!("symbol#{}", self.0)))
    }
}

impl Default for SymbolId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for SymbolId {
    fn from(value: &str) -> Self {
        Self::register(value)
    }
}

impl From<String> for SymbolId {
    fn from(value: String) -> Self {
        Self::register(value)
    }
}

impl AsRef<str> for SymbolId {
    fn as_ref(&self) -> &str {
        self.name()
    }
}

impl Serialize for SymbolId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for SymbolId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::register(raw))
    }
}

/// True when `name` has already been interned.
#[must_use]
pub fn is_registered(name: impl AsRef<str>) -> bool {
    SymbolId::lookup(name).is_some()
}

/// Names of every interned symbol, in registration order of id.
#[must_use]
pub fn all_symbols() -> Vec<&'static str> {
    let registry = SYMBOLS.read();
    let mut entries: Vec<_> = registry.id_to_name.iter().collect();
    entries.sort_by_key(|(id, _)| **id);
    entries.into_iter().map(|(_, name)| *name).collect()
}

/// Number of interned symbols.
#[must_use]
pub fn symbol_count() -> usize {
    SYMBOLS.read().name_to_id.len()
}

/// Seed the registry with the majors so startup paths never intern lazily.
pub fn register_common_symbols() {
    for name in [
        "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "ADAUSDT", "AVAXUSDT", "DOGEUSDT",
        "DOTUSDT", "LINKUSDT", "LTCUSDT", "ETHBTC", "SOLBTC",
    ] {
        SymbolId::register(name);
    }
}

#[derive(Default)]
struct SymbolRegistry {
    name_to_id: HashMap<String, SymbolId>,
    id_to_name: HashMap<SymbolId, &'static str>,
    next_id: u16,
}

fn canonicalize(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

fn leak_string(value: String) -> &'static str {
    Box::leak(value.into_boxed_str())
}
