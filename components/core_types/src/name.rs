//! Scope, script, and module identity types.

use crate::word::{StringIdx, Word};

/// Addresses one map scope: the {global, hub, map} triple.
///
/// Script lifecycle requests carry one of these; a request whose triple is
/// not the caller's current scope is deferred rather than executed inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    /// Global scope number.
    pub global: Word,
    /// Hub scope number within the global scope.
    pub hub: Word,
    /// Map scope number within the hub scope.
    pub map: Word,
}

impl ScopeId {
    /// Creates a scope id from its three components.
    pub fn new(global: Word, hub: Word, map: Word) -> Self {
        Self { global, hub, map }
    }
}

/// A script entry point name: numeric or an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptName {
    /// Numeric script name.
    Num(Word),
    /// String script name, by interned-string index.
    Str(StringIdx),
}

/// Host-defined module identity used as the module-cache key.
///
/// Requesting the same identity twice returns the cached, already
/// translated module. Hosts that need distinct instances of one file use
/// distinct numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ModuleName {
    /// Module name, typically a lump or file name.
    pub name: String,
    /// Host-defined discriminator.
    pub number: Word,
}

impl ModuleName {
    /// Creates a module name from its string part alone.
    pub fn from_str(name: impl Into<String>) -> Self {
        Self { name: name.into(), number: 0 }
    }
}
