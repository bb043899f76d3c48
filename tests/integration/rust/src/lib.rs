//! Integration test suite for the Karst scripting VM.
//!
//! The tests here drive raw module bytes through the full stack: the
//! translator in `bytecode_system`, the scope tree and dispatch loop in
//! `interpreter`, and the embedding surface in `vm_cli`.

/// Re-export components for test convenience.
pub mod components {
    pub use bytecode_system;
    pub use core_types;
    pub use interpreter;
    pub use memory_manager;
    pub use vm_cli;
}

use core_types::{KillType, LoadError, ModuleName, Word};
use interpreter::HostContext;

use std::collections::HashMap;

/// An in-memory host: modules come from a map, prints and faults are
/// recorded for assertions.
#[derive(Default)]
pub struct MemHost {
    pub modules: HashMap<String, Vec<u8>>,
    pub prints: Vec<Vec<u8>>,
    pub faults: Vec<KillType>,
}

impl MemHost {
    pub fn with_module(name: &str, data: Vec<u8>) -> Self {
        let mut host = Self::default();
        host.modules.insert(name.to_string(), data);
        host
    }
}

impl HostContext for MemHost {
    fn fetch_module(&mut self, name: &ModuleName) -> Result<Vec<u8>, LoadError> {
        self.modules
            .get(&name.name)
            .cloned()
            .ok_or_else(|| LoadError::ModuleNotFound(name.name.clone()))
    }

    fn report_fault(&mut self, kind: KillType, _data: Word, _code_idx: Word) {
        self.faults.push(kind);
    }

    fn print_end(&mut self, text: &[u8]) {
        self.prints.push(text.to_vec());
    }
}

fn put4(out: &mut Vec<u8>, word: Word) {
    out.extend_from_slice(&word.to_le_bytes());
}

/// Builds a legacy module image: magic, code words, then a directory of
/// `(script number, code offset in words, argument count)` entries and
/// the given strings.
pub fn legacy_module(code: &[Word], scripts: &[(Word, usize, Word)], strings: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"KAR\0");
    put4(&mut out, 0);

    let code_at = out.len();
    for &word in code {
        put4(&mut out, word);
    }

    let dir_at = out.len() as Word;
    out[4..8].copy_from_slice(&dir_at.to_le_bytes());
    put4(&mut out, scripts.len() as Word);
    for &(number, code_idx, argc) in scripts {
        put4(&mut out, number);
        put4(&mut out, (code_at + code_idx * 4) as Word);
        put4(&mut out, argc);
    }

    put4(&mut out, strings.len() as Word);
    let table_at = out.len() + strings.len() * 4;
    let mut text_at = table_at;
    for text in strings {
        put4(&mut out, text_at as Word);
        text_at += text.len() + 1;
    }
    for text in strings {
        out.extend_from_slice(text);
        out.push(0);
    }
    out
}
