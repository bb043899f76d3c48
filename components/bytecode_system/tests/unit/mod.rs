//! End-to-end loads through the public loader API.

use bytecode_system::{natives, Code, ModuleLoader, ModuleSet, ModuleSource, SourceTables};
use core_types::{LoadError, ModuleName, Word};
use memory_manager::StringTable;

use std::collections::HashMap;

struct MapSource(HashMap<String, Vec<u8>>);

impl ModuleSource for MapSource {
    fn fetch(&mut self, name: &ModuleName) -> Result<Vec<u8>, LoadError> {
        self.0
            .get(&name.name)
            .cloned()
            .ok_or_else(|| LoadError::ModuleNotFound(name.name.clone()))
    }
}

fn put4(out: &mut Vec<u8>, word: Word) {
    out.extend_from_slice(&word.to_le_bytes());
}

fn put2(out: &mut Vec<u8>, word: Word) {
    out.extend_from_slice(&(word as u16).to_le_bytes());
}

fn chunk(out: &mut Vec<u8>, tag: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(tag);
    put4(out, payload.len() as Word);
    out.extend_from_slice(payload);
}

/// Legacy wrapper: code words, then a one-script directory, then the
/// given string literals.
fn legacy_module(code: &[Word], strings: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"KAR\0");
    put4(&mut out, 0);

    let code_at = out.len() as Word;
    for &word in code {
        put4(&mut out, word);
    }

    let dir_at = out.len() as Word;
    out[4..8].copy_from_slice(&dir_at.to_le_bytes());
    put4(&mut out, 1);
    put4(&mut out, 1); // script 1, type 0
    put4(&mut out, code_at);
    put4(&mut out, 0);

    put4(&mut out, strings.len() as Word);
    let offsets_at = out.len();
    for _ in strings {
        put4(&mut out, 0);
    }
    for (i, lit) in strings.iter().enumerate() {
        let at = out.len() as Word;
        out[offsets_at + i * 4..offsets_at + i * 4 + 4].copy_from_slice(&at.to_le_bytes());
        out.extend_from_slice(lit);
        out.push(0);
    }
    out
}

fn load(data: Vec<u8>) -> (StringTable, ModuleSet, Word) {
    let mut strings = StringTable::new();
    let tables = SourceTables::new();
    let mut source = MapSource(HashMap::from([("main".to_string(), data)]));
    let mut set = ModuleSet::new();
    let mut loader = ModuleLoader::new(&mut strings, &tables, &mut source);
    let handle = loader
        .get_or_load(&mut set, &ModuleName::from_str("main"))
        .unwrap();
    (strings, set, handle)
}

#[test]
fn compressed_operands_and_wide_opcodes() {
    let mut out = Vec::new();
    out.extend_from_slice(b"KARx");
    put4(&mut out, 0);

    let code_at = out.len() as Word;
    out.push(3); // push literal
    put4(&mut out, 5);
    out.extend_from_slice(&[240, 13]); // opcode 253, string length
    out.push(1); // terminate

    let table_at = out.len() as Word;
    out[4..8].copy_from_slice(&table_at.to_le_bytes());
    let mut sptr = Vec::new();
    put2(&mut sptr, 9);
    put2(&mut sptr, 0);
    put4(&mut sptr, code_at);
    put4(&mut sptr, 0);
    chunk(&mut out, b"SPTR", &sptr);

    let (_, set, handle) = load(out);
    let module = set.module(handle);
    let at = module.scripts[0].code_idx as usize;
    assert_eq!(
        &module.codes[at..at + 6],
        &[
            Code::PushLit.to_word(),
            5,
            Code::CallFunc.to_word(),
            1,
            natives::STR_LEN,
            Code::ScrTerm.to_word(),
        ]
    );
}

#[test]
fn native_calls_translate_through_the_alias_table() {
    // Source native 63 compares strings; it has no direct instruction
    // and lowers to an indexed native call.
    let (_, set, handle) = load(legacy_module(&[351, 2, 63, 1], &[]));
    let module = set.module(handle);
    let at = module.scripts[0].code_idx as usize;
    assert_eq!(
        &module.codes[at..at + 4],
        &[
            Code::CallFunc.to_word(),
            2,
            natives::STR_CMP,
            Code::ScrTerm.to_word(),
        ]
    );
}

#[test]
fn alias_with_direct_form_skips_the_native_call() {
    // Source native 15 with two arguments is character indexing, which
    // has a dedicated instruction.
    let (_, set, handle) = load(legacy_module(&[351, 2, 15, 1], &[]));
    let module = set.module(handle);
    let at = module.scripts[0].code_idx as usize;
    assert_eq!(
        &module.codes[at..at + 2],
        &[Code::PushStrArs.to_word(), Code::ScrTerm.to_word()]
    );
}

#[test]
fn string_escapes_are_parsed_at_load() {
    let (strings, set, handle) =
        load(legacy_module(&[1], &[b"a\\x41\\n", b"plain"]));
    let module = set.module(handle);
    assert_eq!(strings.get(module.strings[0]), b"aA\n");
    assert_eq!(strings.get(module.strings[1]), b"plain");
}

#[test]
fn address_constants_are_rewritten() {
    let mut out = Vec::new();
    out.extend_from_slice(b"KARX");
    put4(&mut out, 0);

    let code_at = out.len() as Word;
    for word in [3, 42, 1] {
        put4(&mut out, word);
    }

    let table_at = out.len() as Word;
    out[4..8].copy_from_slice(&table_at.to_le_bytes());
    let mut jump = Vec::new();
    put4(&mut jump, code_at);
    chunk(&mut out, b"JUMP", &jump);

    let (_, set, handle) = load(out);
    let module = set.module(handle);
    assert_eq!(module.jumps.len(), 1);
    let at = module.jumps[0] as usize;
    // Index zero holds the out-of-bounds guard, so a real target never
    // lands there.
    assert_ne!(at, 0);
    assert_eq!(module.codes[at], Code::PushLit.to_word());
    assert_eq!(module.codes[at + 1], 42);
}

#[test]
fn one_buffer_can_serve_many_identities() {
    let data = legacy_module(&[1], &[]);
    let mut strings = StringTable::new();
    let tables = SourceTables::new();
    let mut source = MapSource(HashMap::from([("main".to_string(), data)]));
    let mut set = ModuleSet::new();
    let mut loader = ModuleLoader::new(&mut strings, &tables, &mut source);

    let a = loader
        .get_or_load(&mut set, &ModuleName { name: "main".into(), number: 0 })
        .unwrap();
    let b = loader
        .get_or_load(&mut set, &ModuleName { name: "main".into(), number: 1 })
        .unwrap();
    assert_ne!(a, b);
    let again = loader
        .get_or_load(&mut set, &ModuleName { name: "main".into(), number: 0 })
        .unwrap();
    assert_eq!(a, again);
}
