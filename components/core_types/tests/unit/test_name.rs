//! Identity types exercised through the public API.

use core_types::{ModuleName, ScopeId, ScriptName};

use std::collections::HashMap;

#[test]
fn module_names_key_on_name_and_number() {
    let mut cache: HashMap<ModuleName, u32> = HashMap::new();
    cache.insert(ModuleName::from_str("main"), 1);
    cache.insert(ModuleName { name: "main".into(), number: 7 }, 2);

    assert_eq!(cache.get(&ModuleName::from_str("main")), Some(&1));
    assert_eq!(cache.get(&ModuleName { name: "main".into(), number: 7 }), Some(&2));
    assert_eq!(cache.len(), 2);
}

#[test]
fn from_str_defaults_the_number() {
    assert_eq!(ModuleName::from_str("lump").number, 0);
}

#[test]
fn script_names_distinguish_numeric_from_string() {
    assert_ne!(ScriptName::Num(3), ScriptName::Str(3));
    assert_eq!(ScriptName::Num(3), ScriptName::Num(3));
}

#[test]
fn scope_ids_compare_componentwise() {
    assert_eq!(ScopeId::new(0, 1, 2), ScopeId { global: 0, hub: 1, map: 2 });
    assert_ne!(ScopeId::new(0, 1, 2), ScopeId::new(0, 2, 1));
}
