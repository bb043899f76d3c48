//! Cross-scope action delivery and storage sharing between map scopes.

use integration_tests::{legacy_module, MemHost};

use core_types::{ModuleName, ScopeId, ScriptName, Word};
use interpreter::{ActionKind, Environment, ScriptAction};

fn map_id(map: Word) -> ScopeId {
    ScopeId { global: 0, hub: 0, map }
}

fn link(env: &mut Environment, map: Word, handles: &[Word]) {
    env.link_modules(map_id(map), handles);
    env.map_scope(map_id(map)).active = true;
}

fn boot(env: &mut Environment, host: &mut MemHost, module: &str) -> Word {
    let handle = env
        .load_module(host, &ModuleName::from_str(module))
        .unwrap();
    env.global_scope(0).active = true;
    env.global_scope(0).hub_scope(0).active = true;
    handle
}

fn start(env: &mut Environment, map: Word, number: Word) {
    env.defer_action(ScriptAction {
        scope: map_id(map),
        name: ScriptName::Num(number),
        kind: ActionKind::Start,
        args: Vec::new(),
    });
}

#[test]
fn actions_wait_for_their_target_map_scope() {
    let data = legacy_module(&[85, 3, 120, 89, 86, 1], &[(1, 0, 0)], &[]);
    let mut host = MemHost::with_module("main", data);
    let mut env = Environment::new();

    let handle = boot(&mut env, &mut host, "main");
    link(&mut env, 0, &[handle]);

    // Map 1 does not exist yet; the request stays queued at the hub.
    start(&mut env, 1, 1);
    env.exec(&mut host);
    assert!(host.prints.is_empty());

    link(&mut env, 1, &[handle]);
    env.exec(&mut host);
    assert_eq!(host.prints, vec![b"x".to_vec()]);

    // Delivered once; later ticks do not replay it.
    env.exec(&mut host);
    assert_eq!(host.prints.len(), 1);
}

#[test]
fn hub_storage_is_shared_while_module_storage_is_per_map() {
    // Increments hub register 0 and module register 0, then terminates.
    let data = legacy_module(&[48, 0, 47, 0, 1], &[(1, 0, 0)], &[]);
    let mut host = MemHost::with_module("main", data);
    let mut env = Environment::new();

    let handle = boot(&mut env, &mut host, "main");
    link(&mut env, 0, &[handle]);
    link(&mut env, 1, &[handle]);

    start(&mut env, 0, 1);
    start(&mut env, 1, 1);
    env.exec(&mut host);

    let hub = env.find_global(0).and_then(|g| g.find_hub(0)).unwrap();
    assert_eq!(hub.regs[0], 2);
    assert_eq!(hub.find_map(0).and_then(|m| m.mod_reg(handle, 0)), Some(1));
    assert_eq!(hub.find_map(1).and_then(|m| m.mod_reg(handle, 0)), Some(1));
}

#[test]
fn one_module_image_serves_every_linked_map() {
    let data = legacy_module(&[85, 3, 121, 89, 86, 1], &[(1, 0, 0)], &[]);
    let mut host = MemHost::with_module("main", data);
    let mut env = Environment::new();

    let handle = boot(&mut env, &mut host, "main");
    for map in 0..3 {
        link(&mut env, map, &[handle]);
        start(&mut env, map, 1);
    }
    env.exec(&mut host);

    assert_eq!(env.modules.module_count(), 1);
    assert_eq!(host.prints.len(), 3);
}
