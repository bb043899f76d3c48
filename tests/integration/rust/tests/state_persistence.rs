//! Whole-environment save and restore across component boundaries.

use integration_tests::{legacy_module, MemHost};

use core_types::{ModuleName, ScopeId, ScriptName, SerialError};
use interpreter::{ActionKind, Environment, ScriptAction};

const MAP: ScopeId = ScopeId { global: 0, hub: 0, map: 0 };

fn boot(env: &mut Environment, host: &mut MemHost, module: &str) {
    let handle = env
        .load_module(host, &ModuleName::from_str(module))
        .unwrap();
    env.global_scope(MAP.global).active = true;
    env.global_scope(MAP.global).hub_scope(MAP.hub).active = true;
    env.link_modules(MAP, &[handle]);
    env.map_scope(MAP).active = true;
    env.defer_action(ScriptAction {
        scope: MAP,
        name: ScriptName::Num(1),
        kind: ActionKind::Start,
        args: Vec::new(),
    });
}

fn print_delay_print() -> Vec<u8> {
    // Prints "a", waits two ticks, prints "b", terminates.
    legacy_module(
        &[85, 3, 97, 89, 86, 56, 2, 85, 3, 98, 89, 86, 1],
        &[(1, 0, 0)],
        &[],
    )
}

#[test]
fn a_saved_run_resumes_with_identical_output() {
    let mut host = MemHost::with_module("main", print_delay_print());
    let mut env = Environment::new();
    boot(&mut env, &mut host, "main");
    env.exec(&mut host);
    assert_eq!(host.prints, vec![b"a".to_vec()]);

    let mut state = Vec::new();
    env.save_state(&mut state, true).unwrap();

    let mut host2 = MemHost::with_module("main", print_delay_print());
    let mut env2 = Environment::new();
    env2.load_state(&mut state.as_slice(), &mut host2).unwrap();

    for _ in 0..4 {
        env2.exec(&mut host2);
    }
    assert_eq!(host2.prints, vec![b"b".to_vec()]);

    let threads = env2
        .find_global(MAP.global)
        .and_then(|g| g.find_hub(MAP.hub))
        .and_then(|h| h.find_map(MAP.map))
        .map(|m| m.threads().len());
    assert_eq!(threads, Some(0));
}

#[test]
fn restore_reloads_modules_through_the_host() {
    let mut host = MemHost::with_module("main", print_delay_print());
    let mut env = Environment::new();
    boot(&mut env, &mut host, "main");
    env.exec(&mut host);

    let mut state = Vec::new();
    env.save_state(&mut state, true).unwrap();

    // A host without the module cannot satisfy the restore.
    let mut bare = MemHost::default();
    let mut env2 = Environment::new();
    let err = env2.load_state(&mut state.as_slice(), &mut bare);
    assert!(matches!(err, Err(SerialError::Load(_))));
}

#[test]
fn queued_actions_survive_a_round_trip() {
    let mut host = MemHost::with_module("main", print_delay_print());
    let mut env = Environment::new();
    boot(&mut env, &mut host, "main");
    // Saved before the first tick, so the start is still queued.

    let mut state = Vec::new();
    env.save_state(&mut state, true).unwrap();

    let mut host2 = MemHost::with_module("main", print_delay_print());
    let mut env2 = Environment::new();
    env2.load_state(&mut state.as_slice(), &mut host2).unwrap();
    env2.exec(&mut host2);
    assert_eq!(host2.prints, vec![b"a".to_vec()]);
}

#[test]
fn collection_keeps_module_strings_and_drops_scratch() {
    let data = legacy_module(&[85, 3, 0, 87, 86, 1], &[(1, 0, 0)], &[b"keep me"]);
    let mut host = MemHost::with_module("main", data);
    let mut env = Environment::new();
    boot(&mut env, &mut host, "main");

    let scratch = env.strings.intern(b"nothing points here");
    env.collect_strings();

    let handle = env.modules.find_module(&ModuleName::from_str("main")).unwrap();
    let literal = env.modules.module(handle).strings[0];
    assert_eq!(env.strings.get(literal), b"keep me");
    assert_eq!(env.strings.get(scratch), b"");

    env.exec(&mut host);
    assert_eq!(host.prints, vec![b"keep me".to_vec()]);
}
