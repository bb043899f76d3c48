//! Raw module bytes through the translator and into the dispatch loop.

use integration_tests::{legacy_module, MemHost};

use core_types::{KillType, ModuleName, ScopeId, ScriptName};
use interpreter::{ActionKind, Environment, ScriptAction};

const MAP: ScopeId = ScopeId { global: 0, hub: 0, map: 0 };

fn boot(env: &mut Environment, host: &mut MemHost, modules: &[&str]) {
    let mut handles = Vec::new();
    for module in modules {
        let name = ModuleName::from_str(*module);
        handles.push(env.load_module(host, &name).unwrap());
    }
    env.global_scope(MAP.global).active = true;
    env.global_scope(MAP.global).hub_scope(MAP.hub).active = true;
    env.link_modules(MAP, &handles);
    env.map_scope(MAP).active = true;
}

fn start(env: &mut Environment, number: u32) {
    env.defer_action(ScriptAction {
        scope: MAP,
        name: ScriptName::Num(number),
        kind: ActionKind::Start,
        args: Vec::new(),
    });
}

fn live_threads(env: &Environment) -> usize {
    env.find_global(MAP.global)
        .and_then(|g| g.find_hub(MAP.hub))
        .and_then(|h| h.find_map(MAP.map))
        .map(|m| m.threads().len())
        .unwrap_or(0)
}

#[test]
fn a_loaded_module_prints_through_the_host() {
    // begin print, 'h', 'i', end print, terminate.
    let data = legacy_module(&[85, 3, 104, 89, 3, 105, 89, 86, 1], &[(1, 0, 0)], &[]);
    let mut host = MemHost::with_module("main", data);
    let mut env = Environment::new();

    boot(&mut env, &mut host, &["main"]);
    start(&mut env, 1);
    env.exec(&mut host);

    assert_eq!(host.prints, vec![b"hi".to_vec()]);
    assert_eq!(live_threads(&env), 0);
    assert!(host.faults.is_empty());
}

#[test]
fn string_literals_flow_from_the_image_to_prints() {
    // begin print, print string 0, end print, terminate.
    let data = legacy_module(&[85, 3, 0, 87, 86, 1], &[(1, 0, 0)], &[b"caverns"]);
    let mut host = MemHost::with_module("main", data);
    let mut env = Environment::new();

    boot(&mut env, &mut host, &["main"]);
    start(&mut env, 1);
    env.exec(&mut host);

    assert_eq!(host.prints, vec![b"caverns".to_vec()]);
}

#[test]
fn threads_run_in_start_order_within_a_tick() {
    let code = [
        85, 3, 97, 89, 86, 1, // script at 0 prints "a"
        85, 3, 98, 89, 86, 1, // script at 6 prints "b"
    ];
    let data = legacy_module(&code, &[(1, 0, 0), (2, 6, 0)], &[]);
    let mut host = MemHost::with_module("main", data);
    let mut env = Environment::new();

    boot(&mut env, &mut host, &["main"]);
    start(&mut env, 2);
    start(&mut env, 1);
    env.exec(&mut host);

    assert_eq!(host.prints, vec![b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn a_restart_loop_exhausts_the_branch_budget_once() {
    let data = legacy_module(&[69], &[(1, 0, 0)], &[]);
    let mut host = MemHost::with_module("main", data);
    let mut env = Environment::new();
    env.branch_limit = 8;

    boot(&mut env, &mut host, &["main"]);
    start(&mut env, 1);
    env.exec(&mut host);
    env.exec(&mut host);

    assert_eq!(host.faults, vec![KillType::BranchLimit]);
    assert_eq!(live_threads(&env), 0);
}

#[test]
fn delays_spread_work_across_ticks() {
    // Stores 7, then each pass waits two ticks and increments.
    let data = legacy_module(&[3, 7, 26, 0, 56, 2, 47, 0, 56, 2, 47, 0, 1], &[(1, 0, 0)], &[]);
    let mut host = MemHost::with_module("main", data);
    let mut env = Environment::new();

    boot(&mut env, &mut host, &["main"]);
    start(&mut env, 1);

    let handle = env.modules.find_module(&ModuleName::from_str("main")).unwrap();
    let reg = |env: &Environment| {
        env.find_global(MAP.global)
            .and_then(|g| g.find_hub(MAP.hub))
            .and_then(|h| h.find_map(MAP.map))
            .and_then(|m| m.mod_reg(handle, 0))
            .unwrap()
    };

    env.exec(&mut host);
    assert_eq!(reg(&env), 7);
    env.exec(&mut host);
    assert_eq!(reg(&env), 7);
    env.exec(&mut host);
    assert_eq!(reg(&env), 8);
    env.exec(&mut host);
    env.exec(&mut host);
    assert_eq!(reg(&env), 9);
    assert_eq!(live_threads(&env), 0);
}

#[test]
fn missing_modules_fail_the_load() {
    let mut host = MemHost::default();
    let mut env = Environment::new();
    let err = env.load_module(&mut host, &ModuleName::from_str("absent"));
    assert!(matches!(err, Err(core_types::LoadError::ModuleNotFound(_))));
}
