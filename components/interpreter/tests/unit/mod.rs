//! Execution tests against hand-assembled modules and, for persistence,
//! modules loaded through the real pipeline.

use interpreter::{
    ActionKind, Environment, HostContext, ScriptAction, ThreadState,
};

use bytecode_system::{natives, Code, Module, Script};
use core_types::{KillType, LoadError, ModuleName, ScopeId, ScriptName, Word};

use std::collections::HashMap;

#[derive(Default)]
struct TestHost {
    prints: Vec<Vec<u8>>,
    faults: Vec<KillType>,
    specials: Vec<(Word, Vec<Word>)>,
    modules: HashMap<String, Vec<u8>>,
}

impl HostContext for TestHost {
    fn fetch_module(&mut self, name: &ModuleName) -> Result<Vec<u8>, LoadError> {
        self.modules
            .get(&name.name)
            .cloned()
            .ok_or_else(|| LoadError::ModuleNotFound(name.name.clone()))
    }

    fn resolve_special_call(&mut self, spec: Word, args: &[Word]) -> Word {
        self.specials.push((spec, args.to_vec()));
        100 + spec
    }

    fn report_fault(&mut self, kind: KillType, _data: Word, _code_idx: Word) {
        self.faults.push(kind);
    }

    fn print_end(&mut self, text: &[u8]) {
        self.prints.push(text.to_vec());
    }
}

const MAP: ScopeId = ScopeId { global: 0, hub: 0, map: 1 };

/// Wraps body words with the guard instructions the translator emits at
/// both ends of every stream.
fn assemble(body: &[Word]) -> Vec<Word> {
    let mut codes = vec![Code::Kill.to_word(), KillType::OutOfBounds.to_word(), 0];
    codes.extend_from_slice(body);
    codes.extend([Code::Kill.to_word(), KillType::OutOfBounds.to_word(), 1]);
    codes
}

fn script(number: Word, code_idx: Word) -> Script {
    Script { name_int: number, code_idx, ..Script::default() }
}

fn install(env: &mut Environment, mut module: Module) -> Word {
    module.loaded = true;
    let name = module.name.clone();
    let handle = env.modules.add_module(&name);
    *env.modules.module_mut(handle) = module;
    handle
}

fn activate(env: &mut Environment, roots: &[Word]) {
    env.global_scope(MAP.global).active = true;
    env.global_scope(MAP.global).hub_scope(MAP.hub).active = true;
    env.link_modules(MAP, roots);
    env.map_scope(MAP).active = true;
}

fn start(env: &mut Environment, name: ScriptName) {
    env.defer_action(ScriptAction {
        scope: MAP,
        name,
        kind: ActionKind::Start,
        args: vec![],
    });
}

fn request(env: &mut Environment, name: ScriptName, kind: ActionKind) {
    env.defer_action(ScriptAction { scope: MAP, name, kind, args: vec![] });
}

fn mod_reg(env: &Environment, module: Word, idx: Word) -> Word {
    env.find_global(MAP.global)
        .and_then(|g| g.find_hub(MAP.hub))
        .and_then(|h| h.find_map(MAP.map))
        .and_then(|m| m.mod_reg(module, idx))
        .unwrap_or(Word::MAX)
}

fn thread_states(env: &Environment) -> Vec<ThreadState> {
    env.find_global(MAP.global)
        .and_then(|g| g.find_hub(MAP.hub))
        .and_then(|h| h.find_map(MAP.map))
        .map(|m| m.threads().iter().map(|t| t.state()).collect())
        .unwrap_or_default()
}

#[test]
fn a_started_script_runs_and_retires() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    module.codes = assemble(&[
        Code::PushLit.to_word(),
        7,
        Code::DropModReg.to_word(),
        0,
        Code::ScrTerm.to_word(),
    ]);
    module.scripts.push(script(1, 3));
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    env.exec(&mut host);

    assert_eq!(mod_reg(&env, handle, 0), 7);
    assert!(thread_states(&env).is_empty());
    assert!(host.faults.is_empty());
}

#[test]
fn delay_restart_loop_advances_once_per_tick() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    module.codes = assemble(&[
        Code::IncUModReg.to_word(),
        0,
        Code::ScrDelayLit.to_word(),
        1,
        Code::ScrRestart.to_word(),
    ]);
    module.scripts.push(script(1, 3));
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    for _ in 0..5 {
        env.exec(&mut host);
    }

    assert_eq!(mod_reg(&env, handle, 0), 5);
    assert_eq!(thread_states(&env), vec![ThreadState::Running]);
}

#[test]
fn threads_observe_earlier_threads_writes_within_a_tick() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    let writer = assemble(&[
        Code::PushLit.to_word(),
        9,
        Code::DropGblReg.to_word(),
        5,
        Code::ScrTerm.to_word(),
    ]);
    let reader_at = writer.len() as Word;
    let mut codes = writer;
    codes.extend([
        Code::PushGblReg.to_word(),
        5,
        Code::DropModReg.to_word(),
        1,
        Code::ScrTerm.to_word(),
    ]);
    module.codes = codes;
    module.scripts.push(script(1, 3));
    module.scripts.push(script(2, reader_at));
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    start(&mut env, ScriptName::Num(2));
    env.exec(&mut host);

    assert_eq!(mod_reg(&env, handle, 1), 9);
}

#[test]
fn an_exhausted_branch_budget_faults_exactly_once() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    env.branch_limit = 4;
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    module.codes = assemble(&[Code::JumpLit.to_word(), 3]);
    module.scripts.push(script(1, 3));
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    env.exec(&mut host);
    env.exec(&mut host);

    assert_eq!(host.faults, vec![KillType::BranchLimit]);
    assert!(thread_states(&env).is_empty());
}

#[test]
fn function_calls_pass_arguments_and_return_values() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let name = ModuleName::from_str("main");
    let mut module = Module { name: name.clone(), ..Module::default() };
    let caller = assemble(&[
        Code::PushLit.to_word(),
        5,
        Code::CallLit.to_word(),
        0,
        Code::DropModReg.to_word(),
        0,
        Code::ScrTerm.to_word(),
    ]);
    let func_at = caller.len() as Word;
    let mut codes = caller;
    codes.extend([
        Code::PushLocReg.to_word(),
        0,
        Code::PushLit.to_word(),
        1,
        Code::AddU.to_word(),
        Code::Retn.to_word(),
    ]);
    module.codes = codes;
    module.scripts.push(script(1, 3));
    let handle = install(&mut env, module);

    let func = env.modules.get_function(&name, Some(b"add1"));
    env.modules.set_function(
        func,
        bytecode_system::Function {
            module: handle,
            code_idx: func_at,
            arg_count: 1,
            loc_reg_count: 2,
            loc_arr_count: 0,
            has_return: true,
        },
    );
    env.modules.module_mut(handle).functions.push(func);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    env.exec(&mut host);

    assert_eq!(mod_reg(&env, handle, 0), 6);
    assert!(host.faults.is_empty());
}

#[test]
fn print_sequences_reach_the_host() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    module.codes = assemble(&[
        Code::CallFuncLit.to_word(),
        0,
        natives::PRINT_PUSH,
        Code::CallFuncLit.to_word(),
        1,
        natives::PRINT_CHAR,
        Word::from(b'h'),
        Code::CallFuncLit.to_word(),
        1,
        natives::PRINT_CHAR,
        Word::from(b'i'),
        Code::CallFuncLit.to_word(),
        0,
        natives::PRINT_END,
        Code::ScrTerm.to_word(),
    ]);
    module.scripts.push(script(1, 3));
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    env.exec(&mut host);

    assert_eq!(host.prints, vec![b"hi".to_vec()]);
}

#[test]
fn a_script_can_start_a_named_script_in_its_own_scope() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let helper_name = env.strings.intern(b"helper");
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    let starter = assemble(&[
        Code::CallFuncLit.to_word(),
        2,
        natives::SCR_START_S,
        0,
        0,
        Code::ScrTerm.to_word(),
    ]);
    let helper_at = starter.len() as Word;
    let mut codes = starter;
    codes.extend([Code::IncUModReg.to_word(), 2, Code::ScrTerm.to_word()]);
    module.codes = codes;
    module.strings.push(helper_name);
    module.scripts.push(script(1, 3));
    module.scripts.push(Script {
        name_str: Some(helper_name),
        code_idx: helper_at,
        ..Script::default()
    });
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    env.exec(&mut host);
    assert_eq!(mod_reg(&env, handle, 2), 1);

    // The helper is not restarted by later ticks.
    env.exec(&mut host);
    assert_eq!(mod_reg(&env, handle, 2), 1);
}

#[test]
fn synchronous_starts_return_the_callee_result() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let helper_name = env.strings.intern(b"helper");
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    let caller = assemble(&[
        Code::CallFuncLit.to_word(),
        1,
        natives::SCR_START_SR,
        0,
        Code::DropModReg.to_word(),
        4,
        Code::ScrTerm.to_word(),
    ]);
    let helper_at = caller.len() as Word;
    let mut codes = caller;
    codes.extend([
        Code::PushLit.to_word(),
        42,
        Code::DropScrRet.to_word(),
        Code::ScrTerm.to_word(),
    ]);
    module.codes = codes;
    module.strings.push(helper_name);
    module.scripts.push(script(1, 3));
    module.scripts.push(Script {
        name_str: Some(helper_name),
        code_idx: helper_at,
        ..Script::default()
    });
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    env.exec(&mut host);

    assert_eq!(mod_reg(&env, handle, 4), 42);
}

#[test]
fn pause_holds_a_thread_and_start_resumes_it() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    module.codes = assemble(&[
        Code::IncUModReg.to_word(),
        0,
        Code::ScrDelayLit.to_word(),
        1,
        Code::ScrRestart.to_word(),
    ]);
    module.scripts.push(script(7, 3));
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(7));
    env.exec(&mut host);
    assert_eq!(mod_reg(&env, handle, 0), 1);

    request(&mut env, ScriptName::Num(7), ActionKind::Pause);
    env.exec(&mut host);
    env.exec(&mut host);
    assert_eq!(mod_reg(&env, handle, 0), 1);
    assert_eq!(thread_states(&env), vec![ThreadState::Paused]);

    start(&mut env, ScriptName::Num(7));
    env.exec(&mut host);
    assert_eq!(mod_reg(&env, handle, 0), 2);

    request(&mut env, ScriptName::Num(7), ActionKind::Stop);
    env.exec(&mut host);
    assert!(thread_states(&env).is_empty());
}

#[test]
fn wait_releases_when_the_awaited_script_finishes() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    let worker = assemble(&[Code::ScrDelayLit.to_word(), 2, Code::ScrTerm.to_word()]);
    let waiter_at = worker.len() as Word;
    let mut codes = worker;
    codes.extend([
        Code::ScrWaitILit.to_word(),
        7,
        Code::IncUModReg.to_word(),
        3,
        Code::ScrTerm.to_word(),
    ]);
    module.codes = codes;
    module.scripts.push(script(7, 3));
    module.scripts.push(script(8, waiter_at));
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(7));
    start(&mut env, ScriptName::Num(8));
    env.exec(&mut host);
    env.exec(&mut host);
    assert_eq!(mod_reg(&env, handle, 3), 0);

    env.exec(&mut host);
    assert_eq!(mod_reg(&env, handle, 3), 1);
    assert!(thread_states(&env).is_empty());
}

#[test]
fn unknown_native_indices_fault_the_thread() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    module.codes = assemble(&[Code::CallFuncLit.to_word(), 0, 999, Code::ScrTerm.to_word()]);
    module.scripts.push(script(1, 3));
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    env.exec(&mut host);

    assert_eq!(host.faults, vec![KillType::UnknownFunc]);
    assert!(thread_states(&env).is_empty());
}

#[test]
fn legacy_modules_clamp_automatic_call_arguments() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let mut module = Module { name: ModuleName::from_str("main"), ..Module::default() };
    module.is_legacy = true;
    module.clamp_call_spec = true;
    module.codes = assemble(&[
        Code::PushLit.to_word(),
        0x1FF,
        Code::CallSpec.to_word(),
        1,
        13,
        Code::ScrTerm.to_word(),
    ]);
    module.scripts.push(script(1, 3));
    let handle = install(&mut env, module);
    activate(&mut env, &[handle]);

    start(&mut env, ScriptName::Num(1));
    env.exec(&mut host);

    assert_eq!(host.specials, vec![(13, vec![0xFF])]);
}

// -------------------------------------------------------------------
// Persistence, against the real load pipeline.

fn put4(out: &mut Vec<u8>, word: Word) {
    out.extend_from_slice(&word.to_le_bytes());
}

/// Legacy wrapper: code words, then a one-script directory (script 1),
/// then an empty string table.
fn legacy_module(code: &[Word]) -> Vec<u8> {
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
    put4(&mut out, 1);
    put4(&mut out, code_at);
    put4(&mut out, 0);
    put4(&mut out, 0);
    out
}

#[test]
fn a_mid_delay_thread_survives_a_save_and_restore() {
    // push 7, store it, delay 2 ticks, increment, terminate.
    let data = legacy_module(&[3, 7, 26, 0, 56, 2, 47, 0, 1]);

    let mut host = TestHost::default();
    host.modules.insert("main".to_string(), data.clone());

    let mut env = Environment::new();
    let handle = env.load_module(&mut host, &ModuleName::from_str("main")).unwrap();
    activate(&mut env, &[handle]);
    start(&mut env, ScriptName::Num(1));
    env.exec(&mut host);
    assert_eq!(mod_reg(&env, handle, 0), 7);
    assert_eq!(thread_states(&env), vec![ThreadState::Running]);

    let mut saved = Vec::new();
    env.save_state(&mut saved, true).unwrap();

    let mut env2 = Environment::new();
    let mut host2 = TestHost::default();
    host2.modules.insert("main".to_string(), data);
    env2.load_state(&mut saved.as_slice(), &mut host2).unwrap();

    let handle2 = env2.modules.find_module(&ModuleName::from_str("main")).unwrap();
    assert_eq!(mod_reg(&env2, handle2, 0), 7);
    assert_eq!(thread_states(&env2), vec![ThreadState::Running]);

    // Two more ticks finish the delay and run the increment.
    env2.exec(&mut host2);
    assert_eq!(mod_reg(&env2, handle2, 0), 7);
    env2.exec(&mut host2);
    assert_eq!(mod_reg(&env2, handle2, 0), 8);
    assert!(thread_states(&env2).is_empty());
}

#[test]
fn restore_rejects_foreign_streams() {
    let mut env = Environment::new();
    let mut host = TestHost::default();
    let err = env.load_state(&mut &b"not a state file"[..], &mut host).unwrap_err();
    assert!(matches!(err, core_types::SerialError::BadTag));
}
