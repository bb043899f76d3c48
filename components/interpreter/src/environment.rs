//! The execution environment: module storage, the shared string table,
//! the native table, the scope tree, and the host hook surface.

use crate::action::ScriptAction;
use crate::callfunc;
use crate::scope::GlobalScope;
use crate::thread::{Thread, ThreadCell, ThreadState};

use bytecode_system::{ModuleLoader, ModuleSet, ModuleSource, SourceTables, DEFAULT_SCRIPT_REGS};
use core_types::{
    word_is_string, KillType, LoadError, ModuleName, ScriptName, Word,
};
use memory_manager::StringTable;

use log::{info, warn};

use std::collections::BTreeMap;
use std::rc::Rc;

/// A native function callable from script code.
///
/// Receives the executing context, the calling thread, its borrowed body,
/// and the call arguments in push order. Returning `true` interrupts the
/// instruction slice so the dispatch loop re-reads the thread state.
pub type NativeFn = fn(&mut crate::Vm<'_>, &Rc<ThreadCell>, &mut Thread, &[Word]) -> bool;

/// Host integration surface.
///
/// Every hook has a default, so `impl HostContext for MyHost {}` is a
/// working embedding. Hooks are called from inside the dispatch loop;
/// they must not re-enter the environment.
pub trait HostContext {
    /// Produces the raw bytes of a module. The default knows no modules.
    fn fetch_module(&mut self, name: &ModuleName) -> Result<Vec<u8>, LoadError> {
        Err(LoadError::ModuleNotFound(name.name.clone()))
    }

    /// Performs an automatic call. The result word is pushed only by the
    /// result-returning call instruction.
    fn resolve_special_call(&mut self, spec: Word, args: &[Word]) -> Word {
        let _ = (spec, args);
        0
    }

    /// Tests a lock for the guarded start natives. `door` distinguishes
    /// the two guarded forms. The default refuses every lock.
    fn is_lock_open(&mut self, lock: Word, door: bool) -> bool {
        let _ = (lock, door);
        false
    }

    /// Tests the predicate behind a tag wait. The default never
    /// satisfies, leaving such threads waiting.
    fn is_tag_satisfied(&mut self, tag_type: Word, tag: Word) -> bool {
        let _ = (tag_type, tag);
        false
    }

    /// Observes a thread fault. `data` is fault-class specific and
    /// `code_idx` locates the faulting instruction.
    fn report_fault(&mut self, kind: KillType, data: Word, code_idx: Word) {
        warn!("script fault {kind:?} (data {data}) at code index {code_idx}");
    }

    /// Receives a finished print buffer.
    fn print_end(&mut self, text: &[u8]) {
        info!("script print: {}", String::from_utf8_lossy(text));
    }
}

/// A host with every hook at its default.
#[derive(Debug, Default)]
pub struct DefaultHost;

impl HostContext for DefaultHost {}

struct HostSource<'a> {
    host: &'a mut dyn HostContext,
}

impl ModuleSource for HostSource<'_> {
    fn fetch(&mut self, name: &ModuleName) -> Result<Vec<u8>, LoadError> {
        self.host.fetch_module(name)
    }
}

/// One complete VM instance.
///
/// Owns everything scripts can reach: translated modules, interned
/// strings, the native table, the global/hub/map scope tree, deferred
/// cross-scope actions, and the free-thread pool. Hosts drive it by
/// loading modules, activating scopes, and calling [`Environment::exec`]
/// once per tick.
pub struct Environment {
    /// Interned strings shared by every module and scope.
    pub strings: StringTable,
    /// Translated modules and the function arena.
    pub modules: ModuleSet,
    /// Taken branches allowed per instruction slice; zero is unlimited.
    pub branch_limit: Word,
    /// Local registers for scripts that do not declare a count.
    pub default_script_regs: Word,

    tables: SourceTables,
    natives: Vec<NativeFn>,
    globals: BTreeMap<Word, GlobalScope>,
    pub(crate) defers: Vec<ScriptAction>,
    thread_pool: Vec<Rc<ThreadCell>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Creates an environment with the default native table and source
    /// tables.
    pub fn new() -> Self {
        Self {
            strings: StringTable::new(),
            modules: ModuleSet::new(),
            branch_limit: 0,
            default_script_regs: DEFAULT_SCRIPT_REGS,
            tables: SourceTables::new(),
            natives: callfunc::default_natives(),
            globals: BTreeMap::new(),
            defers: Vec::new(),
            thread_pool: Vec::new(),
        }
    }

    /// Runs one tick: delivers deferred actions whose target global scope
    /// is active, then runs every active global scope in id order.
    pub fn exec(&mut self, host: &mut dyn HostContext) {
        let mut keep = Vec::new();
        for action in std::mem::take(&mut self.defers) {
            match self.globals.get_mut(&action.scope.global) {
                Some(global) if global.active => global.actions.push(action),
                _ => keep.push(action),
            }
        }
        self.defers = keep;

        // The scope tree comes out of the environment for the tick so
        // executing threads can borrow the environment mutably.
        let mut globals = std::mem::take(&mut self.globals);
        for global in globals.values_mut() {
            if global.active {
                global.exec(self, host);
            }
        }
        self.globals = globals;
    }

    /// Queues a lifecycle request for delivery down the scope tree. The
    /// request waits until every level of its target triple is active.
    pub fn defer_action(&mut self, action: ScriptAction) {
        self.defers.push(action);
    }

    /// Loads and translates a module through the host's byte source,
    /// returning its handle. Already-loaded identities return their
    /// cached handle without touching the host.
    pub fn load_module(
        &mut self,
        host: &mut dyn HostContext,
        name: &ModuleName,
    ) -> Result<Word, LoadError> {
        let mut source = HostSource { host };
        let mut loader = ModuleLoader::new(&mut self.strings, &self.tables, &mut source);
        loader.default_script_regs = self.default_script_regs;
        loader.get_or_load(&mut self.modules, name)
    }

    /// Registers a host native past the default table, returning the
    /// index script code calls it by.
    pub fn add_native(&mut self, f: NativeFn) -> Word {
        let idx = self.natives.len() as Word;
        self.natives.push(f);
        idx
    }

    pub(crate) fn native(&self, idx: Word) -> Option<NativeFn> {
        self.natives.get(idx as usize).copied()
    }

    /// The source tables modules are translated against.
    pub fn tables(&self) -> &SourceTables {
        &self.tables
    }

    /// Mutable source tables, for hosts extending the source instruction
    /// set before loading modules.
    pub fn tables_mut(&mut self) -> &mut SourceTables {
        &mut self.tables
    }

    /// The global scope numbered `id`, created inactive on first use.
    pub fn global_scope(&mut self, id: Word) -> &mut GlobalScope {
        self.globals.entry(id).or_insert_with(|| GlobalScope::new(id))
    }

    /// An existing global scope.
    pub fn find_global(&self, id: Word) -> Option<&GlobalScope> {
        self.globals.get(&id)
    }

    /// The map scope addressed by a full triple, creating inactive scope
    /// levels on first use.
    pub fn map_scope(&mut self, id: core_types::ScopeId) -> &mut crate::MapScope {
        self.global_scope(id.global).hub_scope(id.hub).map_scope(id.map)
    }

    /// Links loaded modules into a map scope. The first root of the first
    /// call becomes the scope's first module.
    pub fn link_modules(&mut self, id: core_types::ScopeId, roots: &[Word]) {
        let modules = &self.modules;
        let map = self
            .globals
            .entry(id.global)
            .or_insert_with(|| GlobalScope::new(id.global))
            .hub_scope(id.hub)
            .map_scope(id.map);
        map.add_modules(modules, roots);
    }

    pub(crate) fn globals(&self) -> &BTreeMap<Word, GlobalScope> {
        &self.globals
    }

    pub(crate) fn globals_mut(&mut self) -> &mut BTreeMap<Word, GlobalScope> {
        &mut self.globals
    }

    pub(crate) fn get_free_thread(&mut self) -> Rc<ThreadCell> {
        self.thread_pool.pop().unwrap_or_default()
    }

    pub(crate) fn recycle_thread(&mut self, cell: Rc<ThreadCell>) {
        if Rc::strong_count(&cell) == 1 {
            self.thread_pool.push(cell);
        }
    }

    pub(crate) fn teardown(&mut self) {
        self.globals.clear();
        self.defers.clear();
        self.thread_pool.clear();
        self.modules.clear();
    }

    /// Runs one string collection pass: marks every string reachable from
    /// modules, scope storage, threads, and queued actions, then frees
    /// the rest.
    pub fn collect_strings(&mut self) {
        let strings = &mut self.strings;
        strings.collect_begin();

        for handle in 0..self.modules.module_count() as Word {
            let module = self.modules.module(handle);
            for &idx in &module.strings {
                strings.mark(idx);
            }
            for &idx in &module.script_names {
                strings.mark(idx);
            }
            for script in &module.scripts {
                if let Some(idx) = script.name_str {
                    strings.mark(idx);
                }
            }
            for name in [&module.func_names, &module.reg_names, &module.arr_names] {
                for idx in name.iter().flatten() {
                    strings.mark(*idx);
                }
            }
            for imports in [&module.reg_imports, &module.arr_imports] {
                for idx in imports.iter().flatten() {
                    strings.mark(*idx);
                }
            }
        }

        for action in &self.defers {
            mark_action(strings, action);
        }

        for global in self.globals.values() {
            mark_storage(strings, &global.arrays, &global.regs);
            for action in &global.actions {
                mark_action(strings, action);
            }
            for hub in global.hubs.values() {
                mark_storage(strings, &hub.arrays, &hub.regs);
                for action in &hub.actions {
                    mark_action(strings, action);
                }
                for map in hub.maps.values() {
                    for action in &map.actions {
                        mark_action(strings, action);
                    }
                    for scope in map.module_scopes.values() {
                        mark_storage(strings, scope.arrays(), scope.regs());
                    }
                    for cell in map.threads() {
                        mark_thread(strings, cell);
                    }
                }
            }
        }

        strings.collect_end();
    }
}

fn mark_word(strings: &mut StringTable, word: Word) {
    if word_is_string(word) {
        strings.mark(core_types::decode_string(word));
    }
}

fn mark_storage(strings: &mut StringTable, arrays: &[memory_manager::WordArray], regs: &[Word]) {
    for arr in arrays {
        arr.for_each(|word| mark_word(strings, word));
    }
    for &reg in regs {
        mark_word(strings, reg);
    }
}

fn mark_action(strings: &mut StringTable, action: &ScriptAction) {
    if let ScriptName::Str(idx) = action.name {
        strings.mark(idx);
    }
    for &arg in &action.args {
        mark_word(strings, arg);
    }
}

fn mark_thread(strings: &mut StringTable, cell: &ThreadCell) {
    let body = cell.body();
    for &word in &body.data_stack {
        mark_word(strings, word);
    }
    for &word in body.local_regs.iter_full() {
        mark_word(strings, word);
    }
    for arr in body.local_arrs.iter_full() {
        arr.for_each(|word| mark_word(strings, word));
    }
    mark_word(strings, body.result);
    if let ThreadState::WaitScrStr(word) = cell.state() {
        mark_word(strings, word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::encode_string;

    #[test]
    fn registered_natives_index_past_the_default_table() {
        fn noop(
            _vm: &mut crate::Vm<'_>,
            _cell: &Rc<ThreadCell>,
            _body: &mut Thread,
            _args: &[Word],
        ) -> bool {
            false
        }
        let mut env = Environment::new();
        let idx = env.add_native(noop);
        assert_eq!(idx, bytecode_system::natives::COUNT);
        assert!(env.native(idx).is_some());
        assert!(env.native(idx + 1).is_none());
    }

    #[test]
    fn collection_keeps_strings_reachable_from_scope_storage() {
        let mut env = Environment::new();
        let kept = env.strings.intern(b"kept");
        let dead = env.strings.intern(b"dead");

        let global = env.global_scope(0);
        global.regs[3] = encode_string(kept);
        env.collect_strings();

        assert_eq!(env.strings.get(kept), b"kept");
        assert_eq!(env.strings.get(dead), b"");
    }

    #[test]
    fn deferred_actions_wait_for_an_active_global_scope() {
        let mut env = Environment::new();
        let mut host = DefaultHost;
        env.defer_action(ScriptAction {
            scope: core_types::ScopeId::new(2, 0, 1),
            name: ScriptName::Num(1),
            kind: crate::ActionKind::Start,
            args: vec![],
        });

        env.exec(&mut host);
        assert_eq!(env.defers.len(), 1);

        env.global_scope(2).active = true;
        env.exec(&mut host);
        assert!(env.defers.is_empty());
    }
}
