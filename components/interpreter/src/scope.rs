//! The scope hierarchy: global and hub storage levels, map scopes that
//! run threads, and per-module storage within a map.

use crate::action::ScriptAction;
use crate::dispatch::{run_map, Vm};
use crate::environment::{Environment, HostContext};
use crate::thread::{ThreadCell, ThreadState};

use bytecode_system::{Module, ModuleSet};
use core_types::{decode_string, word_is_string, ScopeId, ScriptName, StringIdx, Word};
use memory_manager::WordArray;

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Arrays owned by each global, hub, and module scope.
pub const SCOPE_ARR_COUNT: usize = 256;
/// Registers owned by each global, hub, and module scope.
pub const SCOPE_REG_COUNT: usize = 256;

/// Identifies a script within a map scope: (module handle, script index).
pub type ScriptKey = (Word, Word);

fn fresh_arrays() -> Vec<WordArray> {
    (0..SCOPE_ARR_COUNT).map(|_| WordArray::new()).collect()
}

/// Top storage level. Owns hub scopes keyed by number.
#[derive(Debug)]
pub struct GlobalScope {
    /// Scope number.
    pub id: Word,
    /// Inactive scopes neither run nor receive queued actions.
    pub active: bool,
    /// Global arrays.
    pub arrays: Vec<WordArray>,
    /// Global registers.
    pub regs: Vec<Word>,
    pub(crate) actions: Vec<ScriptAction>,
    pub(crate) hubs: BTreeMap<Word, HubScope>,
}

impl GlobalScope {
    /// Creates an inactive global scope.
    pub fn new(id: Word) -> Self {
        Self {
            id,
            active: false,
            arrays: fresh_arrays(),
            regs: vec![0; SCOPE_REG_COUNT],
            actions: Vec::new(),
            hubs: BTreeMap::new(),
        }
    }

    /// The hub scope for `hub`, created inactive on first use.
    pub fn hub_scope(&mut self, hub: Word) -> &mut HubScope {
        let id = self.id;
        self.hubs.entry(hub).or_insert_with(|| HubScope::new(id, hub))
    }

    /// An existing hub scope.
    pub fn find_hub(&self, hub: Word) -> Option<&HubScope> {
        self.hubs.get(&hub)
    }

    /// Delivers queued actions to active hubs, then runs them in id order.
    pub(crate) fn exec(&mut self, env: &mut Environment, host: &mut dyn HostContext) {
        let mut keep = Vec::new();
        for action in std::mem::take(&mut self.actions) {
            match self.hubs.get_mut(&action.scope.hub) {
                Some(hub) if hub.active => hub.actions.push(action),
                _ => keep.push(action),
            }
        }
        self.actions = keep;

        let GlobalScope { arrays, regs, hubs, .. } = self;
        for hub in hubs.values_mut() {
            if hub.active {
                hub.exec(env, host, arrays, regs);
            }
        }
    }
}

/// Middle storage level. Owns map scopes keyed by number.
#[derive(Debug)]
pub struct HubScope {
    /// Owning global scope number.
    pub global: Word,
    /// Scope number within the global scope.
    pub id: Word,
    /// Inactive scopes neither run nor receive queued actions.
    pub active: bool,
    /// Hub arrays.
    pub arrays: Vec<WordArray>,
    /// Hub registers.
    pub regs: Vec<Word>,
    pub(crate) actions: Vec<ScriptAction>,
    pub(crate) maps: BTreeMap<Word, MapScope>,
}

impl HubScope {
    /// Creates an inactive hub scope.
    pub fn new(global: Word, id: Word) -> Self {
        Self {
            global,
            id,
            active: false,
            arrays: fresh_arrays(),
            regs: vec![0; SCOPE_REG_COUNT],
            actions: Vec::new(),
            maps: BTreeMap::new(),
        }
    }

    /// The map scope for `map`, created inactive on first use.
    pub fn map_scope(&mut self, map: Word) -> &mut MapScope {
        let id = ScopeId::new(self.global, self.id, map);
        self.maps.entry(map).or_insert_with(|| MapScope::new(id))
    }

    /// An existing map scope.
    pub fn find_map(&self, map: Word) -> Option<&MapScope> {
        self.maps.get(&map)
    }

    pub(crate) fn exec(
        &mut self,
        env: &mut Environment,
        host: &mut dyn HostContext,
        gbl_arrays: &mut [WordArray],
        gbl_regs: &mut [Word],
    ) {
        let mut keep = Vec::new();
        for action in std::mem::take(&mut self.actions) {
            match self.maps.get_mut(&action.scope.map) {
                Some(map) if map.active => map.actions.push(action),
                _ => keep.push(action),
            }
        }
        self.actions = keep;

        let HubScope { arrays, regs, maps, .. } = self;
        for map in maps.values_mut() {
            if map.active {
                let mut vm = Vm {
                    env: &mut *env,
                    host: &mut *host,
                    gbl_arrays: &mut *gbl_arrays,
                    gbl_regs: &mut *gbl_regs,
                    hub_arrays: &mut arrays[..],
                    hub_regs: &mut regs[..],
                    map,
                };
                run_map(&mut vm);
            }
        }
    }
}

/// The scope level scripts run in.
///
/// Holds the transitive module closure, one [`ModuleScope`] per module,
/// the script lookup tables, and the live thread list. The first module
/// of the closure resolves untagged string words.
#[derive(Debug)]
pub struct MapScope {
    /// Full scope triple.
    pub id: ScopeId,
    /// Inactive scopes neither run nor receive queued actions.
    pub active: bool,
    /// Whether automatic-call arguments are clamped to byte range for
    /// legacy modules. Taken from the first module of the closure.
    pub clamp_call_spec: bool,

    pub(crate) module0: Option<Word>,
    pub(crate) modules: Vec<Word>,
    pub(crate) module_scopes: HashMap<Word, ModuleScope>,
    pub(crate) script_by_num: HashMap<Word, ScriptKey>,
    pub(crate) script_by_str: HashMap<StringIdx, ScriptKey>,
    pub(crate) script_threads: HashMap<ScriptKey, Rc<ThreadCell>>,
    pub(crate) threads: Vec<Rc<ThreadCell>>,
    pub(crate) actions: Vec<ScriptAction>,
}

impl MapScope {
    /// Creates an inactive map scope.
    pub fn new(id: ScopeId) -> Self {
        Self {
            id,
            active: false,
            clamp_call_spec: false,
            module0: None,
            modules: Vec::new(),
            module_scopes: HashMap::new(),
            script_by_num: HashMap::new(),
            script_by_str: HashMap::new(),
            script_threads: HashMap::new(),
            threads: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Links a set of root modules into this scope: closes over imports,
    /// builds the script lookup tables, and creates and initializes a
    /// storage scope per module, resolving storage imports against the
    /// exporting modules.
    ///
    /// The first root becomes the scope's first module.
    pub fn add_modules(&mut self, set: &ModuleSet, roots: &[Word]) {
        for &root in roots {
            if !self.modules.contains(&root) {
                self.modules.push(root);
            }
        }
        let mut i = 0;
        while i < self.modules.len() {
            let handle = self.modules[i];
            for &imp in &set.module(handle).imports {
                if !self.modules.contains(&imp) {
                    self.modules.push(imp);
                }
            }
            i += 1;
        }

        if self.module0.is_none() {
            self.module0 = self.modules.first().copied();
            if let Some(first) = self.module0 {
                self.clamp_call_spec = set.module(first).clamp_call_spec;
            }
        }

        for &handle in &self.modules {
            let module = set.module(handle);
            for (index, script) in module.scripts.iter().enumerate() {
                let key = (handle, index as Word);
                match script.name() {
                    ScriptName::Num(n) => {
                        self.script_by_num.entry(n).or_insert(key);
                    }
                    ScriptName::Str(s) => {
                        self.script_by_str.entry(s).or_insert(key);
                    }
                }
            }
            if !self.module_scopes.contains_key(&handle) {
                let mut scope = ModuleScope::new();
                scope.init(module);
                scope.resolve_imports(module, set);
                self.module_scopes.insert(handle, scope);
            }
        }
    }

    /// The script lookup entry for a name.
    pub fn find_script(&self, name: ScriptName) -> Option<ScriptKey> {
        match name {
            ScriptName::Num(n) => self.script_by_num.get(&n).copied(),
            ScriptName::Str(s) => self.script_by_str.get(&s).copied(),
        }
    }

    /// Whether the named script has a registered, not-yet-finished thread.
    pub fn script_active(&self, name: ScriptName) -> bool {
        self.find_script(name)
            .and_then(|key| self.script_threads.get(&key))
            .is_some_and(|cell| cell.state() != ThreadState::Inactive)
    }

    /// Stops the script's registered thread. Refused when there is none or
    /// it has already finished or been stopped.
    pub fn script_stop(&mut self, key: ScriptKey) -> bool {
        let Some(cell) = self.script_threads.get(&key) else {
            return false;
        };
        match cell.state() {
            ThreadState::Inactive | ThreadState::Stopped => false,
            _ => {
                cell.set_state(ThreadState::Stopped);
                self.script_threads.remove(&key);
                true
            }
        }
    }

    /// Pauses the script's registered thread. Refused when there is none
    /// or it is inactive, paused, or stopped.
    pub fn script_pause(&mut self, key: ScriptKey) -> bool {
        let Some(cell) = self.script_threads.get(&key) else {
            return false;
        };
        match cell.state() {
            ThreadState::Inactive | ThreadState::Paused | ThreadState::Stopped => false,
            _ => {
                cell.set_state(ThreadState::Paused);
                true
            }
        }
    }

    /// Resolves a word to a string-table index: handle words directly,
    /// other words through the first module's literal table. Unresolvable
    /// words land on the none string.
    pub fn string_idx(&self, set: &ModuleSet, word: Word) -> StringIdx {
        if word_is_string(word) {
            return decode_string(word);
        }
        match self.module0 {
            Some(handle) => set
                .module(handle)
                .strings
                .get(word as usize)
                .copied()
                .unwrap_or(StringIdx::MAX),
            None => StringIdx::MAX,
        }
    }

    /// The storage scope of a linked module.
    pub fn module_scope(&self, handle: Word) -> Option<&ModuleScope> {
        self.module_scopes.get(&handle)
    }

    /// Live threads, in execution order.
    pub fn threads(&self) -> &[Rc<ThreadCell>] {
        &self.threads
    }

    /// Module-class array `idx` as addressed by `module`, following the
    /// import indirection.
    pub fn mod_array(&self, module: Word, idx: Word) -> Option<&WordArray> {
        let (owner, slot) = self.mod_slot(module, idx, true);
        self.module_scopes.get(&owner).map(|s| &s.arrays[slot])
    }

    /// Mutable module-class array access.
    pub fn mod_array_mut(&mut self, module: Word, idx: Word) -> Option<&mut WordArray> {
        let (owner, slot) = self.mod_slot(module, idx, true);
        self.module_scopes.get_mut(&owner).map(|s| &mut s.arrays[slot])
    }

    /// Module-class register `idx` as addressed by `module`.
    pub fn mod_reg(&self, module: Word, idx: Word) -> Option<Word> {
        let (owner, slot) = self.mod_slot(module, idx, false);
        self.module_scopes.get(&owner).map(|s| s.regs[slot])
    }

    /// Mutable module-class register access.
    pub fn mod_reg_mut(&mut self, module: Word, idx: Word) -> Option<&mut Word> {
        let (owner, slot) = self.mod_slot(module, idx, false);
        self.module_scopes.get_mut(&owner).map(|s| &mut s.regs[slot])
    }

    fn mod_slot(&self, module: Word, idx: Word, arr: bool) -> (Word, usize) {
        let idx = idx as usize & 0xFF;
        let bound = self.module_scopes.get(&module).and_then(|scope| {
            if arr {
                scope.arr_binds[idx]
            } else {
                scope.reg_binds[idx]
            }
        });
        bound.unwrap_or((module, idx))
    }

    pub(crate) fn unlink(&mut self, cell: &Rc<ThreadCell>) {
        self.script_threads.retain(|_, t| !Rc::ptr_eq(t, cell));
        self.threads.retain(|t| !Rc::ptr_eq(t, cell));
    }
}

/// One module's storage within a map scope.
///
/// Array and register slots normally address the scope's own storage; a
/// slot the module imports is rebound to the exporting module's scope, so
/// both modules see one cell.
#[derive(Debug)]
pub struct ModuleScope {
    pub(crate) arrays: Vec<WordArray>,
    pub(crate) regs: Vec<Word>,
    arr_binds: Vec<Option<(Word, usize)>>,
    reg_binds: Vec<Option<(Word, usize)>>,
}

impl ModuleScope {
    pub(crate) fn new() -> Self {
        Self {
            arrays: fresh_arrays(),
            regs: vec![0; SCOPE_REG_COUNT],
            arr_binds: vec![None; SCOPE_ARR_COUNT],
            reg_binds: vec![None; SCOPE_REG_COUNT],
        }
    }

    /// Own register values, before indirection.
    pub fn regs(&self) -> &[Word] {
        &self.regs
    }

    /// Own arrays, before indirection.
    pub fn arrays(&self) -> &[WordArray] {
        &self.arrays
    }

    /// Applies the module's register and array initializers.
    fn init(&mut self, module: &Module) {
        for (i, init) in module.reg_inits.iter().enumerate().take(SCOPE_REG_COUNT) {
            self.regs[i] = init.resolve(module);
        }
        for (i, init) in module.arr_inits.iter().enumerate().take(SCOPE_ARR_COUNT) {
            for (cell, word) in init.vals().iter().enumerate() {
                self.arrays[i].set(cell as Word, word.resolve(module));
            }
        }
    }

    /// Rebinds imported storage slots to the exporting modules' scopes.
    /// Imports search the module's import table in order and take the
    /// first module exporting the name.
    fn resolve_imports(&mut self, module: &Module, set: &ModuleSet) {
        for (slot, name) in module.arr_imports.iter().enumerate().take(SCOPE_ARR_COUNT) {
            let Some(name) = *name else { continue };
            for &imp in &module.imports {
                let found = set
                    .module(imp)
                    .arr_names
                    .iter()
                    .position(|&n| n == Some(name));
                if let Some(idx) = found {
                    if idx < SCOPE_ARR_COUNT {
                        self.arr_binds[slot] = Some((imp, idx));
                    }
                    break;
                }
            }
        }
        for (slot, name) in module.reg_imports.iter().enumerate().take(SCOPE_REG_COUNT) {
            let Some(name) = *name else { continue };
            for &imp in &module.imports {
                let found = set
                    .module(imp)
                    .reg_names
                    .iter()
                    .position(|&n| n == Some(name));
                if let Some(idx) = found {
                    if idx < SCOPE_REG_COUNT {
                        self.reg_binds[slot] = Some((imp, idx));
                    }
                    break;
                }
            }
        }
    }
}
