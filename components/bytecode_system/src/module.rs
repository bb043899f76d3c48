//! Translated modules and the set that owns them.
//!
//! A [`Module`] is the loaded, translated form of one bytecode object:
//! its instruction stream, scripts, functions, string literals, and the
//! exported and imported storage names other modules link against.
//! [`ModuleSet`] is the cache keyed by [`ModuleName`] plus the shared
//! function arena that gives every named function a stable index.

use core_types::{encode_string, ModuleName, ScriptName, StringIdx, Word};

use std::collections::HashMap;

/// Script flag bit: the script is marked for network replication.
pub const SCRIPT_FLAG_NET: Word = 0x0001;
/// Script flag bit: the script is marked client-side.
pub const SCRIPT_FLAG_CLIENT: Word = 0x0002;

/// How an initializer word is interpreted when a scope is initialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitTag {
    /// Plain integer, used as-is.
    #[default]
    Integer,
    /// Index into the module's string-literal table.
    String,
    /// Index into the module's function list.
    Function,
}

/// One tagged initializer word for a module register or array cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordInit {
    /// Raw initializer value; meaning depends on the tag.
    pub val: Word,
    /// Interpretation of `val`.
    pub tag: InitTag,
}

impl WordInit {
    /// Resolves the initializer against its module: string indices become
    /// encoded string handles, function indices become arena handles.
    pub fn resolve(&self, module: &Module) -> Word {
        match self.tag {
            InitTag::Integer => self.val,
            InitTag::String => module
                .strings
                .get(self.val as usize)
                .map_or(0, |&idx| encode_string(idx)),
            InitTag::Function => module
                .functions
                .get(self.val as usize)
                .copied()
                .unwrap_or(0),
        }
    }
}

/// Initializer list for one module array.
///
/// Built sparsely during load, then trimmed so untouched trailing cells
/// cost nothing at scope initialization.
#[derive(Debug, Clone, Default)]
pub struct ArrayInit {
    vals: Vec<WordInit>,
}

impl ArrayInit {
    /// Sets the initializer for one cell, growing the list as needed.
    pub fn set(&mut self, idx: Word, init: WordInit) {
        let idx = idx as usize;
        if idx >= self.vals.len() {
            self.vals.resize(idx + 1, WordInit::default());
        }
        self.vals[idx] = init;
    }

    /// Tags one cell, growing the list as needed. A cell never given a
    /// value still resolves through its tag.
    pub fn set_tag(&mut self, idx: Word, tag: InitTag) {
        let idx = idx as usize;
        if idx >= self.vals.len() {
            self.vals.resize(idx + 1, WordInit::default());
        }
        self.vals[idx].tag = tag;
    }

    /// Drops trailing default entries left over from sparse construction.
    pub fn finish(&mut self) {
        while matches!(self.vals.last(), Some(init) if *init == WordInit::default()) {
            self.vals.pop();
        }
        self.vals.shrink_to_fit();
    }

    /// The initializer words, indexed from cell zero.
    pub fn vals(&self) -> &[WordInit] {
        &self.vals
    }
}

/// One script entry point.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Numeric name, sign-extended where the encoding stores fewer bits.
    pub name_int: Word,
    /// String name, when the script is named rather than numbered.
    pub name_str: Option<StringIdx>,
    /// Entry index into the translated instruction stream.
    pub code_idx: Word,
    /// Declared argument count.
    pub arg_count: Word,
    /// Host-interpreted script type.
    pub script_type: Word,
    /// Flag bits, [`SCRIPT_FLAG_NET`] and [`SCRIPT_FLAG_CLIENT`].
    pub flags: Word,
    /// Local registers to allocate for a thread running this script.
    pub loc_reg_count: Word,
    /// Local arrays to allocate for a thread running this script.
    pub loc_arr_count: Word,
}

impl Script {
    /// The name threads and lifecycle requests match against.
    pub fn name(&self) -> ScriptName {
        match self.name_str {
            Some(idx) => ScriptName::Str(idx),
            None => ScriptName::Num(self.name_int),
        }
    }
}

/// One callable function, owned by the shared arena.
#[derive(Debug, Clone)]
pub struct Function {
    /// Handle of the module whose instruction stream holds the body.
    pub module: Word,
    /// Entry index into that module's translated stream.
    pub code_idx: Word,
    /// Declared argument count.
    pub arg_count: Word,
    /// Local registers the call frame allocates.
    pub loc_reg_count: Word,
    /// Local arrays the call frame allocates.
    pub loc_arr_count: Word,
    /// Whether the function leaves a return value on the stack.
    pub has_return: bool,
}

/// Case table for one computed branch.
#[derive(Debug, Clone, Default)]
pub struct JumpMap {
    cases: HashMap<Word, Word>,
}

impl JumpMap {
    /// Adds a case. Later entries for the same value win, matching the
    /// table order in the source stream.
    pub fn add(&mut self, value: Word, code_idx: Word) {
        self.cases.insert(value, code_idx);
    }

    /// The branch target for `value`, when a case matches.
    pub fn find(&self, value: Word) -> Option<Word> {
        self.cases.get(&value).copied()
    }

    /// Mutable access for post-trace target translation.
    pub fn cases_mut(&mut self) -> impl Iterator<Item = &mut Word> {
        self.cases.values_mut()
    }
}

/// One loaded module.
///
/// All cross-references are indices: `functions` holds arena handles,
/// `imports` holds module handles, and `strings` holds interned handles
/// into the shared string table. A module that failed to load is left in
/// its default empty state with `loaded` false.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Identity under which the module was requested.
    pub name: ModuleName,
    /// True once a load completed. Never set on a partial load.
    pub loaded: bool,
    /// True for modules read from the legacy encoding without an
    /// extended directory.
    pub is_legacy: bool,
    /// True when automatic-call arguments are clamped to the declared
    /// count, set for legacy modules and compatibility extended modules.
    pub clamp_call_spec: bool,

    /// Translated instruction stream.
    pub codes: Vec<Word>,
    /// Function arena handles by module function index; zero means none.
    pub functions: Vec<Word>,
    /// Function names parallel to `functions`, used to resolve imports.
    pub func_names: Vec<Option<StringIdx>>,
    /// Translated entry indices for the address constant table.
    pub jumps: Vec<Word>,
    /// Case tables for computed branches.
    pub jump_maps: Vec<JumpMap>,
    /// Script entry points.
    pub scripts: Vec<Script>,
    /// Exported script names, referenced by named script entries.
    pub script_names: Vec<StringIdx>,
    /// String literals, already interned into the shared table.
    pub strings: Vec<StringIdx>,

    /// Module register initializers.
    pub reg_inits: Vec<WordInit>,
    /// Exported register names.
    pub reg_names: Vec<Option<StringIdx>>,
    /// Names of registers imported from other modules.
    pub reg_imports: Vec<Option<StringIdx>>,
    /// Module array initializers, parallel to `arr_sizes`.
    pub arr_inits: Vec<ArrayInit>,
    /// Declared module array sizes.
    pub arr_sizes: Vec<Word>,
    /// Exported array names.
    pub arr_names: Vec<Option<StringIdx>>,
    /// Names of arrays imported from other modules.
    pub arr_imports: Vec<Option<StringIdx>>,

    /// Handles of modules named by the import table, in table order.
    pub imports: Vec<Word>,
}

impl Module {
    /// Finds an own-module script by name.
    pub fn find_script(&self, name: ScriptName) -> Option<&Script> {
        self.scripts.iter().find(|s| s.name() == name)
    }

    /// Finds an own-module function handle by name.
    pub fn find_function(&self, name: StringIdx) -> Option<Word> {
        self.func_names
            .iter()
            .position(|&n| n == Some(name))
            .and_then(|i| self.functions.get(i))
            .copied()
            .filter(|&handle| handle != 0)
    }
}

/// The module cache and shared function arena.
///
/// Modules are created empty on first request and filled in by the
/// loader; requesting the same [`ModuleName`] again returns the same
/// handle. Named functions get arena indices keyed by defining module
/// and function name, so the same function resolves to the same index
/// in every session that loads the same modules.
#[derive(Debug, Default)]
pub struct ModuleSet {
    modules: Vec<Module>,
    by_name: HashMap<ModuleName, Word>,

    // Slot zero stays empty so handle zero always means no function.
    funcs: Vec<Option<Function>>,
    func_by_name: HashMap<(String, Vec<u8>), Word>,
}

impl ModuleSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            by_name: HashMap::new(),
            funcs: vec![None],
            func_by_name: HashMap::new(),
        }
    }

    /// Handle for a module identity, creating an empty slot on first use.
    pub fn add_module(&mut self, name: &ModuleName) -> Word {
        if let Some(&handle) = self.by_name.get(name) {
            return handle;
        }
        let handle = self.modules.len() as Word;
        self.modules.push(Module { name: name.clone(), ..Module::default() });
        self.by_name.insert(name.clone(), handle);
        handle
    }

    /// Handle for an already-known module identity.
    pub fn find_module(&self, name: &ModuleName) -> Option<Word> {
        self.by_name.get(name).copied()
    }

    /// The module behind a handle.
    pub fn module(&self, handle: Word) -> &Module {
        &self.modules[handle as usize]
    }

    /// Mutable module access.
    pub fn module_mut(&mut self, handle: Word) -> &mut Module {
        &mut self.modules[handle as usize]
    }

    /// Number of module slots.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Takes a module out of its slot for loading, leaving an empty
    /// placeholder so recursive loads can still index the set.
    pub fn take_module(&mut self, handle: Word) -> Module {
        std::mem::take(&mut self.modules[handle as usize])
    }

    /// Returns a taken module to its slot.
    pub fn put_module(&mut self, handle: Word, module: Module) {
        self.modules[handle as usize] = module;
    }

    /// Drops a failed module's cache entry so a later request retries the
    /// load instead of seeing a permanently empty module.
    pub fn forget_module(&mut self, name: &ModuleName) {
        if let Some(handle) = self.by_name.remove(name) {
            self.modules[handle as usize] = Module::default();
        }
    }

    /// Arena handle for a function defined in `module_name`.
    ///
    /// Named functions are deduplicated by (module name, function name)
    /// and keep their index for the life of the set. Unnamed functions
    /// get a fresh slot each time.
    pub fn get_function(
        &mut self,
        module_name: &ModuleName,
        func_name: Option<&[u8]>,
    ) -> Word {
        if let Some(name) = func_name {
            let key = (module_name.name.clone(), name.to_vec());
            if let Some(&handle) = self.func_by_name.get(&key) {
                return handle;
            }
            let handle = self.funcs.len() as Word;
            self.funcs.push(None);
            self.func_by_name.insert(key, handle);
            handle
        } else {
            let handle = self.funcs.len() as Word;
            self.funcs.push(None);
            handle
        }
    }

    /// Fills in a function slot once its body has been translated.
    pub fn set_function(&mut self, handle: Word, func: Function) {
        self.funcs[handle as usize] = Some(func);
    }

    /// The function behind a handle, when the handle is live.
    pub fn function(&self, handle: Word) -> Option<&Function> {
        self.funcs.get(handle as usize).and_then(Option::as_ref)
    }

    /// Mutable function access, used to translate entry indices.
    pub fn function_mut(&mut self, handle: Word) -> Option<&mut Function> {
        self.funcs.get_mut(handle as usize).and_then(Option::as_mut)
    }

    /// Number of function arena slots, including the reserved zero slot.
    pub fn function_count(&self) -> usize {
        self.funcs.len()
    }

    /// Pre-seeds a named function index, used when restoring persisted
    /// state so reloaded modules land on their saved indices.
    pub fn seed_function(&mut self, module_name: &str, func_name: &[u8], handle: Word) {
        if self.funcs.len() <= handle as usize {
            self.funcs.resize(handle as usize + 1, None);
        }
        self.func_by_name
            .insert((module_name.to_string(), func_name.to_vec()), handle);
    }

    /// The named-function index entries, for persistence.
    pub fn named_functions(&self) -> impl Iterator<Item = (&str, &[u8], Word)> {
        self.func_by_name
            .iter()
            .map(|((module, name), &handle)| (module.as_str(), name.as_slice(), handle))
    }

    /// Discards every module and function. Scope storage referencing old
    /// handles must be torn down first.
    pub fn clear(&mut self) {
        self.modules.clear();
        self.by_name.clear();
        self.funcs.clear();
        self.funcs.push(None);
        self.func_by_name.clear();
    }
}
