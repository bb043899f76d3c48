//! Whole-environment persistence.
//!
//! The stream holds the string table, the named-function index, the
//! scope tree with every module scope and thread, and the deferred
//! action queue. Module code is not stored; the restore reloads every
//! module by name through the host and relies on translation being
//! deterministic, so saved code indices stay valid. String handles are
//! preserved exactly, which keeps handle words in saved storage
//! meaningful.
//!
//! A restore tears the environment down first and is never partially
//! applied on top of live state.

use crate::action::ScriptAction;
use crate::environment::{Environment, HostContext};
use crate::scope::{GlobalScope, HubScope, MapScope, ModuleScope};
use crate::thread::{CallFrame, ThreadCell, ThreadState};

use core_types::{Loader, ModuleName, Saver, ScopeId, SerialError, Signature, Word};

use std::io::{Read, Write};
use std::rc::Rc;

/// Leading tag of a persisted-state stream.
pub const STATE_TAG: &[u8; 6] = b"KARST\0";
/// Stream layout version written by this build.
pub const STATE_VERSION: Word = 1;

impl Environment {
    /// Writes the complete persisted state. With `signatures` set, the
    /// stream carries structural signatures a restore validates, at a
    /// small size cost.
    pub fn save_state(
        &self,
        out: &mut dyn Write,
        signatures: bool,
    ) -> Result<(), SerialError> {
        let mut out = Saver::new(out, signatures);
        out.put_raw(STATE_TAG)?;
        out.put_word(STATE_VERSION)?;
        out.put_word(Word::from(signatures))?;
        out.sign(Signature::Environment)?;

        self.strings.save_state(&mut out)?;

        let named: Vec<_> = self.modules.named_functions().collect();
        out.put_vln(named.len() as u64)?;
        for (module, name, handle) in named {
            out.put_blob(module.as_bytes())?;
            out.put_blob(name)?;
            out.put_word(handle)?;
        }

        let globals = self.globals();
        out.put_vln(globals.len() as u64)?;
        for (id, global) in globals {
            out.put_word(*id)?;
            save_global(&mut out, global, self)?;
        }

        out.put_vln(self.defers.len() as u64)?;
        for action in &self.defers {
            action.save_state(&mut out)?;
        }
        out.sign_end(Signature::Environment)
    }

    /// Replaces the environment's state from a saved stream, reloading
    /// every referenced module through `host`. Existing scopes, threads,
    /// modules, and strings are discarded first.
    pub fn load_state(
        &mut self,
        inp: &mut dyn Read,
        host: &mut dyn HostContext,
    ) -> Result<(), SerialError> {
        let (version, signatures) = {
            let mut head = Loader::new(&mut *inp, false);
            let mut tag = [0u8; 6];
            head.get_raw(&mut tag)?;
            if &tag != STATE_TAG {
                return Err(SerialError::BadTag);
            }
            let version = head.get_word()?;
            let flags = head.get_word()?;
            (version, flags & 1 != 0)
        };
        if version != STATE_VERSION {
            return Err(SerialError::BadVersion(version));
        }

        let mut inp = Loader::new(inp, signatures);
        inp.expect(Signature::Environment)?;

        self.teardown();
        self.strings.load_state(&mut inp)?;

        let count = inp.get_vln()? as usize;
        for _ in 0..count {
            let module = inp.get_blob()?;
            let module = String::from_utf8(module)
                .map_err(|_| SerialError::Corrupt("function index module name"))?;
            let name = inp.get_blob()?;
            let handle = inp.get_word()?;
            self.modules.seed_function(&module, &name, handle);
        }

        let count = inp.get_vln()? as usize;
        for _ in 0..count {
            let id = inp.get_word()?;
            let global = load_global(&mut inp, self, host, id)?;
            self.globals_mut().insert(id, global);
        }

        let count = inp.get_vln()? as usize;
        let mut defers = Vec::with_capacity(count);
        for _ in 0..count {
            defers.push(ScriptAction::load_state(&mut inp)?);
        }
        self.defers = defers;

        inp.expect_end(Signature::Environment)
    }
}

fn put_module_name(out: &mut Saver, name: &ModuleName) -> Result<(), SerialError> {
    out.put_blob(name.name.as_bytes())?;
    out.put_word(name.number)
}

fn get_module_name(inp: &mut Loader) -> Result<ModuleName, SerialError> {
    let raw = inp.get_blob()?;
    let name = String::from_utf8(raw).map_err(|_| SerialError::Corrupt("module name"))?;
    let number = inp.get_word()?;
    Ok(ModuleName { name, number })
}

fn resolve_module(inp: &mut Loader, env: &Environment) -> Result<Word, SerialError> {
    let name = get_module_name(inp)?;
    env.modules
        .find_module(&name)
        .ok_or(SerialError::Corrupt("module reference"))
}

fn save_actions(out: &mut Saver, actions: &[ScriptAction]) -> Result<(), SerialError> {
    out.put_vln(actions.len() as u64)?;
    for action in actions {
        action.save_state(out)?;
    }
    Ok(())
}

fn load_actions(inp: &mut Loader) -> Result<Vec<ScriptAction>, SerialError> {
    let count = inp.get_vln()? as usize;
    let mut actions = Vec::with_capacity(count);
    for _ in 0..count {
        actions.push(ScriptAction::load_state(inp)?);
    }
    Ok(actions)
}

fn save_global(
    out: &mut Saver,
    global: &GlobalScope,
    env: &Environment,
) -> Result<(), SerialError> {
    out.sign(Signature::GlobalScope)?;
    for arr in &global.arrays {
        arr.save_state(out)?;
    }
    for &reg in &global.regs {
        out.put_word(reg)?;
    }
    save_actions(out, &global.actions)?;
    out.put_byte(u8::from(global.active))?;
    out.put_vln(global.hubs.len() as u64)?;
    for (id, hub) in &global.hubs {
        out.put_word(*id)?;
        save_hub(out, hub, env)?;
    }
    out.sign_end(Signature::GlobalScope)
}

fn load_global(
    inp: &mut Loader,
    env: &mut Environment,
    host: &mut dyn HostContext,
    id: Word,
) -> Result<GlobalScope, SerialError> {
    inp.expect(Signature::GlobalScope)?;
    let mut global = GlobalScope::new(id);
    for arr in &mut global.arrays {
        arr.load_state(inp)?;
    }
    for reg in &mut global.regs {
        *reg = inp.get_word()?;
    }
    global.actions = load_actions(inp)?;
    global.active = inp.get_byte()? != 0;
    let count = inp.get_vln()? as usize;
    for _ in 0..count {
        let hub_id = inp.get_word()?;
        let hub = load_hub(inp, env, host, id, hub_id)?;
        global.hubs.insert(hub_id, hub);
    }
    inp.expect_end(Signature::GlobalScope)?;
    Ok(global)
}

fn save_hub(out: &mut Saver, hub: &HubScope, env: &Environment) -> Result<(), SerialError> {
    out.sign(Signature::HubScope)?;
    for arr in &hub.arrays {
        arr.save_state(out)?;
    }
    for &reg in &hub.regs {
        out.put_word(reg)?;
    }
    save_actions(out, &hub.actions)?;
    out.put_byte(u8::from(hub.active))?;
    out.put_vln(hub.maps.len() as u64)?;
    for (id, map) in &hub.maps {
        out.put_word(*id)?;
        save_map(out, map, env)?;
    }
    out.sign_end(Signature::HubScope)
}

fn load_hub(
    inp: &mut Loader,
    env: &mut Environment,
    host: &mut dyn HostContext,
    global: Word,
    id: Word,
) -> Result<HubScope, SerialError> {
    inp.expect(Signature::HubScope)?;
    let mut hub = HubScope::new(global, id);
    for arr in &mut hub.arrays {
        arr.load_state(inp)?;
    }
    for reg in &mut hub.regs {
        *reg = inp.get_word()?;
    }
    hub.actions = load_actions(inp)?;
    hub.active = inp.get_byte()? != 0;
    let count = inp.get_vln()? as usize;
    for _ in 0..count {
        let map_id = inp.get_word()?;
        let map = load_map(inp, env, host, ScopeId::new(global, id, map_id))?;
        hub.maps.insert(map_id, map);
    }
    inp.expect_end(Signature::HubScope)?;
    Ok(hub)
}

fn save_map(out: &mut Saver, map: &MapScope, env: &Environment) -> Result<(), SerialError> {
    out.sign(Signature::MapScope)?;
    save_actions(out, &map.actions)?;
    out.put_byte(u8::from(map.active))?;

    out.put_vln(map.modules.len() as u64)?;
    for &handle in &map.modules {
        put_module_name(out, &env.modules.module(handle).name)?;
    }
    for &handle in &map.modules {
        let scope = map
            .module_scopes
            .get(&handle)
            .ok_or(SerialError::Corrupt("module scope missing"))?;
        save_module_scope(out, scope)?;
    }

    let threads = map.threads();
    out.put_vln(threads.len() as u64)?;
    for cell in threads {
        save_thread(out, cell, env)?;
        let registered = map
            .script_threads
            .get(&cell.body().script)
            .is_some_and(|t| Rc::ptr_eq(t, cell));
        out.put_byte(u8::from(registered))?;
    }
    out.sign_end(Signature::MapScope)
}

fn load_map(
    inp: &mut Loader,
    env: &mut Environment,
    host: &mut dyn HostContext,
    id: ScopeId,
) -> Result<MapScope, SerialError> {
    inp.expect(Signature::MapScope)?;
    let mut map = MapScope::new(id);
    map.actions = load_actions(inp)?;
    map.active = inp.get_byte()? != 0;

    // Reloading the saved closure in saved order reproduces the original
    // module list, so handles embedded in thread and scope state line up.
    let count = inp.get_vln()? as usize;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(get_module_name(inp)?);
    }
    let mut handles = Vec::with_capacity(count);
    for name in &names {
        handles.push(env.load_module(host, name)?);
    }
    map.add_modules(&env.modules, &handles);
    for &handle in &handles {
        let scope = map
            .module_scopes
            .get_mut(&handle)
            .ok_or(SerialError::Corrupt("module scope missing"))?;
        load_module_scope(inp, scope)?;
    }

    let count = inp.get_vln()? as usize;
    for _ in 0..count {
        let cell = env.get_free_thread();
        load_thread(inp, &cell, env)?;
        if inp.get_byte()? != 0 {
            let key = cell.body().script;
            map.script_threads.insert(key, Rc::clone(&cell));
        }
        map.threads.push(cell);
    }
    inp.expect_end(Signature::MapScope)?;
    Ok(map)
}

fn save_module_scope(out: &mut Saver, scope: &ModuleScope) -> Result<(), SerialError> {
    out.sign(Signature::ModuleScope)?;
    for arr in scope.arrays() {
        arr.save_state(out)?;
    }
    for &reg in scope.regs() {
        out.put_word(reg)?;
    }
    out.sign_end(Signature::ModuleScope)
}

fn load_module_scope(inp: &mut Loader, scope: &mut ModuleScope) -> Result<(), SerialError> {
    inp.expect(Signature::ModuleScope)?;
    for arr in &mut scope.arrays {
        arr.load_state(inp)?;
    }
    for reg in &mut scope.regs {
        *reg = inp.get_word()?;
    }
    inp.expect_end(Signature::ModuleScope)
}

fn save_thread(out: &mut Saver, cell: &ThreadCell, env: &Environment) -> Result<(), SerialError> {
    out.sign(Signature::Thread)?;
    let body = cell.body();
    put_module_name(out, &env.modules.module(body.module).name)?;
    put_module_name(out, &env.modules.module(body.scope_mod).name)?;
    out.put_word(body.code_ptr)?;
    out.put_word(body.scope.global)?;
    out.put_word(body.scope.hub)?;
    out.put_word(body.scope.map)?;
    put_module_name(out, &env.modules.module(body.script.0).name)?;
    out.put_word(body.script.1)?;
    out.put_word(body.delay)?;
    out.put_word(body.result)?;

    out.put_vln(body.call_stack.len() as u64)?;
    for frame in &body.call_stack {
        put_module_name(out, &env.modules.module(frame.module).name)?;
        out.put_word(frame.code_ptr)?;
        out.put_word(frame.loc_arr_count)?;
        out.put_word(frame.loc_reg_count)?;
    }

    out.put_vln(body.data_stack.len() as u64)?;
    for &word in &body.data_stack {
        out.put_word(word)?;
    }

    out.put_vln(body.local_arrs.size_full() as u64)?;
    out.put_vln(body.local_arrs.size() as u64)?;
    for arr in body.local_arrs.iter_full() {
        arr.save_state(out)?;
    }
    out.put_vln(body.local_regs.size_full() as u64)?;
    out.put_vln(body.local_regs.size() as u64)?;
    for &word in body.local_regs.iter_full() {
        out.put_word(word)?;
    }

    body.print_buf.save_state(out)?;

    let (kind, data, tag_type) = cell.state().to_words();
    out.put_word(kind)?;
    out.put_word(data)?;
    out.put_word(tag_type)?;
    out.sign_end(Signature::Thread)
}

fn load_thread(inp: &mut Loader, cell: &ThreadCell, env: &Environment) -> Result<(), SerialError> {
    inp.expect(Signature::Thread)?;
    let module = resolve_module(inp, env)?;
    let scope_mod = resolve_module(inp, env)?;
    let code_ptr = inp.get_word()?;
    let scope = ScopeId::new(inp.get_word()?, inp.get_word()?, inp.get_word()?);
    let script_mod = resolve_module(inp, env)?;
    let script_idx = inp.get_word()?;
    let delay = inp.get_word()?;
    let result = inp.get_word()?;

    let mut body = cell.body_mut();
    body.reset();
    body.module = module;
    body.scope_mod = scope_mod;
    body.code_ptr = code_ptr;
    body.scope = scope;
    body.script = (script_mod, script_idx);
    body.delay = delay;
    body.result = result;

    let frames = inp.get_vln()? as usize;
    for _ in 0..frames {
        let frame_mod = resolve_module(inp, env)?;
        let frame_ptr = inp.get_word()?;
        let loc_arr_count = inp.get_word()?;
        let loc_reg_count = inp.get_word()?;
        body.call_stack.push(CallFrame {
            code_ptr: frame_ptr,
            module: frame_mod,
            scope_mod: frame_mod,
            loc_arr_count,
            loc_reg_count,
        });
    }

    let depth = inp.get_vln()? as usize;
    for _ in 0..depth {
        let word = inp.get_word()?;
        body.push(word);
    }

    let full = inp.get_vln()? as usize;
    let active = inp.get_vln()? as usize;
    body.local_arrs.alloc_load(full, active);
    for arr in body.local_arrs.iter_full_mut() {
        arr.load_state(inp)?;
    }
    let full = inp.get_vln()? as usize;
    let active = inp.get_vln()? as usize;
    body.local_regs.alloc_load(full, active);
    for reg in body.local_regs.iter_full_mut() {
        *reg = inp.get_word()?;
    }

    body.print_buf.load_state(inp)?;

    let kind = inp.get_word()?;
    let data = inp.get_word()?;
    let tag_type = inp.get_word()?;
    let state = ThreadState::from_words(kind, data, tag_type)?;
    drop(body);
    cell.set_state(state);
    inp.expect_end(Signature::Thread)
}
