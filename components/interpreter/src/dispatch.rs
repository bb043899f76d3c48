//! The instruction dispatch loop and script lifecycle operations.
//!
//! [`Vm`] bundles every mutable borrow one executing map scope needs:
//! the environment, the host hooks, the enclosing global and hub storage,
//! and the map itself. One instance lives for one map's turn within a
//! tick; every instruction and native runs against it.

use crate::action::{ActionKind, ScriptAction};
use crate::environment::{Environment, HostContext};
use crate::scope::{MapScope, ScriptKey};
use crate::thread::{
    CallFrame, Thread, ThreadCell, ThreadState, CALL_STACK_RESERVE, DATA_STACK_RESERVE,
};

use bytecode_system::Code;
use core_types::{div_fixed, encode_string, mul_fixed, KillType, SWord, ScriptName, Word};
use memory_manager::WordArray;

use std::rc::Rc;

/// Execution context for one map scope's turn.
pub struct Vm<'a> {
    /// The environment, with its global-scope tree taken out for the tick.
    pub env: &'a mut Environment,
    /// Host hooks.
    pub host: &'a mut dyn HostContext,
    /// Enclosing global scope's arrays.
    pub gbl_arrays: &'a mut [WordArray],
    /// Enclosing global scope's registers.
    pub gbl_regs: &'a mut [Word],
    /// Enclosing hub scope's arrays.
    pub hub_arrays: &'a mut [WordArray],
    /// Enclosing hub scope's registers.
    pub hub_regs: &'a mut [Word],
    /// The executing map scope.
    pub map: &'a mut MapScope,
}

/// Storage class addressed by an instruction or native.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Place {
    Gbl,
    Hub,
    Loc,
    Mod,
}

enum Exit {
    Done,
    Recheck,
}

/// Runs one map scope for a tick: delivers queued actions, then gives
/// every live thread an execution turn in list order. Finished threads
/// are unlinked and recycled.
pub(crate) fn run_map(vm: &mut Vm<'_>) {
    for action in std::mem::take(&mut vm.map.actions) {
        perform_action(vm, action);
    }

    let mut i = 0;
    while i < vm.map.threads.len() {
        let cell = Rc::clone(&vm.map.threads[i]);
        exec_thread(vm, &cell);
        if cell.state() == ThreadState::Inactive {
            vm.map.unlink(&cell);
            vm.env.recycle_thread(cell);
        } else {
            i += 1;
        }
    }
}

pub(crate) fn perform_action(vm: &mut Vm<'_>, action: ScriptAction) {
    match action.kind {
        ActionKind::StartType(t) => {
            script_start_type(vm, t, &action.args, false);
        }
        ActionKind::StartTypeForced(t) => {
            script_start_type(vm, t, &action.args, true);
        }
        kind => {
            // A request naming an unknown script is dropped.
            let Some(key) = vm.map.find_script(action.name) else {
                return;
            };
            match kind {
                ActionKind::Start => {
                    script_start(vm, key, &action.args);
                }
                ActionKind::StartForced => {
                    script_start_forced(vm, key, &action.args);
                }
                ActionKind::Stop => {
                    vm.map.script_stop(key);
                }
                ActionKind::Pause => {
                    vm.map.script_pause(key);
                }
                ActionKind::StartType(_) | ActionKind::StartTypeForced(_) => {}
            }
        }
    }
}

/// Starts the script unless its registered thread is live: a paused one
/// resumes, a running one refuses the start.
pub(crate) fn script_start(vm: &mut Vm<'_>, key: ScriptKey, args: &[Word]) -> bool {
    if let Some(cell) = vm.map.script_threads.get(&key) {
        return match cell.state() {
            ThreadState::Paused => {
                cell.set_state(ThreadState::Running);
                true
            }
            _ => false,
        };
    }
    let cell = vm.env.get_free_thread();
    thread_start(vm, &cell, key, args);
    vm.map.script_threads.insert(key, Rc::clone(&cell));
    vm.map.threads.push(cell);
    true
}

/// Starts a fresh thread regardless of any registered one. The new thread
/// is never registered in the lookup table.
pub(crate) fn script_start_forced(vm: &mut Vm<'_>, key: ScriptKey, args: &[Word]) -> bool {
    let cell = vm.env.get_free_thread();
    thread_start(vm, &cell, key, args);
    vm.map.threads.push(cell);
    true
}

/// Starts a fresh thread and runs it to completion or suspension inline,
/// returning its result word.
pub(crate) fn script_start_result(vm: &mut Vm<'_>, key: ScriptKey, args: &[Word]) -> Word {
    let cell = vm.env.get_free_thread();
    thread_start(vm, &cell, key, args);
    vm.map.threads.push(Rc::clone(&cell));
    exec_thread(vm, &cell);
    let result = cell.body().result;
    if cell.state() == ThreadState::Inactive {
        vm.map.unlink(&cell);
        vm.env.recycle_thread(cell);
    }
    result
}

/// Starts every script of the given type, returning how many started.
pub(crate) fn script_start_type(
    vm: &mut Vm<'_>,
    script_type: Word,
    args: &[Word],
    forced: bool,
) -> Word {
    let mut keys = Vec::new();
    for &handle in &vm.map.modules {
        for (index, script) in vm.env.modules.module(handle).scripts.iter().enumerate() {
            if script.script_type == script_type {
                keys.push((handle, index as Word));
            }
        }
    }
    let mut count = 0;
    for key in keys {
        let started = if forced {
            script_start_forced(vm, key, args)
        } else {
            script_start(vm, key, args)
        };
        count += Word::from(started);
    }
    count
}

fn thread_start(vm: &mut Vm<'_>, cell: &Rc<ThreadCell>, key: ScriptKey, args: &[Word]) {
    let Some(script) = vm.env.modules.module(key.0).scripts.get(key.1 as usize) else {
        cell.set_state(ThreadState::Inactive);
        return;
    };
    let (code_idx, arg_count, loc_regs, loc_arrs) = (
        script.code_idx,
        script.arg_count,
        script.loc_reg_count,
        script.loc_arr_count,
    );

    let mut body = cell.body_mut();
    body.reset();
    body.module = key.0;
    body.scope_mod = key.0;
    body.code_ptr = code_idx;
    body.scope = vm.map.id;
    body.script = key;
    body.delay = 0;
    body.result = 0;
    body.call_stack.reserve(CALL_STACK_RESERVE);
    body.data_stack.reserve(DATA_STACK_RESERVE);
    body.local_arrs.alloc(loc_arrs as usize);
    body.local_regs.alloc(loc_regs as usize);
    for (i, &arg) in args.iter().take(arg_count as usize).enumerate() {
        if let Some(reg) = body.local_regs.get_mut(i as Word) {
            *reg = arg;
        }
    }
    drop(body);
    cell.set_state(ThreadState::Running);
}

/// Gives one thread its execution turn: the delay gate, then the state
/// machine, re-entered after every interrupting instruction.
pub(crate) fn exec_thread(vm: &mut Vm<'_>, cell: &Rc<ThreadCell>) {
    {
        let mut body = cell.body_mut();
        if body.delay != 0 {
            body.delay -= 1;
            if body.delay != 0 {
                return;
            }
        }
    }

    let mut branches = vm.env.branch_limit;
    loop {
        match cell.state() {
            ThreadState::Inactive => return,
            ThreadState::Stopped => {
                cell.retire();
                return;
            }
            ThreadState::Paused => return,
            ThreadState::Running => {
                if cell.body().delay != 0 {
                    return;
                }
                match run_slice(vm, cell, &mut branches) {
                    Exit::Done => return,
                    Exit::Recheck => {}
                }
            }
            ThreadState::WaitScrNum(num) => {
                if vm.map.script_active(ScriptName::Num(num)) {
                    return;
                }
                cell.set_state(ThreadState::Running);
            }
            ThreadState::WaitScrStr(word) => {
                let idx = vm.map.string_idx(&vm.env.modules, word);
                if vm.map.script_active(ScriptName::Str(idx)) {
                    return;
                }
                cell.set_state(ThreadState::Running);
            }
            ThreadState::WaitTag { tag_type, tag } => {
                if !vm.host.is_tag_satisfied(tag_type, tag) {
                    return;
                }
                cell.set_state(ThreadState::Running);
            }
        }
    }
}

fn fetch(vm: &Vm<'_>, body: &mut Thread) -> Option<Word> {
    let word = vm
        .env
        .modules
        .module(body.module)
        .codes
        .get(body.code_ptr as usize)
        .copied()?;
    body.code_ptr += 1;
    Some(word)
}

fn kill(vm: &mut Vm<'_>, cell: &ThreadCell, body: &mut Thread, kind: KillType, data: Word) -> Exit {
    vm.host.report_fault(kind, data, body.code_ptr);
    body.reset();
    cell.set_state(ThreadState::Inactive);
    Exit::Done
}

fn stop(cell: &ThreadCell, body: &mut Thread) -> Exit {
    body.reset();
    cell.set_state(ThreadState::Inactive);
    Exit::Done
}

/// Repositions the thread, charging the branch budget. A budget of zero
/// is unlimited; exhausting a nonzero budget kills the thread.
fn branch_to(
    vm: &mut Vm<'_>,
    cell: &ThreadCell,
    body: &mut Thread,
    branches: &mut Word,
    target: Word,
) -> bool {
    body.code_ptr = target;
    if vm.env.branch_limit != 0 {
        *branches -= 1;
        if *branches == 0 {
            kill(vm, cell, body, KillType::BranchLimit, 0);
            return false;
        }
    }
    true
}

type BinFn = fn(Word, Word) -> Word;

fn op_add(l: Word, r: Word) -> Word {
    l.wrapping_add(r)
}
fn op_and(l: Word, r: Word) -> Word {
    l & r
}
fn op_div(l: Word, r: Word) -> Word {
    if r == 0 {
        0
    } else {
        (l as SWord).wrapping_div(r as SWord) as Word
    }
}
fn op_mod(l: Word, r: Word) -> Word {
    if r == 0 {
        0
    } else {
        (l as SWord).wrapping_rem(r as SWord) as Word
    }
}
fn op_mul(l: Word, r: Word) -> Word {
    l.wrapping_mul(r)
}
fn op_or(l: Word, r: Word) -> Word {
    l | r
}
fn op_xor(l: Word, r: Word) -> Word {
    l ^ r
}
fn op_shl(l: Word, r: Word) -> Word {
    l << (r & 31)
}
fn op_shr(l: Word, r: Word) -> Word {
    ((l as SWord) >> (r & 31)) as Word
}
fn op_sub(l: Word, r: Word) -> Word {
    l.wrapping_sub(r)
}

/// Decodes a read-modify-write arithmetic opcode into its operator and
/// its offset within the family block: 0 is the plain stack form, 1
/// through 8 the fused forms in storage-class order.
fn bin_family(code: Code) -> Option<(BinFn, Word)> {
    const BASES: &[(Code, BinFn)] = &[
        (Code::AddU, op_add),
        (Code::AndU, op_and),
        (Code::DivI, op_div),
        (Code::ModI, op_mod),
        (Code::MulU, op_mul),
        (Code::OrIU, op_or),
        (Code::OrXU, op_xor),
        (Code::ShLU, op_shl),
        (Code::ShRI, op_shr),
        (Code::SubU, op_sub),
    ];
    let disc = code.to_word();
    for &(base, f) in BASES {
        let at = base.to_word();
        if disc >= at && disc <= at + 8 {
            return Some((f, disc - at));
        }
    }
    None
}

/// Decodes an increment or decrement opcode into its step function and
/// storage-class offset 0 through 7.
fn step_family(code: Code) -> Option<(fn(Word) -> Word, Word)> {
    let disc = code.to_word();
    let dec = Code::DecUGblArr.to_word();
    if disc >= dec && disc <= dec + 7 {
        return Some((|w| w.wrapping_sub(1), disc - dec));
    }
    let inc = Code::IncUGblArr.to_word();
    if disc >= inc && disc <= inc + 7 {
        return Some((|w| w.wrapping_add(1), disc - inc));
    }
    None
}

fn place_of(offset: Word) -> (Place, bool) {
    match offset {
        0 => (Place::Gbl, true),
        1 => (Place::Gbl, false),
        2 => (Place::Hub, true),
        3 => (Place::Hub, false),
        4 => (Place::Loc, true),
        5 => (Place::Loc, false),
        6 => (Place::Mod, true),
        _ => (Place::Mod, false),
    }
}

/// Runs `f` against the addressed array. Local and module addresses can
/// miss; a miss skips the access.
pub(crate) fn with_arr<R>(
    vm: &mut Vm<'_>,
    body: &mut Thread,
    place: Place,
    arr: Word,
    f: impl FnOnce(&mut WordArray) -> R,
) -> Option<R> {
    match place {
        Place::Gbl => vm.gbl_arrays.get_mut(arr as usize & 0xFF).map(f),
        Place::Hub => vm.hub_arrays.get_mut(arr as usize & 0xFF).map(f),
        Place::Loc => body.local_arrs.get_mut(arr).map(f),
        Place::Mod => vm.map.mod_array_mut(body.scope_mod, arr).map(f),
    }
}

fn with_reg<R>(
    vm: &mut Vm<'_>,
    body: &mut Thread,
    place: Place,
    idx: Word,
    f: impl FnOnce(&mut Word) -> R,
) -> Option<R> {
    match place {
        Place::Gbl => vm.gbl_regs.get_mut(idx as usize & 0xFF).map(f),
        Place::Hub => vm.hub_regs.get_mut(idx as usize & 0xFF).map(f),
        Place::Loc => body.local_regs.get_mut(idx).map(f),
        Place::Mod => vm.map.mod_reg_mut(body.scope_mod, idx).map(f),
    }
}

fn call_native(
    vm: &mut Vm<'_>,
    cell: &Rc<ThreadCell>,
    body: &mut Thread,
    func: Word,
    args: &[Word],
) -> bool {
    match vm.env.native(func) {
        Some(f) => f(vm, cell, body, args),
        None => {
            vm.host.report_fault(KillType::UnknownFunc, func, body.code_ptr);
            body.reset();
            cell.set_state(ThreadState::Inactive);
            true
        }
    }
}

/// Enters a function body by arena handle. A dead handle branches to the
/// guard instruction at index zero instead.
fn enter_function(
    vm: &mut Vm<'_>,
    cell: &ThreadCell,
    body: &mut Thread,
    branches: &mut Word,
    handle: Word,
) -> Option<Exit> {
    let Some(func) = vm.env.modules.function(handle) else {
        return if branch_to(vm, cell, body, branches, 0) {
            None
        } else {
            Some(Exit::Done)
        };
    };
    let (fmodule, fcode, fargs, flregs, flarrs) = (
        func.module,
        func.code_idx,
        func.arg_count,
        func.loc_reg_count,
        func.loc_arr_count,
    );

    body.call_stack.push(CallFrame {
        code_ptr: body.code_ptr,
        module: body.module,
        scope_mod: body.scope_mod,
        loc_arr_count: body.local_arrs.size() as Word,
        loc_reg_count: body.local_regs.size() as Word,
    });
    body.module = fmodule;
    body.scope_mod = fmodule;
    let args = body.pop_args(fargs);
    body.local_arrs.alloc(flarrs as usize);
    body.local_regs.alloc(flregs as usize);
    for (i, &arg) in args.iter().enumerate() {
        if let Some(reg) = body.local_regs.get_mut(i as Word) {
            *reg = arg;
        }
    }
    if branch_to(vm, cell, body, branches, fcode) {
        None
    } else {
        Some(Exit::Done)
    }
}

/// Clamps automatic-call arguments to byte range for legacy modules
/// running in a clamping map.
fn clamp_spec_args(vm: &Vm<'_>, module: Word, args: &mut [Word]) {
    if vm.map.clamp_call_spec && vm.env.modules.module(module).is_legacy {
        for arg in args {
            *arg &= 0xFF;
        }
    }
}

fn run_slice(vm: &mut Vm<'_>, cell: &Rc<ThreadCell>, branches: &mut Word) -> Exit {
    let mut guard = cell.body_mut();
    let body = &mut *guard;

    macro_rules! word {
        () => {
            match fetch(vm, body) {
                Some(w) => w,
                None => return kill(vm, cell, body, KillType::OutOfBounds, body.code_ptr),
            }
        };
    }
    macro_rules! branch {
        ($target:expr) => {
            if !branch_to(vm, cell, body, branches, $target) {
                return Exit::Done;
            }
        };
    }

    loop {
        let op_word = word!();
        let Some(code) = Code::from_word(op_word) else {
            return kill(vm, cell, body, KillType::UnknownCode, op_word);
        };

        if let Some((f, offset)) = bin_family(code) {
            if offset == 0 {
                let r = body.pop();
                let l = body.pop();
                body.push(f(l, r));
            } else {
                let operand = word!();
                let (place, is_arr) = place_of(offset - 1);
                if is_arr {
                    let value = body.pop();
                    let index = body.pop();
                    with_arr(vm, body, place, operand, |arr| {
                        let current = arr.get(index);
                        arr.set(index, f(current, value));
                    });
                } else {
                    let value = body.pop();
                    with_reg(vm, body, place, operand, |reg| *reg = f(*reg, value));
                }
            }
            continue;
        }

        if let Some((step, offset)) = step_family(code) {
            let operand = word!();
            let (place, is_arr) = place_of(offset);
            if is_arr {
                let index = body.pop();
                with_arr(vm, body, place, operand, |arr| {
                    let current = arr.get(index);
                    arr.set(index, step(current));
                });
            } else {
                with_reg(vm, body, place, operand, |reg| *reg = step(*reg));
            }
            continue;
        }

        match code {
            Code::Nop => {}
            Code::Kill => {
                let kind = word!();
                let data = word!();
                return kill(vm, cell, body, KillType::from_word(kind), data);
            }

            Code::CmpIGE => {
                let r = body.pop() as SWord;
                let l = body.pop() as SWord;
                body.push(Word::from(l >= r));
            }
            Code::CmpIGT => {
                let r = body.pop() as SWord;
                let l = body.pop() as SWord;
                body.push(Word::from(l > r));
            }
            Code::CmpILE => {
                let r = body.pop() as SWord;
                let l = body.pop() as SWord;
                body.push(Word::from(l <= r));
            }
            Code::CmpILT => {
                let r = body.pop() as SWord;
                let l = body.pop() as SWord;
                body.push(Word::from(l < r));
            }
            Code::CmpUEQ => {
                let r = body.pop();
                let l = body.pop();
                body.push(Word::from(l == r));
            }
            Code::CmpUNE => {
                let r = body.pop();
                let l = body.pop();
                body.push(Word::from(l != r));
            }
            Code::DivX => {
                let r = body.pop();
                let l = body.pop();
                body.push(div_fixed(l, r));
            }
            Code::MulX => {
                let r = body.pop();
                let l = body.pop();
                body.push(mul_fixed(l, r));
            }
            Code::LAnd => {
                let r = body.pop();
                let l = body.pop();
                body.push(Word::from(l != 0 && r != 0));
            }
            Code::LOrI => {
                let r = body.pop();
                let l = body.pop();
                body.push(Word::from(l != 0 || r != 0));
            }

            Code::CallLit => {
                let index = word!();
                let handle = vm
                    .env
                    .modules
                    .module(body.module)
                    .functions
                    .get(index as usize)
                    .copied()
                    .unwrap_or(0);
                if let Some(exit) = enter_function(vm, cell, body, branches, handle) {
                    return exit;
                }
            }
            Code::CallStk => {
                let handle = body.pop();
                if let Some(exit) = enter_function(vm, cell, body, branches, handle) {
                    return exit;
                }
            }
            Code::CallFunc => {
                let argc = word!();
                let func = word!();
                let args = body.pop_args(argc);
                if call_native(vm, cell, body, func, &args) {
                    return Exit::Recheck;
                }
            }
            Code::CallFuncLit => {
                let argc = word!();
                let func = word!();
                let mut args = Vec::with_capacity(argc as usize);
                for _ in 0..argc {
                    args.push(word!());
                }
                if call_native(vm, cell, body, func, &args) {
                    return Exit::Recheck;
                }
            }
            Code::CallSpec => {
                let argc = word!();
                let spec = word!();
                let mut args = body.pop_args(argc);
                clamp_spec_args(vm, body.module, &mut args);
                vm.host.resolve_special_call(spec, &args);
            }
            Code::CallSpecLit => {
                let argc = word!();
                let spec = word!();
                let mut args = Vec::with_capacity(argc as usize);
                for _ in 0..argc {
                    args.push(word!());
                }
                clamp_spec_args(vm, body.module, &mut args);
                vm.host.resolve_special_call(spec, &args);
            }
            Code::CallSpecR1 => {
                let argc = word!();
                let spec = word!();
                let mut args = body.pop_args(argc);
                clamp_spec_args(vm, body.module, &mut args);
                let result = vm.host.resolve_special_call(spec, &args);
                body.push(result);
            }
            Code::Retn => match body.call_stack.pop() {
                None => return stop(cell, body),
                Some(frame) => {
                    body.local_arrs.free(frame.loc_arr_count as usize);
                    body.local_regs.free(frame.loc_reg_count as usize);
                    body.code_ptr = frame.code_ptr;
                    body.module = frame.module;
                    body.scope_mod = frame.scope_mod;
                }
            },

            Code::DropGblArr | Code::DropHubArr | Code::DropLocArr | Code::DropModArr => {
                let operand = word!();
                let place = match code {
                    Code::DropGblArr => Place::Gbl,
                    Code::DropHubArr => Place::Hub,
                    Code::DropLocArr => Place::Loc,
                    _ => Place::Mod,
                };
                let value = body.pop();
                let index = body.pop();
                with_arr(vm, body, place, operand, |arr| arr.set(index, value));
            }
            Code::DropGblReg | Code::DropHubReg | Code::DropLocReg | Code::DropModReg => {
                let operand = word!();
                let place = match code {
                    Code::DropGblReg => Place::Gbl,
                    Code::DropHubReg => Place::Hub,
                    Code::DropLocReg => Place::Loc,
                    _ => Place::Mod,
                };
                let value = body.pop();
                with_reg(vm, body, place, operand, |reg| *reg = value);
            }
            Code::DropNul => {
                body.pop();
            }
            Code::DropScrRet => {
                body.result = body.pop();
            }

            Code::JcndLit => {
                let value = word!();
                let target = word!();
                if body.data_stack.last().copied().unwrap_or(0) == value {
                    body.pop();
                    branch!(target);
                }
            }
            Code::JcndNil => {
                let target = word!();
                if body.pop() == 0 {
                    branch!(target);
                }
            }
            Code::JcndTru => {
                let target = word!();
                if body.pop() != 0 {
                    branch!(target);
                }
            }
            Code::JcndTab => {
                let table = word!();
                let top = body.data_stack.last().copied().unwrap_or(0);
                let target = vm
                    .env
                    .modules
                    .module(body.module)
                    .jump_maps
                    .get(table as usize)
                    .and_then(|map| map.find(top));
                if let Some(target) = target {
                    body.pop();
                    branch!(target);
                }
            }
            Code::JumpLit => {
                let target = word!();
                branch!(target);
            }
            Code::JumpStk => {
                let index = body.pop();
                let target = vm
                    .env
                    .modules
                    .module(body.module)
                    .jumps
                    .get(index as usize)
                    .copied()
                    .unwrap_or(0);
                branch!(target);
            }

            Code::PfunLit => {
                let index = word!();
                let handle = vm
                    .env
                    .modules
                    .module(body.module)
                    .functions
                    .get(index as usize)
                    .copied()
                    .unwrap_or(0);
                body.push(handle);
            }
            Code::PstrStk => {
                let top = body.data_stack.last().copied().unwrap_or(0);
                let idx = vm
                    .env
                    .modules
                    .module(body.module)
                    .strings
                    .get(top as usize)
                    .copied();
                if let Some(idx) = idx {
                    *body.top_mut() = encode_string(idx);
                }
            }
            Code::PushGblArr | Code::PushHubArr | Code::PushLocArr | Code::PushModArr => {
                let operand = word!();
                let place = match code {
                    Code::PushGblArr => Place::Gbl,
                    Code::PushHubArr => Place::Hub,
                    Code::PushLocArr => Place::Loc,
                    _ => Place::Mod,
                };
                let index = body.data_stack.last().copied().unwrap_or(0);
                let value = with_arr(vm, body, place, operand, |arr| arr.get(index)).unwrap_or(0);
                *body.top_mut() = value;
            }
            Code::PushGblReg | Code::PushHubReg | Code::PushLocReg | Code::PushModReg => {
                let operand = word!();
                let place = match code {
                    Code::PushGblReg => Place::Gbl,
                    Code::PushHubReg => Place::Hub,
                    Code::PushLocReg => Place::Loc,
                    _ => Place::Mod,
                };
                let value = with_reg(vm, body, place, operand, |reg| *reg).unwrap_or(0);
                body.push(value);
            }
            Code::PushLit => {
                let value = word!();
                body.push(value);
            }
            Code::PushLitArr => {
                let count = word!();
                for _ in 0..count {
                    let value = word!();
                    body.push(value);
                }
            }
            Code::PushStrArs => {
                let index = body.pop();
                let handle = body.data_stack.last().copied().unwrap_or(0);
                let idx = vm.map.string_idx(&vm.env.modules, handle);
                let byte = vm
                    .env
                    .strings
                    .entry(idx)
                    .map(|entry| entry.get(index as usize))
                    .unwrap_or(0);
                *body.top_mut() = Word::from(byte);
            }

            Code::ScrDelay => {
                body.delay = body.pop();
                return Exit::Recheck;
            }
            Code::ScrDelayLit => {
                body.delay = word!();
                return Exit::Recheck;
            }
            Code::ScrHalt => {
                cell.set_state(ThreadState::Paused);
                return Exit::Recheck;
            }
            Code::ScrRestart => {
                let (module, index) = body.script;
                let target = vm
                    .env
                    .modules
                    .module(module)
                    .scripts
                    .get(index as usize)
                    .map(|s| s.code_idx)
                    .unwrap_or(0);
                branch!(target);
            }
            Code::ScrTerm => return stop(cell, body),
            Code::ScrWaitI => {
                let num = body.pop();
                cell.set_state(ThreadState::WaitScrNum(num));
                return Exit::Recheck;
            }
            Code::ScrWaitILit => {
                let num = word!();
                cell.set_state(ThreadState::WaitScrNum(num));
                return Exit::Recheck;
            }
            Code::ScrWaitS => {
                let word = body.pop();
                cell.set_state(ThreadState::WaitScrStr(word));
                return Exit::Recheck;
            }
            Code::ScrWaitSLit => {
                let word = word!();
                cell.set_state(ThreadState::WaitScrStr(word));
                return Exit::Recheck;
            }

            Code::Copy => {
                let top = body.data_stack.last().copied().unwrap_or(0);
                body.push(top);
            }
            Code::Swap => {
                let a = body.pop();
                let b = body.pop();
                body.push(a);
                body.push(b);
            }
            Code::InvU => {
                let top = body.top_mut();
                *top = !*top;
            }
            Code::NegI => {
                let top = body.top_mut();
                *top = top.wrapping_neg();
            }
            Code::NotU => {
                let top = body.top_mut();
                *top = Word::from(*top == 0);
            }

            // Arithmetic families are decoded above; anything else left
            // is a stream the translator never emits.
            _ => return kill(vm, cell, body, KillType::UnknownCode, op_word),
        }
    }
}
