//! The built-in native function set.
//!
//! Indices follow [`bytecode_system::natives`]; the translator emits
//! native calls against that numbering and hosts append their own past
//! [`bytecode_system::natives::COUNT`].

use crate::action::ActionKind;
use crate::dispatch::{
    script_start, script_start_forced, script_start_result, with_arr, Place, Vm,
};
use crate::environment::NativeFn;
use crate::printbuf::PrintBuf;
use crate::thread::{Thread, ThreadCell, ThreadState};

use core_types::{encode_string, KillType, SWord, ScopeId, ScriptName, StringIdx, Word};
use crate::action::ScriptAction;
use memory_manager::WordArray;

use std::rc::Rc;

/// Builds the native table in index order.
pub(crate) fn default_natives() -> Vec<NativeFn> {
    vec![
        nf_nop,
        nf_kill,
        nf_print_char,
        nf_print_drop,
        nf_print_end,
        nf_print_end_str,
        nf_print_fix_d,
        nf_print_gbl_arr,
        nf_print_hub_arr,
        nf_print_int_b,
        nf_print_int_d,
        nf_print_int_x,
        nf_print_loc_arr,
        nf_print_mod_arr,
        nf_print_push,
        nf_print_string,
        nf_scr_pause_s,
        nf_scr_start_s,
        nf_scr_start_sd,
        nf_scr_start_sf,
        nf_scr_start_sl,
        nf_scr_start_sr,
        nf_scr_stop_s,
        nf_get_char,
        nf_str_case_cmp,
        nf_str_cmp,
        nf_str_cpy_gbl_arr,
        nf_str_cpy_hub_arr,
        nf_str_cpy_loc_arr,
        nf_str_cpy_mod_arr,
        nf_str_left,
        nf_str_len,
        nf_str_mid,
        nf_str_right,
    ]
}

fn arg(args: &[Word], i: usize) -> Word {
    args.get(i).copied().unwrap_or(0)
}

/// Resolves a script word to a live string handle, substituting the empty
/// string for dead handles so re-pushed handles stay valid.
fn live_string(vm: &mut Vm<'_>, word: Word) -> StringIdx {
    let idx = vm.map.string_idx(&vm.env.modules, word);
    if vm.env.strings.entry(idx).is_some() {
        idx
    } else {
        vm.env.strings.intern(b"")
    }
}

fn nf_nop(_vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, _body: &mut Thread, _args: &[Word]) -> bool {
    false
}

fn nf_kill(vm: &mut Vm<'_>, cell: &Rc<ThreadCell>, body: &mut Thread, _args: &[Word]) -> bool {
    vm.host.report_fault(KillType::UnknownFunc, 0, body.code_ptr);
    body.reset();
    cell.set_state(ThreadState::Inactive);
    true
}

// ---------------------------------------------------------------------
// Print natives.

fn nf_print_char(_vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    body.print_buf.put_byte(arg(args, 0) as u8);
    false
}

fn nf_print_drop(_vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, _args: &[Word]) -> bool {
    body.print_buf.drop_segment();
    false
}

fn nf_print_end(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, _args: &[Word]) -> bool {
    let text = body.print_buf.segment().to_vec();
    vm.host.print_end(&text);
    body.print_buf.drop_segment();
    false
}

fn nf_print_end_str(
    vm: &mut Vm<'_>,
    _cell: &Rc<ThreadCell>,
    body: &mut Thread,
    _args: &[Word],
) -> bool {
    let idx = vm.env.strings.intern(body.print_buf.segment());
    body.print_buf.drop_segment();
    body.push(encode_string(idx));
    false
}

fn nf_print_fix_d(_vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let value = arg(args, 0) as SWord as f64 / 65536.0;
    body.print_buf.put_bytes(format!("{value}").as_bytes());
    false
}

fn nf_print_int_b(_vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let mut value = arg(args, 0);
    let mut digits = [0u8; 32];
    let mut count = 0;
    while value != 0 {
        digits[count] = b'0' + (value & 1) as u8;
        value >>= 1;
        count += 1;
    }
    for &digit in digits[..count].iter().rev() {
        body.print_buf.put_byte(digit);
    }
    false
}

fn nf_print_int_d(_vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let value = arg(args, 0) as SWord;
    body.print_buf.put_bytes(format!("{value}").as_bytes());
    false
}

fn nf_print_int_x(_vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let value = arg(args, 0);
    body.print_buf.put_bytes(format!("{value:X}").as_bytes());
    false
}

fn nf_print_push(_vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, _args: &[Word]) -> bool {
    body.print_buf.push_segment();
    false
}

fn nf_print_string(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let idx = vm.map.string_idx(&vm.env.modules, arg(args, 0));
    if let Some(ent) = vm.env.strings.entry(idx) {
        let text = &ent.bytes()[..ent.len0()];
        body.print_buf.put_bytes(text);
    }
    false
}

/// Appends a run of array cells as bytes, stopping at a zero cell.
///
/// Arguments are (start, array, offset, length), with offset and length
/// optional.
fn print_array(buf: &mut PrintBuf, arr: &WordArray, start: Word, len: Word) {
    let mut idx = start;
    let mut left = len;
    while left != 0 {
        let cell = arr.get(idx);
        if cell == 0 {
            break;
        }
        buf.put_byte(cell as u8);
        idx = idx.wrapping_add(1);
        left -= 1;
    }
}

fn print_arr_native(vm: &mut Vm<'_>, body: &mut Thread, args: &[Word], place: Place) -> bool {
    let start = arg(args, 0).wrapping_add(if args.len() > 2 { arg(args, 2) } else { 0 });
    let len = if args.len() > 3 { arg(args, 3) } else { Word::MAX };
    let number = arg(args, 1);

    let Thread { print_buf, local_arrs, scope_mod, .. } = body;
    let arr = match place {
        Place::Gbl => vm.gbl_arrays.get(number as usize & 0xFF),
        Place::Hub => vm.hub_arrays.get(number as usize & 0xFF),
        Place::Loc => local_arrs.get(number),
        Place::Mod => vm.map.mod_array(*scope_mod, number),
    };
    if let Some(arr) = arr {
        print_array(print_buf, arr, start, len);
    }
    false
}

fn nf_print_gbl_arr(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    print_arr_native(vm, body, args, Place::Gbl)
}

fn nf_print_hub_arr(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    print_arr_native(vm, body, args, Place::Hub)
}

fn nf_print_loc_arr(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    print_arr_native(vm, body, args, Place::Loc)
}

fn nf_print_mod_arr(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    print_arr_native(vm, body, args, Place::Mod)
}

// ---------------------------------------------------------------------
// Script lifecycle natives.

/// Performs a by-name lifecycle request from script code.
///
/// Arguments are (name, map, start args...). A request addressed to a
/// different map scope is queued at the environment and reports success;
/// one for the caller's own scope applies immediately and reports the
/// outcome.
fn lifecycle_by_name(vm: &mut Vm<'_>, args: &[Word], kind: ActionKind) -> Word {
    let name = ScriptName::Str(vm.map.string_idx(&vm.env.modules, arg(args, 0)));
    let map = arg(args, 1);
    let scope = ScopeId::new(
        vm.map.id.global,
        vm.map.id.hub,
        if map != 0 { map } else { vm.map.id.map },
    );
    let call_args: Vec<Word> = args.get(2..).unwrap_or(&[]).to_vec();

    if scope != vm.map.id {
        vm.env.defer_action(ScriptAction { scope, name, kind, args: call_args });
        return 1;
    }

    let Some(key) = vm.map.find_script(name) else {
        return 0;
    };
    match kind {
        ActionKind::Start => Word::from(script_start(vm, key, &call_args)),
        ActionKind::StartForced => Word::from(script_start_forced(vm, key, &call_args)),
        ActionKind::Stop => Word::from(vm.map.script_stop(key)),
        ActionKind::Pause => Word::from(vm.map.script_pause(key)),
        ActionKind::StartType(_) | ActionKind::StartTypeForced(_) => 0,
    }
}

fn nf_scr_start_s(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let started = lifecycle_by_name(vm, args, ActionKind::Start);
    body.push(started);
    false
}

fn nf_scr_start_sf(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let started = lifecycle_by_name(vm, args, ActionKind::StartForced);
    body.push(started);
    false
}

fn locked_start(vm: &mut Vm<'_>, body: &mut Thread, args: &[Word], door: bool) -> bool {
    if !vm.host.is_lock_open(arg(args, 4), door) {
        body.push(0);
        return false;
    }
    let delegated = &args[..args.len().min(4)];
    let started = lifecycle_by_name(vm, delegated, ActionKind::Start);
    body.push(started);
    false
}

fn nf_scr_start_sd(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    locked_start(vm, body, args, true)
}

fn nf_scr_start_sl(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    locked_start(vm, body, args, false)
}

fn nf_scr_start_sr(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let name = ScriptName::Str(vm.map.string_idx(&vm.env.modules, arg(args, 0)));
    let result = match vm.map.find_script(name) {
        Some(key) => script_start_result(vm, key, args.get(1..).unwrap_or(&[])),
        None => 0,
    };
    body.push(result);
    false
}

fn nf_scr_stop_s(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let stopped = lifecycle_by_name(vm, args, ActionKind::Stop);
    body.push(stopped);
    false
}

fn nf_scr_pause_s(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let paused = lifecycle_by_name(vm, args, ActionKind::Pause);
    body.push(paused);
    false
}

// ---------------------------------------------------------------------
// String natives.

fn nf_get_char(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let idx = vm.map.string_idx(&vm.env.modules, arg(args, 0));
    let byte = vm
        .env
        .strings
        .entry(idx)
        .map(|ent| ent.get(arg(args, 1) as usize))
        .unwrap_or(0);
    body.push(Word::from(byte));
    false
}

fn str_compare(vm: &mut Vm<'_>, body: &mut Thread, args: &[Word], fold_case: bool) -> bool {
    let l = vm.map.string_idx(&vm.env.modules, arg(args, 0));
    let r = vm.map.string_idx(&vm.env.modules, arg(args, 1));
    let mut left = if args.len() > 2 { arg(args, 2) } else { Word::MAX };

    let a = vm.env.strings.get(l);
    let b = vm.env.strings.get(r);
    let mut i = 0;
    let order: SWord = loop {
        if left == 0 {
            break 0;
        }
        let mut ca = a.get(i).copied().unwrap_or(0);
        let mut cb = b.get(i).copied().unwrap_or(0);
        if fold_case {
            ca = ca.to_ascii_lowercase();
            cb = cb.to_ascii_lowercase();
        }
        if ca != cb {
            break if ca < cb { -1 } else { 1 };
        }
        if ca == 0 {
            break 0;
        }
        i += 1;
        left -= 1;
    };
    body.push(order as Word);
    false
}

fn nf_str_cmp(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    str_compare(vm, body, args, false)
}

fn nf_str_case_cmp(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    str_compare(vm, body, args, true)
}

/// Copies NUL-terminated string content into array cells. Pushes 1 when
/// the terminator was copied, 0 when the destination window ran out or
/// the source offset was past the end.
fn str_cpy(vm: &mut Vm<'_>, body: &mut Thread, args: &[Word], place: Place) -> bool {
    let dst_off = arg(args, 0).wrapping_add(arg(args, 2));
    let dst_len = arg(args, 3);
    let src_idx = arg(args, 5) as usize;
    let idx = vm.map.string_idx(&vm.env.modules, arg(args, 4));
    let src = vm.env.strings.get(idx).to_vec();

    if src_idx > src.len() {
        body.push(0);
        return false;
    }

    let done = with_arr(vm, body, place, arg(args, 1), |arr| {
        let mut off = dst_off;
        let mut left = dst_len;
        let mut i = src_idx;
        loop {
            if left == 0 {
                return false;
            }
            let byte = src.get(i).copied().unwrap_or(0);
            arr.set(off, Word::from(byte));
            if byte == 0 {
                return true;
            }
            i += 1;
            off = off.wrapping_add(1);
            left -= 1;
        }
    })
    .unwrap_or(false);
    body.push(Word::from(done));
    false
}

fn nf_str_cpy_gbl_arr(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    str_cpy(vm, body, args, Place::Gbl)
}

fn nf_str_cpy_hub_arr(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    str_cpy(vm, body, args, Place::Hub)
}

fn nf_str_cpy_loc_arr(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    str_cpy(vm, body, args, Place::Loc)
}

fn nf_str_cpy_mod_arr(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    str_cpy(vm, body, args, Place::Mod)
}

fn nf_str_left(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let idx = live_string(vm, arg(args, 0));
    let len = arg(args, 1) as usize;
    let bytes = vm.env.strings.get(idx).to_vec();
    let out = if len < bytes.len() {
        vm.env.strings.intern(&bytes[..len])
    } else {
        idx
    };
    body.push(encode_string(out));
    false
}

fn nf_str_right(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let idx = live_string(vm, arg(args, 0));
    let len = arg(args, 1) as usize;
    let bytes = vm.env.strings.get(idx).to_vec();
    let out = if len < bytes.len() {
        vm.env.strings.intern(&bytes[bytes.len() - len..])
    } else {
        idx
    };
    body.push(encode_string(out));
    false
}

fn nf_str_mid(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let idx = live_string(vm, arg(args, 0));
    let start = arg(args, 1) as usize;
    let len = arg(args, 2) as usize;
    let bytes = vm.env.strings.get(idx).to_vec();
    let out = if start < bytes.len() {
        let take = len.min(bytes.len() - start);
        vm.env.strings.intern(&bytes[start..start + take])
    } else {
        vm.env.strings.intern(b"")
    };
    body.push(encode_string(out));
    false
}

fn nf_str_len(vm: &mut Vm<'_>, _cell: &Rc<ThreadCell>, body: &mut Thread, args: &[Word]) -> bool {
    let idx = vm.map.string_idx(&vm.env.modules, arg(args, 0));
    let len = vm.env.strings.entry(idx).map(|ent| ent.len0()).unwrap_or(0);
    body.push(len as Word);
    false
}
