//! Script threads: state machine, stacks, and per-frame local storage.

use crate::printbuf::PrintBuf;

use core_types::{ScopeId, SerialError, Word};
use memory_manager::WordArray;

use std::cell::{Cell, Ref, RefCell, RefMut};

/// Call frames reserved when a thread starts.
pub const CALL_STACK_RESERVE: usize = 8;
/// Data-stack words reserved when a thread starts.
pub const DATA_STACK_RESERVE: usize = 256;

/// Scheduling state of one thread.
///
/// The wait states carry the value their predicate re-tests each tick; a
/// satisfied predicate falls the thread back to `Running` within the same
/// tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadState {
    /// Not running a script; the thread slot is free.
    #[default]
    Inactive,
    /// Executing, or suspended only by its delay counter.
    Running,
    /// Stop requested; finalized at the thread's next execution turn.
    Stopped,
    /// Paused until the script is started again.
    Paused,
    /// Waiting for the numbered script to go inactive.
    WaitScrNum(Word),
    /// Waiting for the script named by this string-handle word to go
    /// inactive.
    WaitScrStr(Word),
    /// Waiting for the host's tag predicate.
    WaitTag {
        /// Host-interpreted tag class.
        tag_type: Word,
        /// Tag value handed to the predicate.
        tag: Word,
    },
}

impl ThreadState {
    pub(crate) fn to_words(self) -> (Word, Word, Word) {
        match self {
            ThreadState::Inactive => (0, 0, 0),
            ThreadState::Running => (1, 0, 0),
            ThreadState::Stopped => (2, 0, 0),
            ThreadState::Paused => (3, 0, 0),
            ThreadState::WaitScrNum(n) => (4, n, 0),
            ThreadState::WaitScrStr(w) => (5, w, 0),
            ThreadState::WaitTag { tag_type, tag } => (6, tag, tag_type),
        }
    }

    pub(crate) fn from_words(kind: Word, data: Word, tag_type: Word) -> Result<Self, SerialError> {
        Ok(match kind {
            0 => ThreadState::Inactive,
            1 => ThreadState::Running,
            2 => ThreadState::Stopped,
            3 => ThreadState::Paused,
            4 => ThreadState::WaitScrNum(data),
            5 => ThreadState::WaitScrStr(data),
            6 => ThreadState::WaitTag { tag_type, tag: data },
            _ => return Err(SerialError::Corrupt("thread state")),
        })
    }
}

/// One suspended caller, restored on return.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    /// Instruction index to resume at.
    pub code_ptr: Word,
    /// Module whose stream the caller was executing.
    pub module: Word,
    /// Module whose per-map storage the caller addressed.
    pub scope_mod: Word,
    /// Caller's local-array window size, restored by the free.
    pub loc_arr_count: Word,
    /// Caller's local-register window size, restored by the free.
    pub loc_reg_count: Word,
}

/// Frame-windowed storage for thread locals.
///
/// Cells for every frame on the call stack live in one backing vector; an
/// active window marks the current frame's cells. A call allocates a new
/// window past the old one, a return frees it and slides the window back
/// over the caller's cells.
#[derive(Debug, Default)]
pub struct LocalStore<T> {
    store: Vec<T>,
    active: usize,
}

impl<T: Default> LocalStore<T> {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self { store: Vec::new(), active: 0 }
    }

    /// Opens a new window of `count` default cells past the current one.
    pub fn alloc(&mut self, count: usize) {
        self.active = self.store.len();
        for _ in 0..count {
            self.store.push(T::default());
        }
    }

    /// Frees the current window. `caller_count` must be the size of the
    /// window beneath it, which becomes current again.
    pub fn free(&mut self, caller_count: usize) {
        self.store.truncate(self.active);
        self.active = self.active.saturating_sub(caller_count);
    }

    /// Cell `idx` of the current window.
    pub fn get(&self, idx: Word) -> Option<&T> {
        let idx = idx as usize;
        if idx >= self.size() {
            return None;
        }
        self.store.get(self.active + idx)
    }

    /// Mutable cell `idx` of the current window.
    pub fn get_mut(&mut self, idx: Word) -> Option<&mut T> {
        let idx = idx as usize;
        if idx >= self.size() {
            return None;
        }
        self.store.get_mut(self.active + idx)
    }

    /// Size of the current window.
    pub fn size(&self) -> usize {
        self.store.len() - self.active
    }

    /// Total cells across all windows.
    pub fn size_full(&self) -> usize {
        self.store.len()
    }

    /// Drops every window.
    pub fn clear(&mut self) {
        self.store.clear();
        self.active = 0;
    }

    /// Rebuilds storage for a restore: `full` default cells total, the
    /// last `count` of them forming the current window.
    pub fn alloc_load(&mut self, full: usize, count: usize) {
        self.clear();
        for _ in 0..full {
            self.store.push(T::default());
        }
        self.active = full - count.min(full);
    }

    /// Every cell, across all windows.
    pub fn iter_full(&self) -> std::slice::Iter<'_, T> {
        self.store.iter()
    }

    /// Every cell mutably, across all windows.
    pub fn iter_full_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.store.iter_mut()
    }
}

/// The mutable body of a thread: everything but its scheduling state.
#[derive(Debug)]
pub struct Thread {
    /// Suspended callers, innermost last.
    pub call_stack: Vec<CallFrame>,
    /// Operand stack.
    pub data_stack: Vec<Word>,
    /// Local arrays, windowed per frame.
    pub local_arrs: LocalStore<WordArray>,
    /// Local registers, windowed per frame.
    pub local_regs: LocalStore<Word>,
    /// Print accumulator.
    pub print_buf: PrintBuf,

    /// Next instruction index.
    pub code_ptr: Word,
    /// Module whose stream is executing.
    pub module: Word,
    /// Module whose per-map storage the module-class ops address.
    pub scope_mod: Word,
    /// Owning scope triple.
    pub scope: ScopeId,
    /// Script this thread runs: (module handle, script index).
    pub script: (Word, Word),
    /// Ticks left before the next slice runs.
    pub delay: Word,
    /// Result word, readable after termination.
    pub result: Word,
}

impl Default for Thread {
    fn default() -> Self {
        Self {
            call_stack: Vec::new(),
            data_stack: Vec::new(),
            local_arrs: LocalStore::new(),
            local_regs: LocalStore::new(),
            print_buf: PrintBuf::new(),
            code_ptr: 0,
            module: 0,
            scope_mod: 0,
            scope: ScopeId::new(0, 0, 0),
            script: (0, 0),
            delay: 0,
            result: 0,
        }
    }
}

impl Thread {
    /// Releases stacks, locals, and print state. The result word survives
    /// so synchronous starts can read it after termination.
    pub fn reset(&mut self) {
        self.call_stack.clear();
        self.data_stack.clear();
        self.local_arrs.clear();
        self.local_regs.clear();
        self.print_buf.clear();
    }

    /// Pops the operand stack; an empty stack yields zero.
    pub fn pop(&mut self) -> Word {
        self.data_stack.pop().unwrap_or(0)
    }

    /// Pushes onto the operand stack.
    pub fn push(&mut self, word: Word) {
        self.data_stack.push(word);
    }

    /// Mutable top of the operand stack, materializing a zero on an empty
    /// stack.
    pub fn top_mut(&mut self) -> &mut Word {
        if self.data_stack.is_empty() {
            self.data_stack.push(0);
        }
        let last = self.data_stack.len() - 1;
        &mut self.data_stack[last]
    }

    /// Pops the top `count` words, preserving their push order.
    pub fn pop_args(&mut self, count: Word) -> Vec<Word> {
        let at = self.data_stack.len().saturating_sub(count as usize);
        self.data_stack.split_off(at)
    }
}

/// Shared handle to one thread.
///
/// The scheduling state sits in a [`Cell`] outside the body's [`RefCell`],
/// so any script can stop or pause any other mid-tick, including one whose
/// body is currently borrowed by the dispatch loop. The loop re-reads the
/// state at every interrupt point.
#[derive(Debug, Default)]
pub struct ThreadCell {
    state: Cell<ThreadState>,
    body: RefCell<Thread>,
}

impl ThreadCell {
    /// Current scheduling state.
    pub fn state(&self) -> ThreadState {
        self.state.get()
    }

    /// Replaces the scheduling state.
    pub fn set_state(&self, state: ThreadState) {
        self.state.set(state);
    }

    /// Borrows the body.
    pub fn body(&self) -> Ref<'_, Thread> {
        self.body.borrow()
    }

    /// Mutably borrows the body.
    pub fn body_mut(&self) -> RefMut<'_, Thread> {
        self.body.borrow_mut()
    }

    /// Finalizes the thread: releases its body and goes inactive.
    pub fn retire(&self) {
        self.body.borrow_mut().reset();
        self.state.set(ThreadState::Inactive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_windows_nest_and_unwind() {
        let mut regs: LocalStore<Word> = LocalStore::new();
        regs.alloc(3);
        *regs.get_mut(0).unwrap() = 10;
        *regs.get_mut(2).unwrap() = 12;

        regs.alloc(2);
        assert_eq!(regs.size(), 2);
        assert_eq!(regs.size_full(), 5);
        assert_eq!(*regs.get(0).unwrap(), 0);
        *regs.get_mut(1).unwrap() = 99;

        regs.free(3);
        assert_eq!(regs.size(), 3);
        assert_eq!(*regs.get(0).unwrap(), 10);
        assert_eq!(*regs.get(2).unwrap(), 12);
        assert!(regs.get(3).is_none());
    }

    #[test]
    fn alloc_load_recreates_both_sizes() {
        let mut regs: LocalStore<Word> = LocalStore::new();
        regs.alloc_load(5, 2);
        assert_eq!(regs.size_full(), 5);
        assert_eq!(regs.size(), 2);
    }

    #[test]
    fn pop_args_preserves_push_order() {
        let mut thread = Thread::default();
        thread.push(1);
        thread.push(2);
        thread.push(3);
        assert_eq!(thread.pop_args(2), vec![2, 3]);
        assert_eq!(thread.pop(), 1);
        assert_eq!(thread.pop(), 0);
    }

    #[test]
    fn state_changes_do_not_touch_the_body_borrow() {
        let cell = ThreadCell::default();
        let body = cell.body_mut();
        cell.set_state(ThreadState::Stopped);
        assert_eq!(cell.state(), ThreadState::Stopped);
        drop(body);
    }

    #[test]
    fn retire_releases_the_body_but_keeps_the_result() {
        let cell = ThreadCell::default();
        {
            let mut body = cell.body_mut();
            body.push(5);
            body.result = 41;
        }
        cell.retire();
        assert_eq!(cell.state(), ThreadState::Inactive);
        assert!(cell.body().data_stack.is_empty());
        assert_eq!(cell.body().result, 41);
    }
}
