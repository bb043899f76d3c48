//! Bytecode execution for the Karst scripting VM.
//!
//! The crate builds on [`bytecode_system`]'s translated modules and runs
//! them under cooperative scheduling. An [`Environment`] owns the whole
//! machine: modules, interned strings, the native table, and a scope
//! tree of global, hub, and map levels. Map scopes own threads; one call
//! to [`Environment::exec`] gives every live thread in every active
//! scope one execution turn, a tick.
//!
//! Hosts integrate through [`HostContext`]: module bytes, automatic
//! calls, lock and tag predicates, fault reports, and finished print
//! buffers all cross that trait. Extra natives register through
//! [`Environment::add_native`].
//!
//! The entire machine state serializes with
//! [`Environment::save_state`] and restores with
//! [`Environment::load_state`], reloading module code through the host
//! rather than storing it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod action;
mod callfunc;
mod dispatch;
mod environment;
mod printbuf;
mod scope;
mod serial;
mod thread;

pub use action::{ActionKind, ScriptAction};
pub use dispatch::Vm;
pub use environment::{DefaultHost, Environment, HostContext, NativeFn};
pub use printbuf::PrintBuf;
pub use scope::{
    GlobalScope, HubScope, MapScope, ModuleScope, ScriptKey, SCOPE_ARR_COUNT, SCOPE_REG_COUNT,
};
pub use serial::{STATE_TAG, STATE_VERSION};
pub use thread::{
    CallFrame, LocalStore, Thread, ThreadCell, ThreadState, CALL_STACK_RESERVE,
    DATA_STACK_RESERVE,
};
