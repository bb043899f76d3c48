//! Bytecode loading and translation for the Karst scripting VM.
//!
//! Modules arrive as raw byte buffers in one of three encodings: the
//! legacy directory format, the extended chunked format, or the extended
//! format with compressed instruction operands. Loading runs in three
//! stages:
//!
//! 1. [`ModuleLoader`] parses headers and chunks into a [`Module`]:
//!    scripts, functions, string literals, register and array
//!    initializers, and imports (loaded recursively).
//! 2. [`Tracer`] walks the instruction stream from every entry point,
//!    validating reachable code against the [`SourceTables`].
//! 3. The same tracer re-emits reachable code as the internal [`Code`]
//!    instruction set, rewriting branch targets and entry indices, so
//!    execution never touches source encodings.
//!
//! Translated modules live in a [`ModuleSet`], which also owns the
//! shared function arena: a named function keeps the same index for the
//! life of the set, letting function handles stored in script memory
//! survive a save and reload.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod code;
mod escape;
mod loader;
mod module;
mod tables;
mod tracer;

pub use code::{natives, Code};
pub use escape::{decrypt_string, parse_string, scan_string, StringScan};
pub use loader::{
    ModuleLoader, ModuleSource, DEFAULT_SCRIPT_REGS, MAGIC_EXTENDED, MAGIC_LEGACY, MAGIC_PACKED,
};
pub use module::{
    ArrayInit, Function, InitTag, JumpMap, Module, ModuleSet, Script, WordInit,
    SCRIPT_FLAG_CLIENT, SCRIPT_FLAG_NET,
};
pub use tables::{SourceBranch, SourceFunc, SourceKind, SourceOp, SourceTables};
pub use tracer::Tracer;
