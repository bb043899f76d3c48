//! Core types for the Karst scripting VM.
//!
//! This crate provides the foundational types shared by every other
//! component: the 32-bit machine word, scope and script naming, the error
//! taxonomy, and the binary encodings used by both the module format and
//! the persisted-state format.
//!
//! # Overview
//!
//! - [`Word`] / [`SWord`] - the VM's unsigned and signed machine words
//! - [`ScopeId`] - a {global, hub, map} addressing triple
//! - [`ScriptName`] / [`ModuleName`] - entry-point and module identity
//! - [`LoadError`] / [`SerialError`] / [`KillType`] - the error taxonomy
//! - [`ByteReader`] - little-endian cursor over module bytes
//! - [`Saver`] / [`Loader`] - persisted-state streams with VLN integers
//!   and structural signatures
//!
//! # Examples
//!
//! ```
//! use core_types::{encode_string, decode_string, word_is_string};
//!
//! let handle = encode_string(3);
//! assert!(word_is_string(handle));
//! assert_eq!(decode_string(handle), 3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod name;
mod serial;
mod word;

pub use error::{KillType, LoadError, SerialError};
pub use name::{ModuleName, ScopeId, ScriptName};
pub use serial::{ByteReader, Loader, Saver, Signature};
pub use word::{
    decode_string, div_fixed, encode_string, mul_fixed, word_is_string, SWord, StringIdx, Word,
};
