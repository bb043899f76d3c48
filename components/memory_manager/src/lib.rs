//! Memory services for the Karst scripting VM.
//!
//! Two storage structures live here:
//!
//! - [`StringTable`] - deduplicated, handle-addressed string storage with
//!   lock counts and an explicit two-phase collection pass. Collection is
//!   always caller-driven: the embedding host decides when a pass runs and
//!   re-marks every reachable string between `collect_begin` and
//!   `collect_end`.
//! - [`WordArray`] - a sparse mapping from a 32-bit index to a 32-bit
//!   word, backed by a 256-way, four-level trie allocated lazily per
//!   level. Reading an index that was never written returns zero without
//!   allocating anything.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod array;
mod strings;

pub use array::WordArray;
pub use strings::{StringEntry, StringTable};
