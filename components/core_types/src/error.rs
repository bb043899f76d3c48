//! Error taxonomy: load-time format errors, runtime faults, and
//! persisted-state errors.

use crate::word::Word;

use thiserror::Error;

/// Runtime fault classes. A fault terminates only the offending thread,
/// through its normal stop path, and is reported once through the host's
/// fault hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillType {
    /// Control fell outside the translated instruction stream.
    OutOfBounds,
    /// An instruction word did not name a known instruction.
    UnknownCode,
    /// A native-function index did not resolve.
    UnknownFunc,
    /// The branch budget for this slice was exhausted.
    BranchLimit,
}

impl KillType {
    /// Word encoding used in synthetic fault instructions.
    pub fn to_word(self) -> Word {
        match self {
            KillType::OutOfBounds => 0,
            KillType::UnknownCode => 1,
            KillType::UnknownFunc => 2,
            KillType::BranchLimit => 3,
        }
    }

    /// Decodes a fault-class word, defaulting to [`KillType::UnknownCode`]
    /// for unrecognized values.
    pub fn from_word(word: Word) -> Self {
        match word {
            0 => KillType::OutOfBounds,
            2 => KillType::UnknownFunc,
            3 => KillType::BranchLimit,
            _ => KillType::UnknownCode,
        }
    }
}

/// Module load and translation errors. Always fatal to the load operation;
/// a module that fails to load is reset to empty, never left half built.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The byte buffer ended before a complete structure was read.
    #[error("unexpected end of module data")]
    UnexpectedEnd,

    /// The leading 4 bytes named no known encoding.
    #[error("unrecognized module magic {}", render_tag(.0))]
    BadMagic([u8; 4]),

    /// A header field pointed outside the buffer.
    #[error("malformed module header")]
    BadHeader,

    /// A chunk length overran the enclosing buffer.
    #[error("malformed chunk {}", render_tag(.0))]
    BadChunk([u8; 4]),

    /// Tracing re-covered an offset with a different instruction length.
    #[error("inconsistent instruction boundary at offset {0}")]
    CodeOverlap(Word),

    /// The translation pass emitted a different length than the trace
    /// pass counted.
    #[error("translated stream length disagrees with traced length")]
    TranslationDesync,

    /// The host could not supply bytes for a named module.
    #[error("module {0:?} not found")]
    ModuleNotFound(String),
}

/// Persisted-state save/restore errors. Always fatal to the operation and
/// never partially applied.
#[derive(Debug, Error)]
pub enum SerialError {
    /// Underlying stream failure.
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream did not begin with the expected file tag.
    #[error("not a saved state file")]
    BadTag,

    /// The version word named an unsupported layout.
    #[error("unsupported state version {0}")]
    BadVersion(Word),

    /// A structural signature did not match the expected object class.
    #[error("signature mismatch: expected {}, found {}", render_sig(*.expected), render_sig(*.found))]
    SignatureMismatch {
        /// The signature the reader required at this position.
        expected: u32,
        /// The signature actually present in the stream.
        found: u32,
    },

    /// A decoded value was outside its legal range.
    #[error("corrupt state: {0}")]
    Corrupt(&'static str),

    /// A module referenced by the saved state failed to reload.
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Renders a 4-byte tag as ASCII when printable, hex otherwise.
fn render_tag(tag: &[u8; 4]) -> String {
    if tag.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        format!("\"{}\"", tag.iter().map(|&b| b as char).collect::<String>())
    } else {
        format!("{:#010X}", u32::from_le_bytes(*tag))
    }
}

/// Renders a signature word as ASCII when printable, hex otherwise.
fn render_sig(sig: u32) -> String {
    render_tag(&sig.to_le_bytes())
}
