//! Error taxonomy exercised through the public API.

use core_types::{KillType, LoadError, SerialError};

#[test]
fn load_errors_render_magic_bytes() {
    let text = LoadError::BadMagic(*b"WHAT").to_string();
    assert!(text.contains("WHAT"), "{text}");

    let text = LoadError::BadMagic([0, 1, 2, 3]).to_string();
    assert!(text.contains("0x"), "{text}");
}

#[test]
fn io_failures_convert_into_serial_errors() {
    let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
    let err = SerialError::from(io);
    assert!(matches!(err, SerialError::Io(_)));
}

#[test]
fn load_failures_convert_into_serial_errors() {
    let err = SerialError::from(LoadError::ModuleNotFound("main".into()));
    assert!(matches!(err, SerialError::Load(LoadError::ModuleNotFound(_))));
}

#[test]
fn unknown_fault_words_decode_to_unknown_code() {
    assert_eq!(KillType::from_word(999), KillType::UnknownCode);
}
