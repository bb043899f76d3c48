//! Contract tests: the guarantees other components build on.

use core_types::{
    ByteReader, LoadError, Loader, Saver, SerialError, Signature, StringIdx, Word,
};

#[test]
fn words_are_exactly_32_bits() {
    assert_eq!(std::mem::size_of::<Word>(), 4);
    assert_eq!(std::mem::size_of::<StringIdx>(), 4);
}

#[test]
fn byte_reader_never_reads_past_the_end() {
    let data = [7u8, 0];
    let mut reader = ByteReader::new(&data);
    assert!(matches!(reader.u32(), Err(LoadError::UnexpectedEnd)));
    // A failed read leaves the cursor usable.
    assert_eq!(reader.u16().unwrap(), 7);
}

#[test]
fn blobs_round_trip_with_and_without_signatures() {
    for signatures in [false, true] {
        let mut bytes = Vec::new();
        {
            let mut saver = Saver::new(&mut bytes, signatures);
            saver.sign(Signature::StringTable).unwrap();
            saver.put_blob(b"payload").unwrap();
            saver.put_word(Word::MAX).unwrap();
            saver.sign_end(Signature::StringTable).unwrap();
        }
        let mut cursor = bytes.as_slice();
        let mut loader = Loader::new(&mut cursor, signatures);
        loader.expect(Signature::StringTable).unwrap();
        assert_eq!(loader.get_blob().unwrap(), b"payload");
        assert_eq!(loader.get_word().unwrap(), Word::MAX);
        loader.expect_end(Signature::StringTable).unwrap();
    }
}

#[test]
fn oversized_words_are_rejected_on_read() {
    let mut bytes = Vec::new();
    Saver::new(&mut bytes, false).put_vln(u64::MAX).unwrap();
    let mut cursor = bytes.as_slice();
    let err = Loader::new(&mut cursor, false).get_word().unwrap_err();
    assert!(matches!(err, SerialError::Corrupt(_)));
}

#[test]
fn every_signature_value_is_distinct() {
    let sigs = [
        Signature::Environment,
        Signature::StringTable,
        Signature::GlobalScope,
        Signature::HubScope,
        Signature::MapScope,
        Signature::ModuleScope,
        Signature::Thread,
        Signature::Array,
    ];
    for (i, a) in sigs.iter().enumerate() {
        for b in &sigs[i + 1..] {
            assert_ne!(a.value(), b.value());
        }
    }
}
