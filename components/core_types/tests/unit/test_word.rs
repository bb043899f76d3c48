//! Word-level helpers exercised through the public API.

use core_types::{decode_string, div_fixed, encode_string, mul_fixed, word_is_string, Word};

#[test]
fn string_handles_never_collide_with_small_integers() {
    for idx in 0..64u32 {
        let handle = encode_string(idx);
        assert!(word_is_string(handle));
        assert!(!word_is_string(idx));
        assert_eq!(decode_string(handle), idx);
    }
}

#[test]
fn fixed_point_identities() {
    let one: Word = 0x10000;
    for value in [0u32, one, 3 * one, (-5i32 as Word)] {
        assert_eq!(mul_fixed(value, one), value);
        assert_eq!(div_fixed(value, one), value);
    }
}

#[test]
fn fixed_point_division_by_zero_is_zero() {
    assert_eq!(div_fixed(0x10000, 0), 0);
}

#[test]
fn fixed_point_signs() {
    let one: Word = 0x10000;
    let neg_two = (-2i32 * 0x10000) as Word;
    assert_eq!(mul_fixed(neg_two, one), neg_two);
    assert_eq!(div_fixed(neg_two, neg_two), one);
}
