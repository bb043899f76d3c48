//! Machine word types and word-level helpers.

/// The VM's machine word. All registers, array cells, stack slots, and
/// instruction operands are 32-bit unsigned words.
pub type Word = u32;

/// Signed view of a [`Word`], used by signed arithmetic and comparisons.
pub type SWord = i32;

/// Index into the interned string table.
pub type StringIdx = Word;

/// Encodes a string-table index as a VM word.
///
/// String handles are the bitwise complement of the table index, so every
/// handle has its high bit set and small non-negative integers never
/// collide with string handles.
#[inline]
pub fn encode_string(idx: StringIdx) -> Word {
    !idx
}

/// Recovers a string-table index from a VM word.
///
/// Only meaningful when [`word_is_string`] holds; otherwise the result is
/// out of range for the table and resolves to the none string.
#[inline]
pub fn decode_string(word: Word) -> StringIdx {
    !word
}

/// Returns true if the word has the string-handle bit set.
#[inline]
pub fn word_is_string(word: Word) -> bool {
    word & 0x8000_0000 != 0
}

/// 16.16 fixed-point multiply.
#[inline]
pub fn mul_fixed(l: Word, r: Word) -> Word {
    ((i64::from(l as SWord) * i64::from(r as SWord)) >> 16) as Word
}

/// 16.16 fixed-point divide. A zero divisor yields zero rather than a
/// fault, matching integer division in script arithmetic.
#[inline]
pub fn div_fixed(l: Word, r: Word) -> Word {
    if r == 0 {
        return 0;
    }
    ((i64::from(l as SWord) << 16).wrapping_div(i64::from(r as SWord))) as Word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_handles_round_trip() {
        for idx in [0u32, 1, 57, 0x7FFF_FFFF] {
            let w = encode_string(idx);
            assert!(word_is_string(w));
            assert_eq!(decode_string(w), idx);
        }
    }

    #[test]
    fn small_integers_are_not_string_handles() {
        assert!(!word_is_string(0));
        assert!(!word_is_string(1000));
    }

    #[test]
    fn fixed_point_multiply() {
        // 1.5 * 2.0 == 3.0
        assert_eq!(mul_fixed(0x18000, 0x20000), 0x30000);
        // -1.0 * 2.0 == -2.0
        assert_eq!(mul_fixed((-0x10000i32) as Word, 0x20000), (-0x20000i32) as Word);
    }

    #[test]
    fn fixed_point_divide() {
        assert_eq!(div_fixed(0x30000, 0x20000), 0x18000);
        assert_eq!(div_fixed(0x10000, 0), 0);
    }
}
