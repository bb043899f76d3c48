//! Sparse word array backed by a four-level trie.

use core_types::{Loader, Saver, SerialError, Signature, Word};

const BRANCH: usize = 256;

type Page = [Word; BRANCH];
type Segm = [Option<Box<Page>>; BRANCH];
type Bank = [Option<Box<Segm>>; BRANCH];
type Top = [Option<Box<Bank>>; BRANCH];

fn empty_segm() -> Box<Segm> {
    Box::new(std::array::from_fn(|_| None))
}

fn empty_bank() -> Box<Bank> {
    Box::new(std::array::from_fn(|_| None))
}

fn empty_top() -> Box<Top> {
    Box::new(std::array::from_fn(|_| None))
}

/// Sparse mapping from a 32-bit index to a 32-bit word.
///
/// Storage is a 256-way trie (top, bank, segment, page) allocated on first
/// write per level. Reads never allocate; an index with no allocated path
/// reads as zero, indistinguishable from an index explicitly set to zero.
///
/// # Examples
///
/// ```
/// use memory_manager::WordArray;
///
/// let mut arr = WordArray::new();
/// assert_eq!(arr.get(123_456_789), 0);
/// *arr.get_mut(123_456_789) = 7;
/// assert_eq!(arr.get(123_456_789), 7);
/// ```
#[derive(Debug, Default)]
pub struct WordArray {
    top: Option<Box<Top>>,
}

impl WordArray {
    /// Creates an array with nothing allocated.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn split(idx: Word) -> (usize, usize, usize, usize) {
        (
            (idx >> 24) as usize & 0xFF,
            (idx >> 16) as usize & 0xFF,
            (idx >> 8) as usize & 0xFF,
            idx as usize & 0xFF,
        )
    }

    /// Reads the word at `idx` without allocating.
    pub fn get(&self, idx: Word) -> Word {
        let (t, b, s, p) = Self::split(idx);
        self.top
            .as_ref()
            .and_then(|top| top[t].as_ref())
            .and_then(|bank| bank[b].as_ref())
            .and_then(|segm| segm[s].as_ref())
            .map_or(0, |page| page[p])
    }

    /// Returns a mutable cell for `idx`, allocating the path to it.
    pub fn get_mut(&mut self, idx: Word) -> &mut Word {
        let (t, b, s, p) = Self::split(idx);
        let top = self.top.get_or_insert_with(empty_top);
        let bank = top[t].get_or_insert_with(empty_bank);
        let segm = bank[b].get_or_insert_with(empty_segm);
        let page = segm[s].get_or_insert_with(|| Box::new([0; BRANCH]));
        &mut page[p]
    }

    /// Writes the word at `idx`.
    pub fn set(&mut self, idx: Word, value: Word) {
        *self.get_mut(idx) = value;
    }

    /// Frees all storage; every index reads as zero again.
    pub fn clear(&mut self) {
        self.top = None;
    }

    /// Calls `f` for every allocated cell. Unallocated indices are skipped
    /// even though they logically hold zero.
    pub fn for_each(&self, mut f: impl FnMut(Word)) {
        let Some(top) = self.top.as_ref() else { return };
        for bank in top.iter().flatten() {
            for segm in bank.iter().flatten() {
                for page in segm.iter().flatten() {
                    for &word in page.iter() {
                        f(word);
                    }
                }
            }
        }
    }

    /// Writes the array: presence byte per node at each level, then the
    /// page words.
    pub fn save_state(&self, out: &mut Saver) -> Result<(), SerialError> {
        out.sign(Signature::Array)?;
        match self.top.as_ref() {
            None => out.put_byte(0)?,
            Some(top) => {
                out.put_byte(1)?;
                for bank in top.iter() {
                    let Some(bank) = bank else {
                        out.put_byte(0)?;
                        continue;
                    };
                    out.put_byte(1)?;
                    for segm in bank.iter() {
                        let Some(segm) = segm else {
                            out.put_byte(0)?;
                            continue;
                        };
                        out.put_byte(1)?;
                        for page in segm.iter() {
                            let Some(page) = page else {
                                out.put_byte(0)?;
                                continue;
                            };
                            out.put_byte(1)?;
                            for &word in page.iter() {
                                out.put_word(word)?;
                            }
                        }
                    }
                }
            }
        }
        out.sign_end(Signature::Array)
    }

    /// Replaces the array from a saved stream.
    pub fn load_state(&mut self, inp: &mut Loader) -> Result<(), SerialError> {
        inp.expect(Signature::Array)?;
        self.clear();
        if inp.get_byte()? != 0 {
            let top = self.top.get_or_insert_with(empty_top);
            for bank in top.iter_mut() {
                if inp.get_byte()? == 0 {
                    continue;
                }
                let bank = bank.get_or_insert_with(empty_bank);
                for segm in bank.iter_mut() {
                    if inp.get_byte()? == 0 {
                        continue;
                    }
                    let segm = segm.get_or_insert_with(empty_segm);
                    for page in segm.iter_mut() {
                        if inp.get_byte()? == 0 {
                            continue;
                        }
                        let page = page.get_or_insert_with(|| Box::new([0; BRANCH]));
                        for word in page.iter_mut() {
                            *word = inp.get_word()?;
                        }
                    }
                }
            }
        }
        inp.expect_end(Signature::Array)
    }
}
