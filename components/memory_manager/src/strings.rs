//! Interned string table with lock counts and two-phase collection.

use core_types::{Loader, Saver, SerialError, Signature, StringIdx};

use std::collections::HashMap;
use std::rc::Rc;

/// One interned string.
///
/// Content is immutable for the entry's lifetime. The lock count pins the
/// entry against collection while any live execution frame, register, or
/// deferred action references it; the mark bit records reachability during
/// a collection pass.
#[derive(Debug, Clone)]
pub struct StringEntry {
    data: Rc<[u8]>,
    lock: u32,
    marked: bool,
    len0: usize,
}

impl StringEntry {
    fn new(data: Rc<[u8]>) -> Self {
        let len0 = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Self { data, lock: 0, marked: false, len0 }
    }

    /// String content. May contain interior NUL bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Full content length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for the empty string.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length up to the first interior NUL. Script natives that treat
    /// strings as C strings use this instead of [`StringEntry::len`].
    pub fn len0(&self) -> usize {
        self.len0
    }

    /// Current lock count.
    pub fn lock_count(&self) -> u32 {
        self.lock
    }

    /// Byte at `i`, or NUL when out of range.
    pub fn get(&self, i: usize) -> u8 {
        self.data.get(i).copied().unwrap_or(0)
    }
}

/// Deduplicated string storage addressed by [`StringIdx`] handles.
///
/// Interning the same byte sequence twice yields the same handle. Freed
/// handles are recycled through a free list so the table stays dense
/// across collection cycles.
///
/// # Examples
///
/// ```
/// use memory_manager::StringTable;
///
/// let mut table = StringTable::new();
/// let a = table.intern(b"switch01");
/// let b = table.intern(b"switch01");
/// assert_eq!(a, b);
/// assert_eq!(table.get(a), b"switch01");
/// ```
#[derive(Debug, Default)]
pub struct StringTable {
    slots: Vec<Option<StringEntry>>,
    by_data: HashMap<Rc<[u8]>, StringIdx>,
    free: Vec<StringIdx>,
}

impl StringTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a byte sequence, returning its handle. Returns the existing
    /// handle when the content is already present.
    pub fn intern(&mut self, bytes: &[u8]) -> StringIdx {
        if let Some(&idx) = self.by_data.get(bytes) {
            return idx;
        }
        let data: Rc<[u8]> = Rc::from(bytes);
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(StringEntry::new(Rc::clone(&data)));
                idx
            }
            None => {
                let idx = self.slots.len() as StringIdx;
                self.slots.push(Some(StringEntry::new(Rc::clone(&data))));
                idx
            }
        };
        self.by_data.insert(data, idx);
        idx
    }

    /// Content for a handle. Out-of-range or freed handles resolve to the
    /// permanent none string (empty).
    pub fn get(&self, idx: StringIdx) -> &[u8] {
        self.entry(idx).map(StringEntry::bytes).unwrap_or(b"")
    }

    /// Entry for a handle, when live.
    pub fn entry(&self, idx: StringIdx) -> Option<&StringEntry> {
        self.slots.get(idx as usize).and_then(Option::as_ref)
    }

    /// Number of live strings.
    pub fn len(&self) -> usize {
        self.by_data.len()
    }

    /// True when no strings are interned.
    pub fn is_empty(&self) -> bool {
        self.by_data.is_empty()
    }

    /// Number of table slots, live or free.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Increments a handle's lock count. Ignored for dead handles, which
    /// resolve to the uncollectible none string anyway.
    pub fn lock(&mut self, idx: StringIdx) {
        if let Some(ent) = self.slots.get_mut(idx as usize).and_then(Option::as_mut) {
            ent.lock += 1;
        }
    }

    /// Decrements a handle's lock count.
    pub fn unlock(&mut self, idx: StringIdx) {
        if let Some(ent) = self.slots.get_mut(idx as usize).and_then(Option::as_mut) {
            ent.lock = ent.lock.saturating_sub(1);
        }
    }

    /// Marks a handle reachable for the current collection pass.
    pub fn mark(&mut self, idx: StringIdx) {
        if let Some(ent) = self.slots.get_mut(idx as usize).and_then(Option::as_mut) {
            ent.marked = true;
        }
    }

    /// Opens a collection pass: clears every reachability mark. The caller
    /// must re-mark or re-lock every reachable string before
    /// [`StringTable::collect_end`].
    pub fn collect_begin(&mut self) {
        for ent in self.slots.iter_mut().flatten() {
            ent.marked = false;
        }
    }

    /// Closes a collection pass: frees every unlocked, unmarked string and
    /// recycles its handle.
    pub fn collect_end(&mut self) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let dead = matches!(slot, Some(ent) if ent.lock == 0 && !ent.marked);
            if dead {
                if let Some(ent) = slot.take() {
                    self.by_data.remove(&ent.data);
                    self.free.push(idx as StringIdx);
                }
            }
        }
    }

    /// Discards every string and handle.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_data.clear();
        self.free.clear();
    }

    /// Writes the table: slot count, then per slot a presence byte
    /// followed by content and lock count.
    pub fn save_state(&self, out: &mut Saver) -> Result<(), SerialError> {
        out.sign(Signature::StringTable)?;
        out.put_vln(self.slots.len() as u64)?;
        for slot in &self.slots {
            match slot {
                Some(ent) => {
                    out.put_byte(1)?;
                    out.put_blob(&ent.data)?;
                    out.put_vln(u64::from(ent.lock))?;
                }
                None => out.put_byte(0)?,
            }
        }
        out.sign_end(Signature::StringTable)
    }

    /// Replaces the table from a saved stream. Handle values are preserved
    /// exactly, so words encoding string handles stay valid.
    pub fn load_state(&mut self, inp: &mut Loader) -> Result<(), SerialError> {
        inp.expect(Signature::StringTable)?;
        self.clear();
        let count = inp.get_vln()? as usize;
        self.slots.reserve(count);
        for idx in 0..count {
            if inp.get_byte()? != 0 {
                let data: Rc<[u8]> = Rc::from(inp.get_blob()?);
                let lock = inp.get_vln()?;
                let mut ent = StringEntry::new(Rc::clone(&data));
                ent.lock =
                    u32::try_from(lock).map_err(|_| SerialError::Corrupt("lock count"))?;
                self.slots.push(Some(ent));
                self.by_data.insert(data, idx as StringIdx);
            } else {
                self.slots.push(None);
                self.free.push(idx as StringIdx);
            }
        }
        inp.expect_end(Signature::StringTable)
    }
}
