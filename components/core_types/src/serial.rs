//! Binary encodings shared by the module loader and the persisted-state
//! format.
//!
//! Module bytes are read through [`ByteReader`], a little-endian cursor
//! over an in-memory buffer. Persisted state flows through [`Saver`] and
//! [`Loader`], which encode integers as variable-length numbers and can
//! frame each object with a structural [`Signature`] for verification.

use crate::error::{LoadError, SerialError};
use crate::word::Word;

use std::io::{Read, Write};

/// Little-endian cursor over a module byte buffer.
///
/// Every read checks bounds and reports [`LoadError::UnexpectedEnd`]
/// instead of panicking, so a truncated module fails its load cleanly.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Wraps a byte buffer, positioned at its start.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Repositions the cursor.
    pub fn seek(&mut self, pos: usize) -> Result<(), LoadError> {
        if pos > self.data.len() {
            return Err(LoadError::UnexpectedEnd);
        }
        self.pos = pos;
        Ok(())
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True once the cursor has consumed the whole buffer.
    pub fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    /// Reads one byte.
    pub fn u8(&mut self) -> Result<u8, LoadError> {
        let b = *self.data.get(self.pos).ok_or(LoadError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads a little-endian half word.
    pub fn u16(&mut self) -> Result<u16, LoadError> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a little-endian word.
    pub fn u32(&mut self) -> Result<Word, LoadError> {
        let bytes = self.bytes(4)?;
        Ok(Word::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads `count` raw bytes.
    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8], LoadError> {
        let end = self.pos.checked_add(count).ok_or(LoadError::UnexpectedEnd)?;
        let slice = self.data.get(self.pos..end).ok_or(LoadError::UnexpectedEnd)?;
        self.pos = end;
        Ok(slice)
    }

    /// Skips `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<(), LoadError> {
        self.bytes(count).map(|_| ())
    }
}

/// Structural signatures framing persisted objects.
///
/// Each object class writes its signature before its payload and the
/// bitwise complement after it, when signature verification is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// The environment root.
    Environment,
    /// The interned string table.
    StringTable,
    /// A global scope.
    GlobalScope,
    /// A hub scope.
    HubScope,
    /// A map scope.
    MapScope,
    /// A module's per-map storage scope.
    ModuleScope,
    /// A script thread.
    Thread,
    /// A sparse word array.
    Array,
}

impl Signature {
    /// The 4-byte constant for this object class, as a little-endian word.
    pub fn value(self) -> u32 {
        let tag: &[u8; 4] = match self {
            Signature::Environment => b"ENVR",
            Signature::StringTable => b"STRT",
            Signature::GlobalScope => b"GSCP",
            Signature::HubScope => b"HSCP",
            Signature::MapScope => b"MSCP",
            Signature::ModuleScope => b"MODS",
            Signature::Thread => b"THRD",
            Signature::Array => b"ARAY",
        };
        u32::from_le_bytes(*tag)
    }
}

/// Persisted-state writer.
pub struct Saver<'a> {
    out: &'a mut dyn Write,
    signatures: bool,
}

impl<'a> Saver<'a> {
    /// Wraps an output stream. `signatures` controls whether structural
    /// signatures are emitted around each object.
    pub fn new(out: &'a mut dyn Write, signatures: bool) -> Self {
        Self { out, signatures }
    }

    /// Whether signature framing is enabled.
    pub fn signatures(&self) -> bool {
        self.signatures
    }

    /// Writes raw bytes.
    pub fn put_raw(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    /// Writes one byte.
    pub fn put_byte(&mut self, byte: u8) -> Result<(), SerialError> {
        self.put_raw(&[byte])
    }

    /// Writes a variable-length number: 7 bits per byte, most significant
    /// group first, high bit marking continuation.
    pub fn put_vln(&mut self, mut value: u64) -> Result<(), SerialError> {
        let mut buf = [0u8; 10];
        let mut idx = buf.len() - 1;
        buf[idx] = (value & 0x7F) as u8;
        value >>= 7;
        while value != 0 {
            idx -= 1;
            buf[idx] = 0x80 | (value & 0x7F) as u8;
            value >>= 7;
        }
        self.put_raw(&buf[idx..])
    }

    /// Writes a machine word as a variable-length number.
    pub fn put_word(&mut self, value: Word) -> Result<(), SerialError> {
        self.put_vln(u64::from(value))
    }

    /// Writes a length-prefixed byte string.
    pub fn put_blob(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        self.put_vln(bytes.len() as u64)?;
        self.put_raw(bytes)
    }

    /// Opens an object: writes its signature when framing is enabled.
    pub fn sign(&mut self, sig: Signature) -> Result<(), SerialError> {
        if self.signatures {
            self.put_raw(&sig.value().to_le_bytes())?;
        }
        Ok(())
    }

    /// Closes an object: writes the inverted signature when framing is
    /// enabled.
    pub fn sign_end(&mut self, sig: Signature) -> Result<(), SerialError> {
        if self.signatures {
            self.put_raw(&(!sig.value()).to_le_bytes())?;
        }
        Ok(())
    }
}

/// Persisted-state reader.
pub struct Loader<'a> {
    inp: &'a mut dyn Read,
    signatures: bool,
}

impl<'a> Loader<'a> {
    /// Wraps an input stream. `signatures` must match the flag recorded in
    /// the file header.
    pub fn new(inp: &'a mut dyn Read, signatures: bool) -> Self {
        Self { inp, signatures }
    }

    /// Whether signature framing is expected.
    pub fn signatures(&self) -> bool {
        self.signatures
    }

    /// Reads exactly `buf.len()` bytes.
    pub fn get_raw(&mut self, buf: &mut [u8]) -> Result<(), SerialError> {
        self.inp.read_exact(buf)?;
        Ok(())
    }

    /// Reads one byte.
    pub fn get_byte(&mut self) -> Result<u8, SerialError> {
        let mut buf = [0u8; 1];
        self.get_raw(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a variable-length number.
    pub fn get_vln(&mut self) -> Result<u64, SerialError> {
        let mut value: u64 = 0;
        loop {
            let byte = self.get_byte()?;
            value = (value << 7) | u64::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    /// Reads a machine word.
    pub fn get_word(&mut self) -> Result<Word, SerialError> {
        let value = self.get_vln()?;
        Word::try_from(value).map_err(|_| SerialError::Corrupt("word out of range"))
    }

    /// Reads a length-prefixed byte string.
    pub fn get_blob(&mut self) -> Result<Vec<u8>, SerialError> {
        let len = self.get_vln()? as usize;
        let mut buf = vec![0u8; len];
        self.get_raw(&mut buf)?;
        Ok(buf)
    }

    /// Verifies an object's opening signature when framing is enabled.
    pub fn expect(&mut self, sig: Signature) -> Result<(), SerialError> {
        self.check_sig(sig.value())
    }

    /// Verifies an object's closing (inverted) signature.
    pub fn expect_end(&mut self, sig: Signature) -> Result<(), SerialError> {
        self.check_sig(!sig.value())
    }

    fn check_sig(&mut self, expected: u32) -> Result<(), SerialError> {
        if !self.signatures {
            return Ok(());
        }
        let mut buf = [0u8; 4];
        self.get_raw(&mut buf)?;
        let found = u32::from_le_bytes(buf);
        if found != expected {
            return Err(SerialError::SignatureMismatch { expected, found });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vln_round_trip(value: u64) {
        let mut bytes = Vec::new();
        {
            let mut saver = Saver::new(&mut bytes, false);
            saver.put_vln(value).unwrap();
        }
        let mut cursor = bytes.as_slice();
        let mut loader = Loader::new(&mut cursor, false);
        assert_eq!(loader.get_vln().unwrap(), value);
    }

    #[test]
    fn vln_encodings() {
        for value in [0, 1, 127, 128, 300, 0xFFFF, u64::from(u32::MAX), u64::MAX] {
            vln_round_trip(value);
        }
    }

    #[test]
    fn vln_small_values_are_one_byte() {
        let mut bytes = Vec::new();
        Saver::new(&mut bytes, false).put_vln(127).unwrap();
        assert_eq!(bytes, vec![127]);
    }

    #[test]
    fn signature_framing_round_trip() {
        let mut bytes = Vec::new();
        {
            let mut saver = Saver::new(&mut bytes, true);
            saver.sign(Signature::Thread).unwrap();
            saver.put_word(7).unwrap();
            saver.sign_end(Signature::Thread).unwrap();
        }
        let mut cursor = bytes.as_slice();
        let mut loader = Loader::new(&mut cursor, true);
        loader.expect(Signature::Thread).unwrap();
        assert_eq!(loader.get_word().unwrap(), 7);
        loader.expect_end(Signature::Thread).unwrap();
    }

    #[test]
    fn signature_mismatch_is_reported() {
        let mut bytes = Vec::new();
        {
            let mut saver = Saver::new(&mut bytes, true);
            saver.sign(Signature::Array).unwrap();
        }
        let mut cursor = bytes.as_slice();
        let mut loader = Loader::new(&mut cursor, true);
        let err = loader.expect(Signature::Thread).unwrap_err();
        assert!(matches!(err, SerialError::SignatureMismatch { .. }));
    }

    #[test]
    fn byte_reader_bounds() {
        let data = [1u8, 2, 3, 4, 5];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.u8().unwrap(), 1);
        assert_eq!(reader.u32().unwrap(), u32::from_le_bytes([2, 3, 4, 5]));
        assert!(reader.at_end());
        assert!(matches!(reader.u8(), Err(LoadError::UnexpectedEnd)));
    }
}
