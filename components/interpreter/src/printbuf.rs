//! Nestable print buffer used by the print natives.

use core_types::{Loader, Saver, SerialError};

/// Byte accumulator with nestable segments.
///
/// Print sequences open a segment, append formatted bytes, and finish by
/// either handing the segment off or discarding it. Opening a segment
/// while another is in flight suspends the outer one; dropping the inner
/// segment resumes it, so a print interrupted by a nested print picks up
/// where it left off.
#[derive(Debug, Default)]
pub struct PrintBuf {
    buf: Vec<u8>,
    marks: Vec<usize>,
}

impl PrintBuf {
    /// Creates an empty buffer with one open segment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the current segment.
    pub fn segment(&self) -> &[u8] {
        &self.buf[self.seg_start()..]
    }

    /// Length of the current segment.
    pub fn len(&self) -> usize {
        self.buf.len() - self.seg_start()
    }

    /// True when the current segment holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Suspends the current segment and opens a fresh one.
    pub fn push_segment(&mut self) {
        self.marks.push(self.buf.len());
    }

    /// Discards the current segment, resuming the one beneath it. With no
    /// segment beneath, the buffer is simply emptied.
    pub fn drop_segment(&mut self) {
        match self.marks.pop() {
            Some(mark) => self.buf.truncate(mark),
            None => self.buf.clear(),
        }
    }

    /// Appends one byte to the current segment.
    pub fn put_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Appends bytes to the current segment.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Discards all segments and content.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.marks.clear();
    }

    pub(crate) fn save_state(&self, out: &mut Saver) -> Result<(), SerialError> {
        out.put_vln(self.marks.len() as u64)?;
        for &mark in &self.marks {
            out.put_vln(mark as u64)?;
        }
        out.put_blob(&self.buf)
    }

    pub(crate) fn load_state(&mut self, inp: &mut Loader) -> Result<(), SerialError> {
        self.clear();
        let count = inp.get_vln()? as usize;
        for _ in 0..count {
            self.marks.push(inp.get_vln()? as usize);
        }
        self.buf = inp.get_blob()?;
        if self.marks.iter().any(|&m| m > self.buf.len()) {
            return Err(SerialError::Corrupt("print segment mark"));
        }
        Ok(())
    }

    fn seg_start(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_accumulate_in_the_current_segment() {
        let mut buf = PrintBuf::new();
        buf.put_bytes(b"score: ");
        buf.put_byte(b'7');
        assert_eq!(buf.segment(), b"score: 7");
    }

    #[test]
    fn nested_segments_suspend_and_resume() {
        let mut buf = PrintBuf::new();
        buf.put_bytes(b"outer");
        buf.push_segment();
        buf.put_bytes(b"inner");
        assert_eq!(buf.segment(), b"inner");
        buf.drop_segment();
        assert_eq!(buf.segment(), b"outer");
    }

    #[test]
    fn dropping_the_only_segment_empties_the_buffer() {
        let mut buf = PrintBuf::new();
        buf.put_bytes(b"gone");
        buf.drop_segment();
        assert!(buf.is_empty());
    }

    #[test]
    fn save_load_round_trip() {
        let mut buf = PrintBuf::new();
        buf.put_bytes(b"outer");
        buf.push_segment();
        buf.put_bytes(b"inner");

        let mut bytes = Vec::new();
        buf.save_state(&mut core_types::Saver::new(&mut bytes, false)).unwrap();

        let mut restored = PrintBuf::new();
        let mut cursor = bytes.as_slice();
        restored
            .load_state(&mut core_types::Loader::new(&mut cursor, false))
            .unwrap();
        assert_eq!(restored.segment(), b"inner");
        restored.drop_segment();
        assert_eq!(restored.segment(), b"outer");
    }
}
