//! String literal scanning, escape parsing, and table decryption.
//!
//! String tables store NUL-terminated literals with C-style escapes left
//! unprocessed. Loading a literal is two passes over the same bytes:
//! [`scan_string`] finds the terminator and the parsed length, then
//! [`parse_string`] produces the unescaped content. The two passes must
//! agree on every escape so the parse never overruns its scan.

use core_types::LoadError;

/// Result of scanning one unparsed string literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringScan {
    /// Offset of the first content byte.
    pub begin: usize,
    /// Offset of the terminating NUL.
    pub end: usize,
    /// Content length after escape parsing.
    pub len: usize,
}

/// Scans a NUL-terminated literal starting at `start`, measuring its
/// parsed length without building it. A literal that runs off the end of
/// the buffer fails the load.
pub fn scan_string(data: &[u8], start: usize) -> Result<StringScan, LoadError> {
    let mut itr = start;
    let mut len = 0usize;

    loop {
        match data.get(itr).copied() {
            None => return Err(LoadError::UnexpectedEnd),
            Some(0) => return Ok(StringScan { begin: start, end: itr, len }),
            Some(b'\\') => {
                itr += 1;
                let c = *data.get(itr).ok_or(LoadError::UnexpectedEnd)?;
                if c == 0 {
                    // Dangling escape: the literal ends here and the
                    // backslash contributes nothing.
                    return Ok(StringScan { begin: start, end: itr, len });
                }
                itr += 1;
                match c {
                    b'x' | b'X' => {
                        for _ in 0..2 {
                            if data.get(itr).is_some_and(u8::is_ascii_hexdigit) {
                                itr += 1;
                            }
                        }
                    }
                    b'0'..=b'7' => {
                        for _ in 0..2 {
                            if matches!(data.get(itr), Some(b'0'..=b'7')) {
                                itr += 1;
                            }
                        }
                    }
                    _ => {}
                }
                len += 1;
            }
            Some(_) => {
                itr += 1;
                len += 1;
            }
        }
    }
}

/// Parses the escapes in a scanned literal, producing its content.
///
/// Consumes exactly the bytes `scan_string` measured, so the result
/// length always equals the scanned length.
pub fn parse_string(data: &[u8], scan: StringScan) -> Vec<u8> {
    let mut out = Vec::with_capacity(scan.len);
    let mut itr = scan.begin;

    while itr < scan.end {
        let c = data[itr];
        itr += 1;
        if c != b'\\' {
            out.push(c);
            continue;
        }
        if itr >= scan.end {
            break;
        }

        let c = data[itr];
        itr += 1;
        match c {
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'c' => out.push(0x1C),
            b'f' => out.push(0x0C),
            b'n' => out.push(0x0A),
            b'r' => out.push(0x0D),
            b't' => out.push(0x09),
            b'v' => out.push(0x0B),
            b'x' | b'X' => {
                let mut val = 0u32;
                for _ in 0..2 {
                    match data.get(itr).copied() {
                        Some(d) if d.is_ascii_hexdigit() && itr < scan.end => {
                            val = val * 16 + u32::from((d as char).to_digit(16).unwrap_or(0));
                            itr += 1;
                        }
                        _ => break,
                    }
                }
                out.push(val as u8);
            }
            b'0'..=b'7' => {
                let mut val = u32::from(c - b'0');
                for _ in 0..2 {
                    match data.get(itr).copied() {
                        Some(d @ b'0'..=b'7') if itr < scan.end => {
                            val = val * 8 + u32::from(d - b'0');
                            itr += 1;
                        }
                        _ => break,
                    }
                }
                out.push(val as u8);
            }
            other => out.push(other),
        }
    }

    out
}

/// Decrypts one obfuscated string out of an encrypted table chunk.
///
/// The key derives from the string's offset within the chunk, and each
/// byte is XORed with the key plus half its position. Returns the
/// decrypted bytes including the terminating NUL; a string whose
/// ciphertext never decrypts to NUL fails the load.
pub fn decrypt_string(data: &[u8], offset: usize) -> Result<Vec<u8>, LoadError> {
    let key = (offset as u32).wrapping_mul(157135);
    let mut out = Vec::new();

    for (n, &byte) in data
        .get(offset..)
        .ok_or(LoadError::UnexpectedEnd)?
        .iter()
        .enumerate()
    {
        let c = byte ^ (key.wrapping_add(n as u32 / 2)) as u8;
        out.push(c);
        if c == 0 {
            return Ok(out);
        }
    }

    Err(LoadError::UnexpectedEnd)
}
