//! Framed stream I/O.
//!
//! Three primitives over any connected byte stream: a retry-transparent
//! full write, an exact-length read, and a capped line read that leaves
//! the stream framed-aligned even when the line is too long to fit in the
//! caller's buffer. These are the only I/O primitives the peer protocol
//! codec (`protocol`) and its callers ever touch directly.

use std::io::{ErrorKind, Read, Write};

use crate::error::{Error, Result};

/// Writes every byte of `buf` to `stream`, retrying on `Interrupted` and
/// failing with [`Error::Closed`] on a zero-length write (the stream is
/// considered closed from the peer's side in that case).
pub fn write_all<W: Write>(stream: &mut W, buf: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => return Err(Error::Closed),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

/// Reads exactly `n` bytes from `stream`, failing with [`Error::Truncated`]
/// if the peer closes the connection before `n` bytes have arrived.
pub fn read_exact<R: Read>(stream: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut read = 0;
    while read < n {
        match stream.read(&mut buf[read..]) {
            Ok(0) => return Err(Error::Truncated),
            Ok(k) => read += k,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(buf)
}

/// Reads bytes until the first `\n` or until `cap - 1` bytes have been
/// stored, whichever comes first. If the line exceeds `cap - 1` bytes, the
/// remainder up to (and including) the terminator is read and discarded so
/// the stream stays framed-aligned for the next read. Returns the stored
/// bytes, with a trailing `\r\n` or `\n` stripped. On EOF before any
/// terminator, returns whatever was stored so far (possibly empty).
///
/// # Panics
///
/// Panics if `cap < 2`.
pub fn read_line<R: Read>(stream: &mut R, cap: usize) -> Result<Vec<u8>> {
    assert!(cap >= 2, "read_line cap must be at least 2");

    let mut stored = Vec::with_capacity(cap - 1);
    let mut overflowing = false;
    let mut byte = [0u8; 1];

    loop {
        match stream.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                let c = byte[0];
                if c == b'\n' {
                    break;
                }
                if stored.len() < cap - 1 {
                    stored.push(c);
                } else {
                    overflowing = true;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    let _ = overflowing; // kept only to document the "discard the rest" path
    if stored.last() == Some(&b'\r') {
        stored.pop();
    }
    Ok(stored)
}
