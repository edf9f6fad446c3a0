//! Primitive binary encode/decode for trace records.
//!
//! Integers are little-endian. Balance amounts are the one exception: they
//! are 16 raw big-endian bytes. Byte arrays are length-prefixed with a
//! `u32` length. There is no padding and no self-describing schema; the
//! operation discriminant fully determines the payload layout.

use std::io::{self, Read, Write};

use sdbtrace_core::Amount;

use crate::error::TraceError;

// ── Primitive writers ───────────────────────────────────────────

/// Write a single byte.
pub fn write_u8(w: &mut dyn Write, v: u8) -> Result<(), TraceError> {
    w.write_all(&[v])?;
    Ok(())
}

/// Write a boolean as a single `0`/`1` byte.
pub fn write_bool(w: &mut dyn Write, v: bool) -> Result<(), TraceError> {
    write_u8(w, u8::from(v))
}

/// Write a little-endian u32.
pub fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), TraceError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian i32.
pub fn write_i32_le(w: &mut dyn Write, v: i32) -> Result<(), TraceError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian u64.
pub fn write_u64_le(w: &mut dyn Write, v: u64) -> Result<(), TraceError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a balance amount as 16 big-endian bytes.
pub fn write_amount(w: &mut dyn Write, v: Amount) -> Result<(), TraceError> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

/// Write a length-prefixed byte array (u32 length + bytes).
pub fn write_length_prefixed_bytes(w: &mut dyn Write, b: &[u8]) -> Result<(), TraceError> {
    write_length(w, b.len())?;
    w.write_all(b)?;
    Ok(())
}

/// Write a collection length as u32.
pub fn write_length(w: &mut dyn Write, len: usize) -> Result<(), TraceError> {
    let len = u32::try_from(len).map_err(|_| TraceError::MalformedRecord {
        detail: format!("length {len} exceeds u32::MAX"),
    })?;
    write_u32_le(w, len)
}

// ── Primitive readers ───────────────────────────────────────────

/// Read a single byte.
pub fn read_u8(r: &mut dyn Read) -> Result<u8, TraceError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Read a `0`/`1` boolean byte.
pub fn read_bool(r: &mut dyn Read) -> Result<bool, TraceError> {
    match read_u8(r)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(TraceError::MalformedRecord {
            detail: format!("invalid boolean byte {other}"),
        }),
    }
}

/// Read a little-endian u32.
pub fn read_u32_le(r: &mut dyn Read) -> Result<u32, TraceError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a little-endian i32.
pub fn read_i32_le(r: &mut dyn Read) -> Result<i32, TraceError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Read a little-endian u64.
pub fn read_u64_le(r: &mut dyn Read) -> Result<u64, TraceError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a 16-byte big-endian balance amount.
pub fn read_amount(r: &mut dyn Read) -> Result<Amount, TraceError> {
    let mut buf = [0u8; 16];
    r.read_exact(&mut buf)?;
    Ok(Amount::from_be_bytes(buf))
}

/// Read a length-prefixed byte array.
pub fn read_length_prefixed_bytes(r: &mut dyn Read) -> Result<Vec<u8>, TraceError> {
    let len = read_u32_le(r)? as usize;
    let mut buf = Vec::new();
    // Grow with the data instead of trusting the prefix for the allocation.
    let read = Read::take(&mut *r, len as u64).read_to_end(&mut buf)?;
    if read != len {
        return Err(TraceError::MalformedRecord {
            detail: format!("truncated byte array: got {read} of {len} bytes"),
        });
    }
    Ok(buf)
}

/// Read the discriminant byte that starts a record.
///
/// Returns `Ok(None)` on clean EOF (no bytes available).
pub fn read_tag(r: &mut dyn Read) -> Result<Option<u8>, TraceError> {
    let mut buf = [0u8; 1];
    loop {
        match r.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TraceError::Io(e)),
        }
    }
}
