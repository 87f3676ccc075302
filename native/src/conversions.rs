//! Wide-string and little-endian helpers shared by the OS-facing modules.

use std::iter::once;

/// Encode a string as a NUL-terminated UTF-16 buffer for `PCWSTR` arguments.
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(once(0)).collect()
}

/// Reinterpret little-endian bytes as UTF-16 code units.
///
/// A trailing odd byte cannot form a code unit and is ignored.
pub fn bytes_to_utf16(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Decode little-endian UTF-16 bytes, replacing unpaired surrogates.
pub fn utf16_bytes_to_string(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&bytes_to_utf16(bytes))
}

/// Read a little-endian `u16` at `offset`, if in bounds.
pub fn read_u16_le(bytes: &[u8], offset: usize) -> Option<u16> {
    let slice = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([slice[0], slice[1]]))
}

/// Read a little-endian `u32` at `offset`, if in bounds.
pub fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset.checked_add(4)?)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(slice);
    Some(u32::from_le_bytes(raw))
}

/// Read a little-endian `u64` at `offset`, if in bounds.
pub fn read_u64_le(bytes: &[u8], offset: usize) -> Option<u64> {
    let slice = bytes.get(offset..offset.checked_add(8)?)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(slice);
    Some(u64::from_le_bytes(raw))
}
