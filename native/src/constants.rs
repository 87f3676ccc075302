//! Stable numeric status codes shared with the host's retry/dispatch logic.
//!
//! The values are the Win32 ones and are available on every platform so the
//! host can decode codes carried in errors and protocol messages.

use serde::{Deserialize, Serialize};

/// Named OS status and wait codes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum NativeCode {
    ERROR_SUCCESS = 0,
    ERROR_FILE_NOT_FOUND = 2,
    ERROR_ACCESS_DENIED = 5,
    ERROR_INVALID_HANDLE = 6,
    ERROR_HANDLE_EOF = 38,
    ERROR_INVALID_PARAMETER = 87,
    ERROR_BROKEN_PIPE = 109,
    ERROR_NO_DATA = 232,
    ERROR_PIPE_NOT_CONNECTED = 233,
    ERROR_MORE_DATA = 234,
    WAIT_TIMEOUT = 258,
    ERROR_PARTIAL_COPY = 299,
    ERROR_PIPE_CONNECTED = 535,
    ERROR_PIPE_BUSY = 231,
    ERROR_OPERATION_ABORTED = 995,
    ERROR_IO_INCOMPLETE = 996,
    ERROR_IO_PENDING = 997,
    ERROR_NOT_FOUND = 1168,
    ERROR_NONE_MAPPED = 1332,
    WAIT_ABANDONED_0 = 0x80,
    WAIT_FAILED = 0xFFFF_FFFF,
}

/// Largest number of handles a single wait can observe.
pub const MAXIMUM_WAIT_OBJECTS: usize = 64;

/// Ticks per second of the native 100-nanosecond time unit.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

const ALL: &[NativeCode] = &[
    NativeCode::ERROR_SUCCESS,
    NativeCode::ERROR_FILE_NOT_FOUND,
    NativeCode::ERROR_ACCESS_DENIED,
    NativeCode::ERROR_INVALID_HANDLE,
    NativeCode::ERROR_HANDLE_EOF,
    NativeCode::ERROR_INVALID_PARAMETER,
    NativeCode::ERROR_BROKEN_PIPE,
    NativeCode::ERROR_NO_DATA,
    NativeCode::ERROR_PIPE_NOT_CONNECTED,
    NativeCode::ERROR_MORE_DATA,
    NativeCode::WAIT_TIMEOUT,
    NativeCode::ERROR_PARTIAL_COPY,
    NativeCode::ERROR_PIPE_CONNECTED,
    NativeCode::ERROR_PIPE_BUSY,
    NativeCode::ERROR_OPERATION_ABORTED,
    NativeCode::ERROR_IO_INCOMPLETE,
    NativeCode::ERROR_IO_PENDING,
    NativeCode::ERROR_NOT_FOUND,
    NativeCode::ERROR_NONE_MAPPED,
    NativeCode::WAIT_ABANDONED_0,
    NativeCode::WAIT_FAILED,
];

const ALIASES: &[(&str, NativeCode)] = &[
    ("WAIT_OBJECT_0", NativeCode::WAIT_OBJECT_0),
    ("INFINITE", NativeCode::INFINITE),
];

impl NativeCode {
    /// First signalled handle of a wait; same value as `ERROR_SUCCESS`.
    pub const WAIT_OBJECT_0: NativeCode = NativeCode::ERROR_SUCCESS;
    /// Infinite wait timeout; same value as `WAIT_FAILED`.
    pub const INFINITE: NativeCode = NativeCode::WAIT_FAILED;

    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Every named code, for hosts that mirror the table.
    pub fn all() -> &'static [NativeCode] {
        ALL
    }

    /// Names that share a value with an entry of [`NativeCode::all`].
    pub fn aliases() -> &'static [(&'static str, NativeCode)] {
        ALIASES
    }

    pub fn name(self) -> &'static str {
        match self {
            NativeCode::ERROR_SUCCESS => "ERROR_SUCCESS",
            NativeCode::ERROR_FILE_NOT_FOUND => "ERROR_FILE_NOT_FOUND",
            NativeCode::ERROR_ACCESS_DENIED => "ERROR_ACCESS_DENIED",
            NativeCode::ERROR_INVALID_HANDLE => "ERROR_INVALID_HANDLE",
            NativeCode::ERROR_HANDLE_EOF => "ERROR_HANDLE_EOF",
            NativeCode::ERROR_INVALID_PARAMETER => "ERROR_INVALID_PARAMETER",
            NativeCode::ERROR_BROKEN_PIPE => "ERROR_BROKEN_PIPE",
            NativeCode::ERROR_NO_DATA => "ERROR_NO_DATA",
            NativeCode::ERROR_PIPE_NOT_CONNECTED => "ERROR_PIPE_NOT_CONNECTED",
            NativeCode::ERROR_MORE_DATA => "ERROR_MORE_DATA",
            NativeCode::WAIT_TIMEOUT => "WAIT_TIMEOUT",
            NativeCode::ERROR_PARTIAL_COPY => "ERROR_PARTIAL_COPY",
            NativeCode::ERROR_PIPE_CONNECTED => "ERROR_PIPE_CONNECTED",
            NativeCode::ERROR_PIPE_BUSY => "ERROR_PIPE_BUSY",
            NativeCode::ERROR_OPERATION_ABORTED => "ERROR_OPERATION_ABORTED",
            NativeCode::ERROR_IO_INCOMPLETE => "ERROR_IO_INCOMPLETE",
            NativeCode::ERROR_IO_PENDING => "ERROR_IO_PENDING",
            NativeCode::ERROR_NOT_FOUND => "ERROR_NOT_FOUND",
            NativeCode::ERROR_NONE_MAPPED => "ERROR_NONE_MAPPED",
            NativeCode::WAIT_ABANDONED_0 => "WAIT_ABANDONED_0",
            NativeCode::WAIT_FAILED => "WAIT_FAILED",
        }
    }
}

impl PartialEq<NativeCode> for u32 {
    fn eq(&self, other: &NativeCode) -> bool {
        *self == other.code()
    }
}

/// Extract a Win32 error code from an HRESULT produced by `HRESULT_FROM_WIN32`.
///
/// Other HRESULTs are returned unchanged.
pub fn win32_code_from_hresult(hresult: i32) -> u32 {
    let raw = hresult as u32;
    if raw & 0xFFFF_0000 == 0x8007_0000 {
        raw & 0xFFFF
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_win32_values() {
        assert_eq!(NativeCode::ERROR_IO_PENDING.code(), 997);
        assert_eq!(NativeCode::ERROR_BROKEN_PIPE.code(), 109);
        assert_eq!(NativeCode::ERROR_PIPE_BUSY.code(), 231);
        assert_eq!(NativeCode::WAIT_TIMEOUT.code(), 258);
        assert_eq!(NativeCode::INFINITE.code(), u32::MAX);
        assert_eq!(NativeCode::WAIT_OBJECT_0.code(), 0);
    }

    #[test]
    fn wait_aliases_resolve_to_table_entries() {
        for (name, code) in NativeCode::aliases() {
            assert_eq!(NativeCode::from_code(code.code()), Some(*code), "{}", name);
        }
        assert_eq!(NativeCode::from_code(0), Some(NativeCode::WAIT_OBJECT_0));
        assert_eq!(NativeCode::from_code(u32::MAX), Some(NativeCode::INFINITE));
        assert!(u32::MAX == NativeCode::INFINITE);
    }

    #[test]
    fn from_code_round_trips_every_entry() {
        for code in NativeCode::all() {
            assert_eq!(NativeCode::from_code(code.code()), Some(*code));
        }
        assert_eq!(NativeCode::from_code(12345), None);
    }

    #[test]
    fn table_has_no_duplicate_values() {
        let mut values: Vec<u32> = NativeCode::all().iter().map(|c| c.code()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), NativeCode::all().len());
    }

    #[test]
    fn raw_codes_compare_against_names() {
        assert!(997u32 == NativeCode::ERROR_IO_PENDING);
        assert!(998u32 != NativeCode::ERROR_IO_PENDING);
    }

    #[test]
    fn hresult_unwraps_win32_facility() {
        assert_eq!(win32_code_from_hresult(0x8007_0005u32 as i32), 5);
        assert_eq!(win32_code_from_hresult(0x8007_03E5u32 as i32), 997);
        assert_eq!(win32_code_from_hresult(0x8000_4005u32 as i32), 0x8000_4005);
    }

    #[test]
    fn names_serialize_verbatim() {
        let json = serde_json::to_string(&NativeCode::ERROR_MORE_DATA).unwrap();
        assert_eq!(json, "\"ERROR_MORE_DATA\"");
        assert_eq!(NativeCode::ERROR_MORE_DATA.name(), "ERROR_MORE_DATA");
    }
}
