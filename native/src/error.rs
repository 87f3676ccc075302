//! Error types shared by the introspection and pipe layers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for all native probe operations.
///
/// Variants carry the raw OS error code where the failure came from an OS call,
/// so callers can still dispatch on [`crate::constants::NativeCode`].
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Access denied to process {pid} (os error {code})")]
    AccessDenied { pid: u32, code: u32 },

    #[error("Process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("Process {pid} not accessible (os error {code})")]
    ProcessNotAccessible { pid: u32, code: u32 },

    #[error("Remote read of {what} at {address:#x} refused (os error {code})")]
    RemoteReadFailed {
        what: &'static str,
        address: u64,
        code: u32,
    },

    #[error("Partial remote read at {address:#x}: {read} of {requested} bytes")]
    PartialRead {
        address: u64,
        requested: usize,
        read: usize,
    },

    #[error("Remote address {address:#x} is not readable")]
    InvalidPointer { address: u64 },

    #[error("Unsupported process layout: {0}")]
    UnsupportedPlatform(String),

    #[error("{0} is not implemented on this platform")]
    NotImplemented(&'static str),

    #[error("Failed to create pipe '{name}' (os error {code})")]
    CreationFailed { name: String, code: u32 },

    #[error("Pipe '{0}' not found")]
    NotFound(String),

    #[error("Pipe '{0}' busy: all instances in use")]
    Busy(String),

    #[error("Operation on a closed or invalid handle")]
    InvalidHandle,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("An overlapped operation is already in flight on this slot")]
    InFlight,

    #[error("Invalid pipe state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Buffer range {offset}+{length} exceeds capacity {capacity}")]
    BufferRange {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    #[error("Message too large: {size} bytes (limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Malformed remote structure: {0}")]
    Malformed(String),

    #[error("OS error {code} in {context}")]
    Os { context: &'static str, code: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat error classification exposed across the JSON protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AccessDenied,
    ProcessNotFound,
    ProcessNotAccessible,
    RemoteReadFailed,
    PartialRead,
    InvalidPointer,
    UnsupportedPlatform,
    NotImplemented,
    CreationFailed,
    NotFound,
    Busy,
    InvalidHandle,
    Cancelled,
    InvalidState,
    InvalidArgument,
    Malformed,
    Os,
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::AccessDenied { .. } => ErrorKind::AccessDenied,
            ProbeError::ProcessNotFound { .. } => ErrorKind::ProcessNotFound,
            ProbeError::ProcessNotAccessible { .. } => ErrorKind::ProcessNotAccessible,
            ProbeError::RemoteReadFailed { .. } => ErrorKind::RemoteReadFailed,
            ProbeError::PartialRead { .. } => ErrorKind::PartialRead,
            ProbeError::InvalidPointer { .. } => ErrorKind::InvalidPointer,
            ProbeError::UnsupportedPlatform(_) => ErrorKind::UnsupportedPlatform,
            ProbeError::NotImplemented(_) => ErrorKind::NotImplemented,
            ProbeError::CreationFailed { .. } => ErrorKind::CreationFailed,
            ProbeError::NotFound(_) => ErrorKind::NotFound,
            ProbeError::Busy(_) => ErrorKind::Busy,
            ProbeError::InvalidHandle => ErrorKind::InvalidHandle,
            ProbeError::Cancelled => ErrorKind::Cancelled,
            ProbeError::InFlight | ProbeError::InvalidState { .. } => ErrorKind::InvalidState,
            ProbeError::BufferRange { .. } | ProbeError::MessageTooLarge { .. } => {
                ErrorKind::InvalidArgument
            }
            ProbeError::Malformed(_) | ProbeError::Json(_) => ErrorKind::Malformed,
            ProbeError::Os { .. } => ErrorKind::Os,
        }
    }

    /// Raw OS error code carried by this error, if any.
    pub fn os_code(&self) -> Option<u32> {
        match self {
            ProbeError::AccessDenied { code, .. }
            | ProbeError::ProcessNotAccessible { code, .. }
            | ProbeError::RemoteReadFailed { code, .. }
            | ProbeError::CreationFailed { code, .. }
            | ProbeError::Os { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the host may reasonably retry the same call later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProbeError::Busy(_) | ProbeError::PartialRead { .. } | ProbeError::InFlight
        )
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Win32 error code carried by a `windows` crate error.
#[cfg(windows)]
pub fn win32_code(err: &windows::core::Error) -> u32 {
    crate::constants::win32_code_from_hresult(err.code().0)
}

#[cfg(windows)]
impl ProbeError {
    pub(crate) fn os(context: &'static str, err: &windows::core::Error) -> Self {
        ProbeError::Os {
            context,
            code: win32_code(err),
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for ProbeError {
    fn from(err: windows::core::Error) -> Self {
        ProbeError::os("windows", &err)
    }
}

/// Calling thread's last OS error code.
#[cfg(windows)]
pub fn last_os_error() -> u32 {
    unsafe { windows::Win32::Foundation::GetLastError().0 }
}

/// Calling thread's last OS error code.
#[cfg(not(windows))]
pub fn last_os_error() -> u32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or_default() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            ProbeError::InvalidPointer { address: 0x1000 }.kind(),
            ErrorKind::InvalidPointer
        );
        assert_eq!(
            ProbeError::Busy("p".to_string()).kind(),
            ErrorKind::Busy
        );
        assert_eq!(ProbeError::InFlight.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn os_code_is_exposed() {
        let err = ProbeError::AccessDenied { pid: 4, code: 5 };
        assert_eq!(err.os_code(), Some(5));
        assert_eq!(ProbeError::InvalidHandle.os_code(), None);
    }

    #[test]
    fn busy_is_transient_but_access_denied_is_not() {
        assert!(ProbeError::Busy("p".to_string()).is_transient());
        assert!(!ProbeError::AccessDenied { pid: 1, code: 5 }.is_transient());
    }

    #[test]
    fn messages_render_addresses_in_hex() {
        let err = ProbeError::InvalidPointer { address: 0x7ff0 };
        assert_eq!(err.to_string(), "Remote address 0x7ff0 is not readable");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ProcessNotAccessible).unwrap();
        assert_eq!(json, "\"process_not_accessible\"");
    }
}
