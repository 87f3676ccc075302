//! Pipe lifecycle, completion and wait outcomes.
//!
//! Everything here is platform independent; the OS-facing transport only
//! feeds raw codes into these decoders.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{NativeCode, MAXIMUM_WAIT_OBJECTS};
use crate::error::{last_os_error, ProbeError, Result};

/// Lifecycle of a pipe endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipeState {
    /// Server instance created, no client yet.
    Unconnected,
    ConnectPending,
    Connected,
    /// Client end opened onto an existing server.
    Opened,
    /// Peer went away; a server may connect again.
    Disconnected,
    Closed,
}

impl PipeState {
    pub fn name(self) -> &'static str {
        match self {
            PipeState::Unconnected => "unconnected",
            PipeState::ConnectPending => "connect pending",
            PipeState::Connected => "connected",
            PipeState::Opened => "opened",
            PipeState::Disconnected => "disconnected",
            PipeState::Closed => "closed",
        }
    }

    /// Reads and writes are allowed.
    pub fn is_open(self) -> bool {
        matches!(self, PipeState::Connected | PipeState::Opened)
    }

    pub fn can_connect(self) -> bool {
        matches!(self, PipeState::Unconnected | PipeState::Disconnected)
    }

    /// Check that `operation` is legal in this state.
    pub fn require_open(self, operation: &'static str) -> Result<()> {
        match self {
            PipeState::Closed => Err(ProbeError::InvalidHandle),
            s if s.is_open() => Ok(()),
            s => Err(ProbeError::InvalidState {
                operation,
                state: s.name(),
            }),
        }
    }

    pub fn require_connectable(self) -> Result<()> {
        match self {
            PipeState::Closed => Err(ProbeError::InvalidHandle),
            s if s.can_connect() => Ok(()),
            s => Err(ProbeError::InvalidState {
                operation: "connect",
                state: s.name(),
            }),
        }
    }
}

/// What an overlapped operation was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Connect,
    Read,
    Write,
}

/// Completion state of an overlapped operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoOutcome {
    Pending,
    Complete(u32),
    /// A message read filled the buffer; more of the same message remains.
    MoreData(u32),
    /// Aborted; carries any bytes moved before the cancel took effect.
    Cancelled(u32),
    Failed { code: u32, bytes: u32 },
}

impl IoOutcome {
    /// Classify the result of a completion query.
    pub fn from_os(success: bool, bytes: u32, code: u32) -> Self {
        if success {
            return IoOutcome::Complete(bytes);
        }
        match code {
            c if c == NativeCode::ERROR_IO_INCOMPLETE || c == NativeCode::ERROR_IO_PENDING => {
                IoOutcome::Pending
            }
            c if c == NativeCode::ERROR_OPERATION_ABORTED => IoOutcome::Cancelled(bytes),
            c if c == NativeCode::ERROR_MORE_DATA => IoOutcome::MoreData(bytes),
            code => IoOutcome::Failed { code, bytes },
        }
    }

    /// Failure with no bytes transferred.
    pub fn failed(code: u32) -> Self {
        IoOutcome::Failed { code, bytes: 0 }
    }

    /// Encode as the legacy integer: `n` on success, `-(n)-1` otherwise.
    pub fn to_legacy(self) -> i64 {
        match self {
            IoOutcome::Complete(n) => n as i64,
            IoOutcome::Pending => -1,
            IoOutcome::MoreData(n)
            | IoOutcome::Cancelled(n)
            | IoOutcome::Failed { bytes: n, .. } => -(n as i64) - 1,
        }
    }

    /// Decode a legacy integer, using `last_error` to classify failures.
    pub fn from_legacy(value: i64, last_error: u32) -> Self {
        if value >= 0 {
            return IoOutcome::Complete(value.min(u32::MAX as i64) as u32);
        }
        let bytes = (-(value + 1)).min(u32::MAX as i64) as u32;
        IoOutcome::from_os(false, bytes, last_error)
    }

    /// Bytes transferred; `None` while pending.
    pub fn bytes(self) -> Option<u32> {
        match self {
            IoOutcome::Pending => None,
            IoOutcome::Complete(n)
            | IoOutcome::MoreData(n)
            | IoOutcome::Cancelled(n)
            | IoOutcome::Failed { bytes: n, .. } => Some(n),
        }
    }

    /// OS error code of a failed or cancelled operation.
    pub fn error_code(self) -> Option<u32> {
        match self {
            IoOutcome::Failed { code, .. } => Some(code),
            IoOutcome::Cancelled(_) => Some(NativeCode::ERROR_OPERATION_ABORTED.code()),
            _ => None,
        }
    }

    pub fn is_finished(self) -> bool {
        !matches!(self, IoOutcome::Pending)
    }

    /// The failure means the peer is gone.
    pub fn is_disconnect(self) -> bool {
        matches!(self, IoOutcome::Failed { code, .. } if is_disconnect_code(code))
    }
}

pub fn is_disconnect_code(code: u32) -> bool {
    code == NativeCode::ERROR_BROKEN_PIPE
        || code == NativeCode::ERROR_NO_DATA
        || code == NativeCode::ERROR_PIPE_NOT_CONNECTED
        || code == NativeCode::ERROR_HANDLE_EOF
}

/// Result of waiting on a set of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitOutcome {
    Signaled(usize),
    Abandoned(usize),
    Timeout,
}

/// Decode a raw wait return value for a wait over `count` handles.
pub fn decode_wait(raw: u32, count: usize) -> Result<WaitOutcome> {
    let count = count.min(MAXIMUM_WAIT_OBJECTS) as u32;
    let abandoned = NativeCode::WAIT_ABANDONED_0.code();

    let index_from = |base: u32| raw.checked_sub(base).filter(|i| *i < count);

    if let Some(i) = index_from(NativeCode::WAIT_OBJECT_0.code()) {
        Ok(WaitOutcome::Signaled(i as usize))
    } else if let Some(i) = index_from(abandoned) {
        Ok(WaitOutcome::Abandoned(i as usize))
    } else if raw == NativeCode::WAIT_TIMEOUT {
        Ok(WaitOutcome::Timeout)
    } else if raw == NativeCode::WAIT_FAILED {
        Err(ProbeError::Os {
            context: "WaitForMultipleObjects",
            code: last_os_error(),
        })
    } else {
        Err(ProbeError::Os {
            context: "WaitForMultipleObjects",
            code: raw,
        })
    }
}

/// Milliseconds for a native wait; `None` waits forever.
pub fn timeout_millis(timeout: Option<Duration>) -> u32 {
    match timeout {
        None => NativeCode::INFINITE.code(),
        Some(d) => d.as_millis().min((NativeCode::INFINITE.code() - 1) as u128) as u32,
    }
}
