//! Overlapped, message-mode named pipe transport.
//!
//! The lifecycle and outcome types are portable. The endpoints themselves
//! (events, overlapped slots and the pipe handle) only exist on Windows.

pub mod buffer;
pub mod state;

#[cfg(windows)]
pub mod event;
#[cfg(windows)]
pub mod overlapped;
#[cfg(windows)]
pub mod transport;

pub use buffer::DirectBuffer;
pub use state::{decode_wait, timeout_millis, IoOutcome, OperationKind, PipeState, WaitOutcome};

#[cfg(windows)]
pub use event::{wait_for_any, WaitableEvent};
#[cfg(windows)]
pub use overlapped::OverlappedOperation;
#[cfg(windows)]
pub use transport::{ConnectStatus, MessageAssembler, Pipe};

/// Namespace prefix every local pipe path starts with.
pub const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Qualify a bare pipe name with the local pipe namespace.
pub fn pipe_path(name: &str) -> String {
    if name.starts_with(r"\\") {
        name.to_string()
    } else {
        format!("{}{}", PIPE_PREFIX, name)
    }
}

/// Unique pipe path for this process.
pub fn generate_pipe_name() -> String {
    format!(
        "{}host-probe-{}-{}",
        PIPE_PREFIX,
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_get_prefixed() {
        assert_eq!(pipe_path("probe"), r"\\.\pipe\probe");
        assert_eq!(pipe_path(r"\\.\pipe\probe"), r"\\.\pipe\probe");
        assert_eq!(pipe_path(r"\\server\pipe\probe"), r"\\server\pipe\probe");
    }

    #[test]
    fn generated_names_are_unique_and_qualified() {
        let a = generate_pipe_name();
        let b = generate_pipe_name();
        assert_ne!(a, b);
        assert!(a.starts_with(PIPE_PREFIX));
        assert!(a.contains(&std::process::id().to_string()));
    }
}
