use std::time::Duration;

use log::trace;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Threading::{
    CreateEventW, ResetEvent, SetEvent, WaitForMultipleObjects, WaitForSingleObject,
};

use crate::constants::{NativeCode, MAXIMUM_WAIT_OBJECTS};
use crate::error::{ProbeError, Result};

use super::state::{decode_wait, timeout_millis, WaitOutcome};

/// Owned Win32 event object.
pub struct WaitableEvent {
    handle: HANDLE,
}

// Event handles are usable from any thread; Set/Reset are atomic in the kernel.
unsafe impl Send for WaitableEvent {}
unsafe impl Sync for WaitableEvent {}

impl WaitableEvent {
    pub fn new(manual_reset: bool, initially_signaled: bool) -> Result<Self> {
        let handle = unsafe { CreateEventW(None, manual_reset, initially_signaled, PCWSTR::null()) }
            .map_err(|e| ProbeError::os("CreateEventW", &e))?;
        Ok(Self { handle })
    }

    /// Manual-reset event, initially clear.
    pub fn manual() -> Result<Self> {
        Self::new(true, false)
    }

    pub fn set(&self) -> Result<()> {
        unsafe { SetEvent(self.handle) }.map_err(|e| ProbeError::os("SetEvent", &e))
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { ResetEvent(self.handle) }.map_err(|e| ProbeError::os("ResetEvent", &e))
    }

    /// Wait for this event alone. Returns `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let raw = unsafe { WaitForSingleObject(self.handle, timeout_millis(timeout)) };
        match decode_wait(raw.0, 1)? {
            WaitOutcome::Signaled(_) | WaitOutcome::Abandoned(_) => Ok(true),
            WaitOutcome::Timeout => Ok(false),
        }
    }

    pub fn is_set(&self) -> Result<bool> {
        self.wait(Some(Duration::ZERO))
    }

    pub fn raw(&self) -> HANDLE {
        self.handle
    }
}

impl Drop for WaitableEvent {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

/// Wait until one (or, with `wait_all`, every) event is signalled.
///
/// `None` waits forever. A zero timeout polls.
pub fn wait_for_any(
    events: &[&WaitableEvent],
    wait_all: bool,
    timeout: Option<Duration>,
) -> Result<WaitOutcome> {
    if events.is_empty() || events.len() > MAXIMUM_WAIT_OBJECTS {
        return Err(ProbeError::Os {
            context: "WaitForMultipleObjects",
            code: NativeCode::ERROR_INVALID_PARAMETER.code(),
        });
    }

    let handles: Vec<HANDLE> = events.iter().map(|e| e.raw()).collect();
    let raw = unsafe { WaitForMultipleObjects(&handles, wait_all, timeout_millis(timeout)) };
    let outcome = decode_wait(raw.0, handles.len())?;
    trace!("[PIPE] Wait over {} events: {:?}", handles.len(), outcome);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_without_signal_is_timeout() {
        let a = WaitableEvent::manual().unwrap();
        let b = WaitableEvent::manual().unwrap();
        assert_eq!(
            wait_for_any(&[&a, &b], false, Some(Duration::ZERO)).unwrap(),
            WaitOutcome::Timeout
        );
    }

    #[test]
    fn reports_index_of_signalled_event() {
        let a = WaitableEvent::manual().unwrap();
        let b = WaitableEvent::manual().unwrap();
        b.set().unwrap();
        assert_eq!(
            wait_for_any(&[&a, &b], false, Some(Duration::ZERO)).unwrap(),
            WaitOutcome::Signaled(1)
        );
        b.reset().unwrap();
        assert!(!b.is_set().unwrap());
    }

    #[test]
    fn wait_all_needs_every_event() {
        let a = WaitableEvent::manual().unwrap();
        let b = WaitableEvent::manual().unwrap();
        a.set().unwrap();
        assert_eq!(
            wait_for_any(&[&a, &b], true, Some(Duration::ZERO)).unwrap(),
            WaitOutcome::Timeout
        );
        b.set().unwrap();
        assert_eq!(
            wait_for_any(&[&a, &b], true, Some(Duration::ZERO)).unwrap(),
            WaitOutcome::Signaled(0)
        );
    }

    #[test]
    fn empty_wait_is_rejected() {
        assert!(wait_for_any(&[], false, Some(Duration::ZERO)).is_err());
    }
}
