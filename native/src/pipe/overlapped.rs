use log::debug;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use crate::constants::NativeCode;
use crate::error::{last_os_error, win32_code, ProbeError, Result};

use super::buffer::DirectBuffer;
use super::event::WaitableEvent;
use super::state::{IoOutcome, OperationKind};

/// One overlapped connect, read or write, with its event and buffer.
///
/// The `OVERLAPPED` block is boxed so the address handed to the kernel stays
/// put while the operation is pending.
pub struct OverlappedOperation {
    overlapped: Box<OVERLAPPED>,
    event: WaitableEvent,
    buffer: DirectBuffer,
    kind: Option<OperationKind>,
    issued_on: Option<HANDLE>,
    pending: bool,
    cancelled: bool,
    outcome: Option<IoOutcome>,
}

unsafe impl Send for OverlappedOperation {}

impl OverlappedOperation {
    pub fn new(capacity: usize) -> Result<Self> {
        let event = WaitableEvent::manual()?;
        let overlapped = Box::new(OVERLAPPED {
            hEvent: event.raw(),
            ..Default::default()
        });
        Ok(Self {
            overlapped,
            event,
            buffer: DirectBuffer::new(capacity),
            kind: None,
            issued_on: None,
            pending: false,
            cancelled: false,
            outcome: None,
        })
    }

    pub fn event(&self) -> &WaitableEvent {
        &self.event
    }

    pub fn buffer(&self) -> &DirectBuffer {
        &self.buffer
    }

    /// The buffer may not be touched while the kernel owns it.
    pub fn buffer_mut(&mut self) -> Result<&mut DirectBuffer> {
        if self.pending {
            return Err(ProbeError::InFlight);
        }
        Ok(&mut self.buffer)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn kind(&self) -> Option<OperationKind> {
        self.kind
    }

    /// Final outcome of the last finished operation.
    pub fn outcome(&self) -> Option<IoOutcome> {
        self.outcome
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(super) fn ensure_idle(&self) -> Result<()> {
        if self.pending {
            Err(ProbeError::InFlight)
        } else {
            Ok(())
        }
    }

    /// Zero the control block (keeping its event), reset the event and
    /// record what is about to be issued.
    pub(super) fn prepare(
        &mut self,
        kind: OperationKind,
        handle: HANDLE,
    ) -> Result<*mut OVERLAPPED> {
        self.ensure_idle()?;
        let event = self.overlapped.hEvent;
        *self.overlapped = OVERLAPPED {
            hEvent: event,
            ..Default::default()
        };
        self.event.reset()?;
        self.kind = Some(kind);
        self.issued_on = Some(handle);
        self.cancelled = false;
        self.outcome = None;
        Ok(&mut *self.overlapped as *mut OVERLAPPED)
    }

    /// Buffer slice and control block for issuing a transfer.
    pub(super) fn transfer_parts(
        &mut self,
        offset: usize,
        length: usize,
    ) -> Result<(&mut [u8], *mut OVERLAPPED)> {
        let overlapped = &mut *self.overlapped as *mut OVERLAPPED;
        let slice = self.buffer.slice_mut(offset, length)?;
        Ok((slice, overlapped))
    }

    pub(super) fn mark_pending(&mut self) {
        self.pending = true;
    }

    pub(super) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub(super) fn finish(&mut self, outcome: IoOutcome) {
        self.pending = false;
        self.outcome = Some(outcome);
    }

    pub(super) fn issued_on(&self) -> Option<HANDLE> {
        self.issued_on
    }

    pub(super) fn overlapped_ptr(&self) -> *const OVERLAPPED {
        &*self.overlapped as *const OVERLAPPED
    }

    /// Query completion on the handle the operation was issued on.
    pub(super) fn query(&mut self, wait: bool) -> IoOutcome {
        let handle = match self.issued_on {
            Some(h) => h,
            None => return IoOutcome::failed(NativeCode::ERROR_INVALID_HANDLE.code()),
        };

        let mut transferred = 0u32;
        let result =
            unsafe { GetOverlappedResult(handle, self.overlapped_ptr(), &mut transferred, wait) };
        let outcome = match result {
            Ok(()) => IoOutcome::Complete(transferred),
            Err(e) => IoOutcome::from_os(false, transferred, win32_code(&e)),
        };

        if outcome.is_finished() {
            self.finish(outcome);
        }
        outcome
    }
}

impl Drop for OverlappedOperation {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        if let Some(handle) = self.issued_on {
            debug!("[PIPE] Dropping pending {:?} operation, cancelling", self.kind);
            unsafe {
                if CancelIoEx(handle, Some(self.overlapped_ptr())).is_err() {
                    debug!("[PIPE] CancelIoEx on drop: os error {}", last_os_error());
                }
            }
            // The kernel may still write into the buffer until completion is observed.
            let outcome = self.query(true);
            debug!("[PIPE] Pending operation settled as {:?}", outcome);
        }
    }
}
