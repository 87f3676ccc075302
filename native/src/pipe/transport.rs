use log::{debug, info, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_OVERLAPPED, FILE_SHARE_NONE, OPEN_EXISTING,
    PIPE_ACCESS_DUPLEX,
};
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, GetNamedPipeClientProcessId,
    SetNamedPipeHandleState, PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE, PIPE_WAIT,
};
use windows::Win32::System::IO::CancelIoEx;

use crate::config;
use crate::constants::NativeCode;
use crate::conversions::to_wide;
use crate::error::{last_os_error, win32_code, ProbeError, Result};

use super::overlapped::OverlappedOperation;
use super::pipe_path;
use super::state::{is_disconnect_code, IoOutcome, OperationKind, PipeState};

/// Result of starting a server-side connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// Wait on the operation's event, then fetch its result.
    Pending,
    Connected,
    /// A client opened and closed the instance before the connect was
    /// issued. The instance is left `Disconnected`; connect again.
    ClientGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Server,
    Client,
}

/// Duplex, message-mode named pipe endpoint using overlapped I/O.
///
/// At most one read and one write may be outstanding at a time.
pub struct Pipe {
    handle: HANDLE,
    name: String,
    role: Role,
    state: PipeState,
    read_pending: bool,
    write_pending: bool,
}

unsafe impl Send for Pipe {}

impl Pipe {
    /// Create a server instance named `name` (bare or `\\.\pipe\`-qualified).
    pub fn create_server(name: &str, max_instances: u32, buffer_size: u32) -> Result<Self> {
        let path = pipe_path(name);
        let wide = to_wide(&path);
        let handle = unsafe {
            CreateNamedPipeW(
                PCWSTR(wide.as_ptr()),
                PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
                PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
                max_instances,
                buffer_size,
                buffer_size,
                config::get().pipe_client_timeout_ms,
                None,
            )
        };

        if handle.is_invalid() {
            let code = last_os_error();
            warn!("[PIPE] Failed to create '{}': os error {}", path, code);
            return Err(ProbeError::CreationFailed { name: path, code });
        }

        info!(
            "[PIPE] Created server '{}' (instances: {}, buffer: {} bytes)",
            path, max_instances, buffer_size
        );
        Ok(Self {
            handle,
            name: path,
            role: Role::Server,
            state: PipeState::Unconnected,
            read_pending: false,
            write_pending: false,
        })
    }

    /// Open the client end of an existing pipe. Busy pipes are not retried.
    pub fn open_client(name: &str) -> Result<Self> {
        let path = pipe_path(name);
        let wide = to_wide(&path);
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                GENERIC_READ.0 | GENERIC_WRITE.0,
                FILE_SHARE_NONE,
                None,
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                None,
            )
        }
        .map_err(|e| match win32_code(&e) {
            code if code == NativeCode::ERROR_FILE_NOT_FOUND => ProbeError::NotFound(path.clone()),
            code if code == NativeCode::ERROR_PIPE_BUSY => ProbeError::Busy(path.clone()),
            _ => ProbeError::os("CreateFileW", &e),
        })?;

        // Dropping `pipe` on the error path below closes the handle.
        let pipe = Self {
            handle,
            name: path,
            role: Role::Client,
            state: PipeState::Opened,
            read_pending: false,
            write_pending: false,
        };

        let mode = PIPE_READMODE_MESSAGE;
        unsafe { SetNamedPipeHandleState(pipe.handle, Some(&mode as *const _), None, None) }
            .map_err(|e| ProbeError::os("SetNamedPipeHandleState", &e))?;

        debug!("[PIPE] Opened client end of '{}'", pipe.name);
        Ok(pipe)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipeState {
        self.state
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    fn live_handle(&self) -> Result<HANDLE> {
        if self.state == PipeState::Closed {
            Err(ProbeError::InvalidHandle)
        } else {
            Ok(self.handle)
        }
    }

    /// Start waiting for a client on a server instance.
    pub fn begin_connect(&mut self, op: &mut OverlappedOperation) -> Result<ConnectStatus> {
        self.live_handle()?;
        if !self.is_server() {
            return Err(ProbeError::InvalidState {
                operation: "connect",
                state: "client end",
            });
        }
        self.state.require_connectable()?;

        let overlapped = op.prepare(OperationKind::Connect, self.handle)?;
        match unsafe { ConnectNamedPipe(self.handle, Some(overlapped)) } {
            Ok(()) => {
                op.finish(IoOutcome::Complete(0));
                self.state = PipeState::Connected;
                Ok(ConnectStatus::Connected)
            }
            Err(e) => match win32_code(&e) {
                code if code == NativeCode::ERROR_IO_PENDING => {
                    op.mark_pending();
                    self.state = PipeState::ConnectPending;
                    Ok(ConnectStatus::Pending)
                }
                code if code == NativeCode::ERROR_PIPE_CONNECTED => {
                    // Client arrived before the call; the event is never signalled.
                    op.finish(IoOutcome::Complete(0));
                    op.event().set()?;
                    self.state = PipeState::Connected;
                    Ok(ConnectStatus::Connected)
                }
                code if is_disconnect_code(code) => {
                    debug!("[PIPE] Client left '{}' before connect ({})", self.name, code);
                    op.finish(IoOutcome::failed(code));
                    self.state = PipeState::Disconnected;
                    Ok(ConnectStatus::ClientGone)
                }
                code => {
                    op.finish(IoOutcome::failed(code));
                    Err(ProbeError::Os {
                        context: "ConnectNamedPipe",
                        code,
                    })
                }
            },
        }
    }

    /// Start reading up to `length` bytes into the operation's buffer at `offset`.
    ///
    /// Returns `false` when the peer has gone away.
    pub fn begin_read(
        &mut self,
        op: &mut OverlappedOperation,
        offset: usize,
        length: usize,
    ) -> Result<bool> {
        self.live_handle()?;
        self.state.require_open("read")?;
        if self.read_pending {
            return Err(ProbeError::InFlight);
        }
        op.ensure_idle()?;
        op.buffer().slice(offset, length)?;

        op.prepare(OperationKind::Read, self.handle)?;
        let (slice, overlapped) = op.transfer_parts(offset, length)?;
        let result = unsafe { ReadFile(self.handle, Some(slice), None, Some(overlapped)) };
        self.after_issue(op, OperationKind::Read, result, "ReadFile")
    }

    /// Start writing `length` bytes from the operation's buffer at `offset`.
    ///
    /// Returns `false` when the peer has gone away.
    pub fn begin_write(
        &mut self,
        op: &mut OverlappedOperation,
        offset: usize,
        length: usize,
    ) -> Result<bool> {
        self.live_handle()?;
        self.state.require_open("write")?;
        if self.write_pending {
            return Err(ProbeError::InFlight);
        }
        op.ensure_idle()?;
        op.buffer().slice(offset, length)?;

        op.prepare(OperationKind::Write, self.handle)?;
        let (slice, overlapped) = op.transfer_parts(offset, length)?;
        let result = unsafe { WriteFile(self.handle, Some(&*slice), None, Some(overlapped)) };
        self.after_issue(op, OperationKind::Write, result, "WriteFile")
    }

    fn after_issue(
        &mut self,
        op: &mut OverlappedOperation,
        kind: OperationKind,
        result: windows::core::Result<()>,
        context: &'static str,
    ) -> Result<bool> {
        let code = match result {
            Ok(()) => None,
            Err(e) => Some(win32_code(&e)),
        };

        match code {
            // Completed inline, still pending, or a partial message: the
            // count is collected through `overlapped_result` in every case.
            None => {}
            Some(c) if c == NativeCode::ERROR_IO_PENDING || c == NativeCode::ERROR_MORE_DATA => {}
            Some(c) if is_disconnect_code(c) => {
                debug!("[PIPE] {} on '{}': peer disconnected ({})", context, self.name, c);
                op.finish(IoOutcome::failed(c));
                self.state = PipeState::Disconnected;
                return Ok(false);
            }
            Some(c) => {
                op.finish(IoOutcome::failed(c));
                return Err(ProbeError::Os { context, code: c });
            }
        }

        op.mark_pending();
        self.set_pending(kind, true);
        Ok(true)
    }

    fn set_pending(&mut self, kind: OperationKind, pending: bool) {
        match kind {
            OperationKind::Read => self.read_pending = pending,
            OperationKind::Write => self.write_pending = pending,
            OperationKind::Connect => {}
        }
    }

    /// Fetch the outcome of `op`, blocking until it finishes when `wait`.
    ///
    /// A finished operation reports its stored outcome again.
    pub fn overlapped_result(
        &mut self,
        op: &mut OverlappedOperation,
        wait: bool,
    ) -> Result<IoOutcome> {
        self.live_handle()?;
        if !op.is_pending() {
            return op.outcome().ok_or(ProbeError::InvalidState {
                operation: "overlapped_result",
                state: "never issued",
            });
        }
        if op.issued_on() != Some(self.handle) {
            return Err(ProbeError::InvalidState {
                operation: "overlapped_result",
                state: "issued on another pipe",
            });
        }

        let outcome = op.query(wait);
        if !outcome.is_finished() {
            return Ok(outcome);
        }

        let kind = op.kind().unwrap_or(OperationKind::Read);
        self.set_pending(kind, false);

        match (kind, outcome) {
            (OperationKind::Connect, IoOutcome::Complete(_)) => {
                debug!("[PIPE] Client connected to '{}'", self.name);
                self.state = PipeState::Connected;
            }
            (OperationKind::Connect, _) if self.state == PipeState::ConnectPending => {
                self.state = PipeState::Unconnected;
            }
            (_, o) if o.is_disconnect() && self.state != PipeState::Closed => {
                debug!("[PIPE] Peer disconnected from '{}'", self.name);
                self.state = PipeState::Disconnected;
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Cancel `op`, or every operation on this pipe when `None`.
    ///
    /// Cancelling an operation that is not pending does nothing. The result
    /// must still be fetched with [`Pipe::overlapped_result`].
    pub fn cancel(&mut self, op: Option<&mut OverlappedOperation>) -> Result<()> {
        let handle = self.live_handle()?;

        let result = match op {
            Some(op) => {
                if !op.is_pending() {
                    return Ok(());
                }
                op.mark_cancelled();
                unsafe { CancelIoEx(handle, Some(op.overlapped_ptr())) }
            }
            None => unsafe { CancelIoEx(handle, None) },
        };

        match result {
            Ok(()) => Ok(()),
            // Already completed.
            Err(e) if win32_code(&e) == NativeCode::ERROR_NOT_FOUND => Ok(()),
            Err(e) => Err(ProbeError::os("CancelIoEx", &e)),
        }
    }

    /// Drop the current client so the instance can accept another.
    pub fn disconnect(&mut self) -> Result<()> {
        let handle = self.live_handle()?;
        if !self.is_server() {
            return Err(ProbeError::InvalidState {
                operation: "disconnect",
                state: "client end",
            });
        }
        unsafe { DisconnectNamedPipe(handle) }
            .map_err(|e| ProbeError::os("DisconnectNamedPipe", &e))?;
        self.state = PipeState::Disconnected;
        debug!("[PIPE] Disconnected client from '{}'", self.name);
        Ok(())
    }

    /// Process id of the connected client.
    pub fn client_process_id(&self) -> Result<u32> {
        let handle = self.live_handle()?;
        let mut pid = 0u32;
        unsafe { GetNamedPipeClientProcessId(handle, &mut pid) }
            .map_err(|e| ProbeError::os("GetNamedPipeClientProcessId", &e))?;
        Ok(pid)
    }

    /// Cancel outstanding I/O and release the handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.state == PipeState::Closed {
            return Ok(());
        }
        self.state = PipeState::Closed;
        self.read_pending = false;
        self.write_pending = false;

        unsafe {
            let _ = CancelIoEx(self.handle, None);
            CloseHandle(self.handle).map_err(|e| ProbeError::os("CloseHandle", &e))?;
        }
        debug!("[PIPE] Closed '{}'", self.name);
        Ok(())
    }

    /// Blocking read of up to `length` bytes at `offset`.
    pub fn read(
        &mut self,
        op: &mut OverlappedOperation,
        offset: usize,
        length: usize,
    ) -> Result<IoOutcome> {
        if !self.begin_read(op, offset, length)? {
            return Ok(op
                .outcome()
                .unwrap_or(IoOutcome::failed(NativeCode::ERROR_BROKEN_PIPE.code())));
        }
        self.overlapped_result(op, true)
    }

    /// Blocking write of `data` as one message. Returns bytes written.
    pub fn write(&mut self, op: &mut OverlappedOperation, data: &[u8]) -> Result<u32> {
        let capacity = op.buffer().capacity();
        if data.len() > capacity {
            return Err(ProbeError::MessageTooLarge {
                size: data.len(),
                limit: capacity,
            });
        }
        op.buffer_mut()?.fill(0, data)?;

        if !self.begin_write(op, 0, data.len())? {
            return Err(ProbeError::Os {
                context: "WriteFile",
                code: NativeCode::ERROR_BROKEN_PIPE.code(),
            });
        }
        match self.overlapped_result(op, true)? {
            IoOutcome::Complete(n) => Ok(n),
            IoOutcome::Cancelled(_) => Err(ProbeError::Cancelled),
            other => Err(ProbeError::Os {
                context: "WriteFile",
                code: other
                    .error_code()
                    .unwrap_or(NativeCode::ERROR_IO_INCOMPLETE.code()),
            }),
        }
    }

    /// Blocking read of one whole message, reassembling `MoreData` chunks.
    ///
    /// Returns `None` when the peer disconnects first.
    pub fn read_message(
        &mut self,
        op: &mut OverlappedOperation,
        limit: usize,
    ) -> Result<Option<Vec<u8>>> {
        let mut assembler = MessageAssembler::new(limit);
        loop {
            let capacity = op.buffer().capacity();
            match self.read(op, 0, capacity)? {
                IoOutcome::Complete(n) => {
                    assembler.push(op.buffer().slice(0, n as usize)?)?;
                    return Ok(Some(assembler.finish()));
                }
                IoOutcome::MoreData(n) => {
                    assembler.push(op.buffer().slice(0, n as usize)?)?;
                }
                IoOutcome::Cancelled(_) => return Err(ProbeError::Cancelled),
                o if o.is_disconnect() => return Ok(None),
                IoOutcome::Failed { code, .. } => {
                    return Err(ProbeError::Os {
                        context: "ReadFile",
                        code,
                    })
                }
                IoOutcome::Pending => {
                    return Err(ProbeError::Os {
                        context: "ReadFile",
                        code: NativeCode::ERROR_IO_INCOMPLETE.code(),
                    })
                }
            }
        }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("[PIPE] Error closing '{}': {}", self.name, e);
        }
    }
}

/// Joins the chunks of a message that arrived through several reads.
pub struct MessageAssembler {
    data: Vec<u8>,
    limit: usize,
}

impl MessageAssembler {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        let size = self.data.len() + chunk.len();
        if size > self.limit {
            return Err(ProbeError::MessageTooLarge {
                size,
                limit: self.limit,
            });
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}
