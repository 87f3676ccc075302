// Probe server on a single overlapped named pipe instance.
// One client at a time: connect -> read -> dispatch -> write -> read ...

use std::sync::Arc;

use log::{debug, info, warn};

use super::protocol::{ProbeRequest, ProbeRequestType, ProbeResponse, ProbeResponseType};
use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::logging;
use crate::pipe::{
    wait_for_any, ConnectStatus, IoOutcome, MessageAssembler, OverlappedOperation, Pipe,
    WaitOutcome, WaitableEvent,
};

/// Stops a running [`ProbeServer`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    event: Arc<WaitableEvent>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) -> Result<()> {
        info!("[IPC] Shutdown requested");
        self.event.set()
    }

    pub fn is_shutdown(&self) -> bool {
        self.event.is_set().unwrap_or(false)
    }
}

/// Counters reported when the server stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub clients: u64,
    pub requests: u64,
}

/// How a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClientGone,
    Shutdown,
}

/// How waiting for a client ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accept {
    Client,
    /// The connect failed without a usable client; reset the instance.
    Retry,
    Shutdown,
}

/// What a wait on an operation ended with.
enum Wake {
    Done(IoOutcome),
    Shutdown,
}

pub struct ProbeServer {
    pipe: Pipe,
    shutdown: Arc<WaitableEvent>,
    buffer_size: usize,
    max_message_size: usize,
}

impl ProbeServer {
    /// Create the pipe instance up front so clients can open it immediately.
    pub fn bind(config: &ProbeConfig) -> Result<Self> {
        let pipe = Pipe::create_server(
            &config.pipe_name,
            config.pipe_max_instances,
            config.pipe_buffer_size,
        )?;
        Ok(Self {
            pipe,
            shutdown: Arc::new(WaitableEvent::manual()?),
            buffer_size: config.pipe_buffer_size as usize,
            max_message_size: config.max_message_size,
        })
    }

    pub fn name(&self) -> &str {
        self.pipe.name()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            event: Arc::clone(&self.shutdown),
        }
    }

    /// Serve clients one after another until shut down.
    pub fn run<F>(mut self, mut handler: F) -> Result<ServeStats>
    where
        F: FnMut(ProbeRequest) -> ProbeResponse,
    {
        info!("[IPC] Starting probe server on {}", self.pipe.name());
        let mut stats = ServeStats::default();
        let mut connect = OverlappedOperation::new(0)?;
        let mut read = OverlappedOperation::new(self.buffer_size)?;

        loop {
            if self.shutdown.is_set()? {
                break;
            }

            match self.accept(&mut connect)? {
                Accept::Shutdown => break,
                Accept::Retry => {
                    if let Err(e) = self.pipe.disconnect() {
                        debug!("[IPC] Reset after failed connect: {}", e);
                    }
                    continue;
                }
                Accept::Client => {
                    stats.clients += 1;
                    if let Ok(pid) = self.pipe.client_process_id() {
                        info!("[IPC] Client connected (pid {})", pid);
                    }
                }
            }

            let end = self.serve_client(&mut read, &mut handler, &mut stats);

            if let Err(e) = self.pipe.disconnect() {
                warn!("[IPC] Disconnect failed: {}", e);
            }
            match end {
                Ok(SessionEnd::ClientGone) => info!("[IPC] Client disconnected"),
                Ok(SessionEnd::Shutdown) => break,
                Err(e) => logging::log_critical_error("IPC client session", &e.to_string()),
            }
        }

        self.pipe.close()?;
        info!(
            "[IPC] Server stopped ({} clients, {} requests)",
            stats.clients, stats.requests
        );
        Ok(stats)
    }

    /// Wait for the next client.
    fn accept(&mut self, connect: &mut OverlappedOperation) -> Result<Accept> {
        match self.pipe.begin_connect(connect)? {
            ConnectStatus::Connected => return Ok(Accept::Client),
            ConnectStatus::ClientGone => {
                debug!("[IPC] Client left before the connect completed");
                return Ok(Accept::Retry);
            }
            ConnectStatus::Pending => {}
        }
        debug!("[IPC] Waiting for client connection...");

        match self.wait(connect)? {
            Wake::Done(IoOutcome::Complete(_)) => Ok(Accept::Client),
            Wake::Done(outcome) => {
                warn!("[IPC] Connect finished with {:?}", outcome);
                if self.shutdown.is_set()? {
                    Ok(Accept::Shutdown)
                } else {
                    Ok(Accept::Retry)
                }
            }
            Wake::Shutdown => Ok(Accept::Shutdown),
        }
    }

    /// Wait on `op` or the shutdown event. Shutdown cancels `op` and settles it.
    fn wait(&mut self, op: &mut OverlappedOperation) -> Result<Wake> {
        let outcome = wait_for_any(&[op.event(), self.shutdown.as_ref()], false, None)?;
        match outcome {
            WaitOutcome::Signaled(0) => Ok(Wake::Done(self.pipe.overlapped_result(op, true)?)),
            _ => {
                self.pipe.cancel(Some(&mut *op))?;
                let settled = self.pipe.overlapped_result(op, true)?;
                debug!("[IPC] Operation settled as {:?} on shutdown", settled);
                Ok(Wake::Shutdown)
            }
        }
    }

    fn serve_client<F>(
        &mut self,
        read: &mut OverlappedOperation,
        handler: &mut F,
        stats: &mut ServeStats,
    ) -> Result<SessionEnd>
    where
        F: FnMut(ProbeRequest) -> ProbeResponse,
    {
        loop {
            let message = match self.read_message(read)? {
                Some(Ok(bytes)) => bytes,
                Some(Err(too_large)) => {
                    warn!("[IPC] {}", too_large);
                    self.write_response(&ProbeResponse::error(None, &too_large))?;
                    continue;
                }
                None if self.shutdown.is_set()? => {
                    // Tell the client before hanging up.
                    let notice = ProbeResponse::notification(ProbeResponseType::Shutdown);
                    if let Err(e) = self.write_response(&notice) {
                        debug!("[IPC] Shutdown notification not delivered: {}", e);
                    }
                    return Ok(SessionEnd::Shutdown);
                }
                None => return Ok(SessionEnd::ClientGone),
            };

            stats.requests += 1;
            let (response, stop) = match ProbeRequest::from_bytes(&message) {
                Ok(request) => {
                    let stop = request.request == ProbeRequestType::Shutdown;
                    (handler(request), stop)
                }
                Err(e) => {
                    warn!("[IPC] Malformed request: {}", e);
                    (ProbeResponse::error(None, &e.into()), false)
                }
            };

            if !self.write_response(&response)? {
                return Ok(SessionEnd::ClientGone);
            }
            if stop {
                self.shutdown.set()?;
                return Ok(SessionEnd::Shutdown);
            }
        }
    }

    /// Read one whole message.
    ///
    /// `None` when the client left or shutdown was requested. An oversized
    /// message is drained and reported as `Some(Err(MessageTooLarge))`.
    fn read_message(
        &mut self,
        read: &mut OverlappedOperation,
    ) -> Result<Option<std::result::Result<Vec<u8>, ProbeError>>> {
        let mut assembler = MessageAssembler::new(self.max_message_size);
        let mut overflow: Option<ProbeError> = None;

        loop {
            let capacity = read.buffer().capacity();
            if !self.pipe.begin_read(read, 0, capacity)? {
                return Ok(None);
            }

            let (n, last) = match self.wait(read)? {
                Wake::Shutdown => return Ok(None),
                Wake::Done(IoOutcome::Complete(n)) => (n, true),
                Wake::Done(IoOutcome::MoreData(n)) => (n, false),
                Wake::Done(o) if o.is_disconnect() => return Ok(None),
                Wake::Done(IoOutcome::Failed { code, .. }) => {
                    return Err(ProbeError::Os {
                        context: "ReadFile",
                        code,
                    })
                }
                Wake::Done(IoOutcome::Cancelled(_)) => return Err(ProbeError::Cancelled),
                Wake::Done(IoOutcome::Pending) => continue,
            };

            if overflow.is_none() {
                if let Err(e) = assembler.push(read.buffer().slice(0, n as usize)?) {
                    overflow = Some(e);
                }
            }
            if last {
                return Ok(Some(match overflow {
                    Some(e) => Err(e),
                    None => Ok(assembler.finish()),
                }));
            }
        }
    }

    /// Write one response. Returns `false` if the client went away first.
    fn write_response(&mut self, response: &ProbeResponse) -> Result<bool> {
        let payload = response.to_bytes()?;
        debug!("[IPC] Sending response ({} bytes)", payload.len());

        let mut write = OverlappedOperation::new(payload.len())?;
        write.buffer_mut()?.fill(0, &payload)?;
        if !self.pipe.begin_write(&mut write, 0, payload.len())? {
            return Ok(false);
        }

        match self.wait(&mut write)? {
            Wake::Done(IoOutcome::Complete(_)) => Ok(true),
            Wake::Done(o) if o.is_disconnect() => Ok(false),
            Wake::Done(IoOutcome::Failed { code, .. }) => Err(ProbeError::Os {
                context: "WriteFile",
                code,
            }),
            Wake::Done(_) | Wake::Shutdown => Err(ProbeError::Cancelled),
        }
    }
}

/// Blocking client for a running probe server.
pub struct ProbeClient {
    pipe: Pipe,
    read: OverlappedOperation,
    max_message_size: usize,
}

impl ProbeClient {
    pub fn connect(config: &ProbeConfig) -> Result<Self> {
        Ok(Self {
            pipe: Pipe::open_client(&config.pipe_name)?,
            read: OverlappedOperation::new(config.pipe_buffer_size as usize)?,
            max_message_size: config.max_message_size,
        })
    }

    /// Send `request` and wait for the reply.
    pub fn request(&mut self, request: &ProbeRequest) -> Result<ProbeResponse> {
        let payload = request.to_bytes()?;
        let mut write = OverlappedOperation::new(payload.len())?;
        self.pipe.write(&mut write, &payload)?;

        let reply = self
            .pipe
            .read_message(&mut self.read, self.max_message_size)?
            .ok_or_else(|| ProbeError::NotFound(self.pipe.name().to_string()))?;
        Ok(ProbeResponse::from_bytes(&reply)?)
    }
}

/// Send a single request to the configured server.
pub fn query(config: &ProbeConfig, request: &ProbeRequest) -> Result<ProbeResponse> {
    ProbeClient::connect(config)?.request(request)
}
