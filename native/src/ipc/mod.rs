// Request/response probe service over the named pipe transport.
// The protocol and handler are portable; the server needs Windows pipes.

pub mod handler;
pub mod protocol;
#[cfg(windows)]
pub mod server;

pub use handler::RequestHandler;
pub use protocol::{ProbeRequest, ProbeRequestType, ProbeResponse, ProbeResponseType};
#[cfg(windows)]
pub use server::{query, ProbeClient, ProbeServer, ServeStats, ShutdownHandle};
