// Maps probe requests onto the process introspection API.

use std::time::Duration;

use log::debug;

use super::protocol::{ProbeRequest, ProbeRequestType, ProbeResponse, ProbeResponseType};
use crate::config;
use crate::process;

pub struct RequestHandler;

impl RequestHandler {
    /// Handle a single probe request.
    pub fn handle_request(request: ProbeRequest) -> ProbeResponse {
        let message_id = request.message_id;
        debug!("[IPC] Handling {:?}", request.request);

        let result = match request.request {
            ProbeRequestType::UserName {
                pid,
                prepend_domain,
            } => {
                let prepend = prepend_domain.unwrap_or_else(|| config::get().prepend_domain);
                process::process_user_name(pid, prepend).map(|account| {
                    let display = account.to_legacy_string(prepend);
                    ProbeResponseType::Account {
                        data: account,
                        display,
                    }
                })
            }

            ProbeRequestType::Sid { pid } => {
                process::process_sid(pid).map(|value| ProbeResponseType::StringValue { value })
            }

            ProbeRequestType::MemoryInfo { pid } => {
                process::process_memory_info(pid).map(|data| ProbeResponseType::MemoryInfo { data })
            }

            ProbeRequestType::IoCounters { pid } => {
                process::process_io_counters(pid).map(|data| ProbeResponseType::IoCounters { data })
            }

            ProbeRequestType::Environment { pid } => process::process_environment(pid)
                .map(|variables| ProbeResponseType::Environment { variables }),

            ProbeRequestType::Parameter { pid, parameter } => {
                let value = match parameter {
                    process::ProcessParameter::CurrentDirectory => {
                        process::process_current_directory(pid)
                    }
                    process::ProcessParameter::ImagePath => process::process_image_path(pid),
                    process::ProcessParameter::CommandLine => process::process_command_line(pid),
                };
                value.map(|value| ProbeResponseType::StringValue { value })
            }

            ProbeRequestType::Exists { pid } => Ok(ProbeResponseType::BoolValue {
                value: process::exists(pid),
            }),

            ProbeRequestType::Terminate {
                pid,
                exit_code,
                wait_ms,
            } => process::terminate(pid, exit_code, wait_ms.map(Duration::from_millis))
                .map(|value| ProbeResponseType::BoolValue { value }),

            ProbeRequestType::GetVersion => Ok(ProbeResponseType::StringValue {
                value: crate::get_version().to_string(),
            }),

            ProbeRequestType::Ping => Ok(ProbeResponseType::Success),

            ProbeRequestType::Shutdown => Ok(ProbeResponseType::Shutdown),
        };

        match result {
            Ok(response) => ProbeResponse::response(message_id, response),
            Err(e) => {
                debug!("[IPC] Request {:?} failed: {}", message_id, e);
                ProbeResponse::error(message_id, &e)
            }
        }
    }

    /// Handle a raw message, answering malformed input with an error response.
    pub fn handle_bytes(bytes: &[u8]) -> ProbeResponse {
        match ProbeRequest::from_bytes(bytes) {
            Ok(request) => Self::handle_request(request),
            Err(e) => ProbeResponse::error(None, &e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn ping_and_version_echo_message_id() {
        let resp = RequestHandler::handle_request(ProbeRequest::request(5, ProbeRequestType::Ping));
        assert_eq!(resp.message_id, Some(5));
        assert_eq!(resp.response, ProbeResponseType::Success);

        let resp =
            RequestHandler::handle_request(ProbeRequest::request(6, ProbeRequestType::GetVersion));
        assert_eq!(
            resp.response,
            ProbeResponseType::StringValue {
                value: env!("CARGO_PKG_VERSION").to_string()
            }
        );
    }

    #[test]
    fn malformed_bytes_become_error_response() {
        let resp = RequestHandler::handle_bytes(b"{\"type\":");
        assert_eq!(resp.message_id, None);
        assert!(matches!(
            resp.response,
            ProbeResponseType::Error {
                kind: ErrorKind::Malformed,
                ..
            }
        ));
    }

    #[test]
    fn shutdown_is_acknowledged() {
        let resp = RequestHandler::handle_bytes(br#"{"type":"Shutdown","message_id":1}"#);
        assert_eq!(resp.response, ProbeResponseType::Shutdown);
    }

    #[test]
    fn terminating_the_server_itself_is_refused() {
        let resp = RequestHandler::handle_request(ProbeRequest::request(
            4,
            ProbeRequestType::Terminate {
                pid: 0,
                exit_code: 1,
                wait_ms: Some(10),
            },
        ));
        assert_eq!(resp.message_id, Some(4));
        assert!(matches!(
            resp.response,
            ProbeResponseType::Error {
                kind: ErrorKind::InvalidState,
                ..
            }
        ));
    }

    #[cfg(not(windows))]
    #[test]
    fn introspection_reports_not_implemented_off_windows() {
        let resp = RequestHandler::handle_request(ProbeRequest::request(
            2,
            ProbeRequestType::Sid { pid: 0 },
        ));
        assert!(matches!(
            resp.response,
            ProbeResponseType::Error {
                kind: ErrorKind::NotImplemented,
                ..
            }
        ));
    }

    #[cfg(windows)]
    #[test]
    fn current_process_memory_info() {
        let resp = RequestHandler::handle_request(ProbeRequest::request(
            3,
            ProbeRequestType::MemoryInfo { pid: 0 },
        ));
        match resp.response {
            ProbeResponseType::MemoryInfo { data } => {
                assert_eq!(data.ticks_per_second, 10_000_000)
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
}
