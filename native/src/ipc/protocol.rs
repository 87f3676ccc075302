// Probe request/response messages, one JSON document per pipe message.
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ProbeError};
use crate::process::{AccountName, ProcessIoCounters, ProcessMemoryInfo, ProcessParameter};

/// Wrapper for probe requests with correlation ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    /// Message ID for request/response correlation (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u32>,

    /// The actual request (flattened into the same JSON object)
    #[serde(flatten)]
    pub request: ProbeRequestType,
}

/// Requests a client can send to the probe server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProbeRequestType {
    // Process introspection
    UserName {
        pid: u32,
        /// Falls back to the configured default when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prepend_domain: Option<bool>,
    },
    Sid {
        pid: u32,
    },
    MemoryInfo {
        pid: u32,
    },
    IoCounters {
        pid: u32,
    },
    Environment {
        pid: u32,
    },
    Parameter {
        pid: u32,
        parameter: ProcessParameter,
    },
    Exists {
        pid: u32,
    },
    /// Answers `BoolValue`: whether the process exited within `wait_ms`.
    Terminate {
        pid: u32,
        #[serde(default)]
        exit_code: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_ms: Option<u64>,
    },

    // System
    GetVersion,
    Ping,
    Shutdown,
}

/// Wrapper for probe responses with correlation ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// Echoes the request's message ID; None for unsolicited notifications
    #[serde(default)]
    pub message_id: Option<u32>,

    /// The actual response (flattened into the same JSON object)
    #[serde(flatten)]
    pub response: ProbeResponseType,
}

/// Responses sent from the probe server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProbeResponseType {
    Success,
    Error {
        kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<u32>,
        message: String,
    },
    BoolValue {
        value: bool,
    },
    StringValue {
        value: String,
    },
    Account {
        data: AccountName,
        /// `DOMAIN\name`, `name` or `NONE_MAPPED`.
        display: String,
    },
    MemoryInfo {
        data: ProcessMemoryInfo,
    },
    IoCounters {
        data: ProcessIoCounters,
    },
    Environment {
        variables: Vec<(String, String)>,
    },
    Shutdown, // Server is stopping after this message
}

impl ProbeResponseType {
    pub fn from_error(err: &ProbeError) -> Self {
        ProbeResponseType::Error {
            kind: err.kind(),
            code: err.os_code(),
            message: err.to_string(),
        }
    }
}

impl ProbeRequest {
    /// Create a request with a correlation id
    pub fn request(message_id: u32, request: ProbeRequestType) -> Self {
        Self {
            message_id: Some(message_id),
            request,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl ProbeResponse {
    /// Create a response to a request
    pub fn response(message_id: Option<u32>, response: ProbeResponseType) -> Self {
        Self {
            message_id,
            response,
        }
    }

    /// Create a notification (no message_id)
    pub fn notification(response: ProbeResponseType) -> Self {
        Self {
            message_id: None,
            response,
        }
    }

    pub fn error(message_id: Option<u32>, err: &ProbeError) -> Self {
        Self::response(message_id, ProbeResponseType::from_error(err))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.response, ProbeResponseType::Error { .. })
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
