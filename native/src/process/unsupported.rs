//! Fallback for targets without process introspection support.

use crate::error::{ProbeError, Result};

use super::remote::RemoteMemory;
use super::types::{AccountName, MemoryRegion, ProcessIoCounters, ProcessMemoryInfo};

/// Placeholder handle; every operation reports `NotImplemented`.
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn open(_pid: u32) -> Result<Self> {
        Err(ProbeError::NotImplemented("ProcessHandle::open"))
    }

    pub fn open_limited(_pid: u32) -> Result<Self> {
        Err(ProbeError::NotImplemented("ProcessHandle::open_limited"))
    }

    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl RemoteMemory for ProcessHandle {
    fn peb_address(&self) -> Result<u64> {
        Err(ProbeError::NotImplemented("remote memory access"))
    }

    fn query_region(&self, _address: u64) -> Result<Option<MemoryRegion>> {
        Err(ProbeError::NotImplemented("remote memory access"))
    }

    fn read(&self, _address: u64, _buf: &mut [u8]) -> Result<usize> {
        Err(ProbeError::NotImplemented("remote memory access"))
    }
}

pub fn user_name(_pid: u32, _prepend_domain: bool) -> Result<AccountName> {
    Err(ProbeError::NotImplemented("process_user_name"))
}

pub fn sid(_pid: u32) -> Result<String> {
    Err(ProbeError::NotImplemented("process_sid"))
}

pub fn memory_info(_pid: u32) -> Result<ProcessMemoryInfo> {
    Err(ProbeError::NotImplemented("process_memory_info"))
}

pub fn io_counters(_pid: u32) -> Result<ProcessIoCounters> {
    Err(ProbeError::NotImplemented("process_io_counters"))
}

pub fn terminate(_pid: u32, _exit_code: u32, _wait: Option<std::time::Duration>) -> Result<bool> {
    Err(ProbeError::NotImplemented("terminate"))
}

pub fn exists(_pid: u32) -> bool {
    false
}
