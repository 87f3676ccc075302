use crate::constants::TICKS_PER_SECOND;
use serde::{Deserialize, Serialize};

/// Memory and CPU time usage of a process.
///
/// Times are in native 100 ns ticks; `creation_time_ticks` is measured from
/// 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMemoryInfo {
    pub working_set_bytes: u64,
    pub user_time_ticks: u64,
    pub kernel_time_ticks: u64,
    pub creation_time_ticks: u64,
    pub ticks_per_second: u64,
}

impl ProcessMemoryInfo {
    pub fn new(
        working_set_bytes: u64,
        user_time_ticks: u64,
        kernel_time_ticks: u64,
        creation_time_ticks: u64,
    ) -> Self {
        Self {
            working_set_bytes,
            user_time_ticks,
            kernel_time_ticks,
            creation_time_ticks,
            ticks_per_second: TICKS_PER_SECOND,
        }
    }

    /// Combined user and kernel CPU time in seconds.
    pub fn cpu_seconds(&self) -> f64 {
        (self.user_time_ticks.saturating_add(self.kernel_time_ticks)) as f64
            / self.ticks_per_second as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIoCounters {
    pub read_ops: u64,
    pub write_ops: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub other_ops: u64,
    pub other_bytes: u64,
}

/// Result of probing a single address in a target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub base_address: u64,
    pub region_size: u64,
    pub state: u32,
    pub protect: u32,
}

pub const MEM_COMMIT: u32 = 0x1000;
pub const PAGE_NOACCESS: u32 = 0x01;
pub const PAGE_EXECUTE: u32 = 0x10;
pub const PAGE_GUARD: u32 = 0x100;

impl MemoryRegion {
    /// Committed, and its protection permits reading.
    pub fn is_readable(&self) -> bool {
        self.state == MEM_COMMIT
            && self.protect != 0
            && self.protect & (PAGE_NOACCESS | PAGE_EXECUTE | PAGE_GUARD) == 0
    }

    pub fn end(&self) -> u64 {
        self.base_address.saturating_add(self.region_size)
    }

    /// Bytes available from `address` to the end of the region.
    pub fn remaining_from(&self, address: u64) -> u64 {
        if address < self.base_address {
            return 0;
        }
        self.end().saturating_sub(address)
    }
}

/// String fields of the user process parameters block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessParameter {
    CurrentDirectory,
    ImagePath,
    CommandLine,
}

impl ProcessParameter {
    pub fn name(self) -> &'static str {
        match self {
            ProcessParameter::CurrentDirectory => "current directory",
            ProcessParameter::ImagePath => "image path",
            ProcessParameter::CommandLine => "command line",
        }
    }
}

/// Sentinel rendered for an owner SID with no account mapping.
pub const NONE_MAPPED: &str = "NONE_MAPPED";

/// Owner account of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountName {
    Mapped { domain: String, name: String },
    NoneMapped,
}

impl AccountName {
    /// Render as `DOMAIN\name` or `name`, or the `NONE_MAPPED` sentinel.
    pub fn to_legacy_string(&self, prepend_domain: bool) -> String {
        match self {
            AccountName::Mapped { domain, name } if prepend_domain && !domain.is_empty() => {
                format!("{}\\{}", domain, name)
            }
            AccountName::Mapped { name, .. } => name.clone(),
            AccountName::NoneMapped => NONE_MAPPED.to_string(),
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, AccountName::Mapped { .. })
    }
}
