//! Win32 backing for process introspection.

use std::ffi::c_void;
use std::mem::size_of;
use std::time::Duration;

use log::{debug, warn};
use windows::core::{PCWSTR, PWSTR};
use windows::Wdk::System::Threading::{
    NtQueryInformationProcess, ProcessBasicInformation, ProcessWow64Information, PROCESSINFOCLASS,
};
use windows::Win32::Foundation::{CloseHandle, FILETIME, HANDLE};
use windows::Win32::Security::{
    GetLengthSid, GetTokenInformation, LookupAccountSidW, TokenUser, PSID, SID_NAME_USE,
    TOKEN_QUERY, TOKEN_USER,
};
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Memory::{VirtualQueryEx, MEMORY_BASIC_INFORMATION};
use windows::Win32::System::ProcessStatus::{GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS};
use windows::Win32::System::Threading::{
    GetCurrentProcess, GetCurrentProcessId, GetProcessIoCounters, GetProcessTimes, OpenProcess,
    OpenProcessToken, TerminateProcess, WaitForSingleObject, IO_COUNTERS, PROCESS_ACCESS_RIGHTS,
    PROCESS_BASIC_INFORMATION, PROCESS_QUERY_INFORMATION, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_SYNCHRONIZE, PROCESS_TERMINATE, PROCESS_VM_READ,
};

use crate::constants::NativeCode;
use crate::error::{last_os_error, win32_code, ProbeError, Result};
use crate::pipe::{decode_wait, timeout_millis, WaitOutcome};

use super::remote::RemoteMemory;
use super::sid::format_sid;
use super::types::{AccountName, MemoryRegion, ProcessIoCounters, ProcessMemoryInfo};

/// Owned handle to a target process, closed on drop.
pub struct ProcessHandle {
    handle: HANDLE,
    pid: u32,
    owned: bool,
}

// Process handles may be used from any thread.
unsafe impl Send for ProcessHandle {}

impl ProcessHandle {
    /// Open with query and VM read rights; pid `0` is the current process.
    pub fn open(pid: u32) -> Result<Self> {
        Self::open_with(pid, PROCESS_QUERY_INFORMATION | PROCESS_VM_READ)
    }

    /// Open with limited query rights only.
    pub fn open_limited(pid: u32) -> Result<Self> {
        Self::open_with(pid, PROCESS_QUERY_LIMITED_INFORMATION)
    }

    /// Pseudo handle to the calling process.
    pub fn current() -> Self {
        Self {
            handle: unsafe { GetCurrentProcess() },
            pid: unsafe { GetCurrentProcessId() },
            owned: false,
        }
    }

    fn open_with(pid: u32, access: PROCESS_ACCESS_RIGHTS) -> Result<Self> {
        if pid == 0 {
            return Ok(Self::current());
        }

        match unsafe { OpenProcess(access, false, pid) } {
            Ok(handle) => Ok(Self {
                handle,
                pid,
                owned: true,
            }),
            Err(e) => {
                let code = win32_code(&e);
                debug!("[PROCESS] OpenProcess({}) failed: os error {}", pid, code);
                Err(match code {
                    c if c == NativeCode::ERROR_INVALID_PARAMETER => {
                        ProbeError::ProcessNotFound { pid }
                    }
                    c if c == NativeCode::ERROR_ACCESS_DENIED => {
                        ProbeError::AccessDenied { pid, code }
                    }
                    _ => ProbeError::ProcessNotAccessible { pid, code },
                })
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait up to `timeout` for the process to exit.
    fn wait_exit(&self, timeout: Duration) -> Result<bool> {
        let raw = unsafe { WaitForSingleObject(self.handle, timeout_millis(Some(timeout))) };
        match decode_wait(raw.0, 1)? {
            WaitOutcome::Signaled(_) | WaitOutcome::Abandoned(_) => Ok(true),
            WaitOutcome::Timeout => Ok(false),
        }
    }

    pub fn raw(&self) -> HANDLE {
        self.handle
    }

    fn query_information<T: Default>(
        &self,
        class: PROCESSINFOCLASS,
        context: &'static str,
    ) -> Result<T> {
        let mut info = T::default();
        let mut returned = 0u32;
        let status = unsafe {
            NtQueryInformationProcess(
                self.handle,
                class,
                &mut info as *mut T as *mut c_void,
                size_of::<T>() as u32,
                &mut returned,
            )
        };
        if status.0 < 0 {
            return Err(ProbeError::Os {
                context,
                code: status.0 as u32,
            });
        }
        Ok(info)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.owned && !self.handle.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }
}

impl RemoteMemory for ProcessHandle {
    fn peb_address(&self) -> Result<u64> {
        let info: PROCESS_BASIC_INFORMATION =
            self.query_information(ProcessBasicInformation, "NtQueryInformationProcess")?;
        Ok(info.PebBaseAddress as u64)
    }

    fn query_region(&self, address: u64) -> Result<Option<MemoryRegion>> {
        let mut mbi = MEMORY_BASIC_INFORMATION::default();
        let written = unsafe {
            VirtualQueryEx(
                self.handle,
                Some(address as *const c_void),
                &mut mbi,
                size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };

        if written == 0 {
            debug!(
                "[PROCESS] VirtualQueryEx({:#x}) failed: os error {}",
                address,
                last_os_error()
            );
            return Ok(None);
        }

        Ok(Some(MemoryRegion {
            base_address: mbi.BaseAddress as u64,
            region_size: mbi.RegionSize as u64,
            state: mbi.State.0,
            protect: mbi.Protect.0,
        }))
    }

    fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
        let mut read = 0usize;
        let result = unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                Some(&mut read),
            )
        };

        match result {
            Ok(()) => Ok(read),
            Err(e) if win32_code(&e) == NativeCode::ERROR_PARTIAL_COPY => Ok(read),
            Err(e) => Err(ProbeError::os("ReadProcessMemory", &e)),
        }
    }

    fn is_wow64(&self) -> Result<bool> {
        let peb32: usize =
            self.query_information(ProcessWow64Information, "NtQueryInformationProcess")?;
        Ok(peb32 != 0)
    }
}

struct TokenHandle(HANDLE);

impl Drop for TokenHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Run `f` with the token user SID of `pid`.
fn with_token_user<T>(pid: u32, f: impl FnOnce(PSID) -> Result<T>) -> Result<T> {
    let process = ProcessHandle::open_limited(pid).map_err(|e| match e {
        ProbeError::ProcessNotAccessible { pid, code } => ProbeError::AccessDenied { pid, code },
        other => other,
    })?;

    let mut raw = HANDLE::default();
    unsafe { OpenProcessToken(process.raw(), TOKEN_QUERY, &mut raw) }
        .map_err(|e| ProbeError::AccessDenied {
            pid,
            code: win32_code(&e),
        })?;
    let token = TokenHandle(raw);

    let mut needed = 0u32;
    let _ = unsafe { GetTokenInformation(token.0, TokenUser, None, 0, &mut needed) };
    if needed == 0 {
        return Err(ProbeError::AccessDenied {
            pid,
            code: last_os_error(),
        });
    }

    // u64 storage keeps TOKEN_USER aligned.
    let mut storage = vec![0u64; (needed as usize).div_ceil(8)];
    unsafe {
        GetTokenInformation(
            token.0,
            TokenUser,
            Some(storage.as_mut_ptr() as *mut c_void),
            needed,
            &mut needed,
        )
    }
    .map_err(|e| ProbeError::AccessDenied {
        pid,
        code: win32_code(&e),
    })?;

    let token_user = unsafe { &*(storage.as_ptr() as *const TOKEN_USER) };
    f(token_user.User.Sid)
}

pub fn user_name(pid: u32, prepend_domain: bool) -> Result<AccountName> {
    with_token_user(pid, |sid| {
        let mut name_len = 0u32;
        let mut domain_len = 0u32;
        let mut use_kind = SID_NAME_USE::default();

        let sizing = unsafe {
            LookupAccountSidW(
                PCWSTR::null(),
                sid,
                None,
                &mut name_len,
                None,
                &mut domain_len,
                &mut use_kind,
            )
        };
        if let Err(e) = sizing {
            let code = win32_code(&e);
            if code == NativeCode::ERROR_NONE_MAPPED {
                debug!("[PROCESS] Owner SID of {} has no account mapping", pid);
                return Ok(AccountName::NoneMapped);
            }
            if name_len == 0 {
                return Err(ProbeError::Os {
                    context: "LookupAccountSidW",
                    code,
                });
            }
        }

        let mut name = vec![0u16; name_len as usize];
        let mut domain = vec![0u16; domain_len.max(1) as usize];
        unsafe {
            LookupAccountSidW(
                PCWSTR::null(),
                sid,
                Some(PWSTR(name.as_mut_ptr())),
                &mut name_len,
                Some(PWSTR(domain.as_mut_ptr())),
                &mut domain_len,
                &mut use_kind,
            )
        }
        .map_err(|e| ProbeError::os("LookupAccountSidW", &e))?;

        let name = String::from_utf16_lossy(&name[..name_len as usize]);
        let domain = if prepend_domain {
            String::from_utf16_lossy(&domain[..domain_len as usize])
        } else {
            String::new()
        };
        Ok(AccountName::Mapped { domain, name })
    })
}

pub fn sid(pid: u32) -> Result<String> {
    with_token_user(pid, |sid| {
        if sid.is_invalid() {
            return Err(ProbeError::Malformed("token user SID is null".to_string()));
        }
        let len = unsafe { GetLengthSid(sid) } as usize;
        let bytes = unsafe { std::slice::from_raw_parts(sid.0 as *const u8, len) };
        format_sid(bytes)
    })
}

fn filetime_ticks(ft: &FILETIME) -> u64 {
    ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64
}

fn not_accessible(pid: u32, context: &'static str, err: &windows::core::Error) -> ProbeError {
    let code = win32_code(err);
    warn!("[PROCESS] {} failed for {}: os error {}", context, pid, code);
    ProbeError::ProcessNotAccessible { pid, code }
}

pub fn memory_info(pid: u32) -> Result<ProcessMemoryInfo> {
    let process = ProcessHandle::open_limited(pid)?;

    let mut counters = PROCESS_MEMORY_COUNTERS {
        cb: size_of::<PROCESS_MEMORY_COUNTERS>() as u32,
        ..Default::default()
    };
    unsafe { GetProcessMemoryInfo(process.raw(), &mut counters, counters.cb) }
        .map_err(|e| not_accessible(pid, "GetProcessMemoryInfo", &e))?;

    let mut creation = FILETIME::default();
    let mut exit = FILETIME::default();
    let mut kernel = FILETIME::default();
    let mut user = FILETIME::default();
    unsafe {
        GetProcessTimes(
            process.raw(),
            &mut creation,
            &mut exit,
            &mut kernel,
            &mut user,
        )
    }
    .map_err(|e| not_accessible(pid, "GetProcessTimes", &e))?;

    Ok(ProcessMemoryInfo::new(
        counters.WorkingSetSize as u64,
        filetime_ticks(&user),
        filetime_ticks(&kernel),
        filetime_ticks(&creation),
    ))
}

pub fn io_counters(pid: u32) -> Result<ProcessIoCounters> {
    let process = ProcessHandle::open_limited(pid)?;

    let mut io = IO_COUNTERS::default();
    unsafe { GetProcessIoCounters(process.raw(), &mut io) }
        .map_err(|e| not_accessible(pid, "GetProcessIoCounters", &e))?;

    Ok(ProcessIoCounters {
        read_ops: io.ReadOperationCount,
        write_ops: io.WriteOperationCount,
        read_bytes: io.ReadTransferCount,
        write_bytes: io.WriteTransferCount,
        other_ops: io.OtherOperationCount,
        other_bytes: io.OtherTransferCount,
    })
}

pub fn terminate(pid: u32, exit_code: u32, wait: Option<Duration>) -> Result<bool> {
    let process = ProcessHandle::open_with(pid, PROCESS_TERMINATE | PROCESS_SYNCHRONIZE)?;

    if let Err(e) = unsafe { TerminateProcess(process.raw(), exit_code) } {
        let code = win32_code(&e);
        // Already exiting processes refuse termination.
        if process.wait_exit(Duration::ZERO)? {
            debug!("[PROCESS] {} had already exited", pid);
            return Ok(true);
        }
        return Err(match code {
            c if c == NativeCode::ERROR_ACCESS_DENIED => ProbeError::AccessDenied { pid, code },
            _ => ProbeError::Os {
                context: "TerminateProcess",
                code,
            },
        });
    }

    let exited = process.wait_exit(wait.unwrap_or(Duration::ZERO))?;
    debug!(
        "[PROCESS] Terminated {} with exit code {} (exited: {})",
        pid, exit_code, exited
    );
    Ok(exited)
}

pub fn exists(pid: u32) -> bool {
    match ProcessHandle::open_limited(pid) {
        Ok(_) => true,
        Err(ProbeError::AccessDenied { .. }) => true,
        Err(_) => false,
    }
}
