//! Owner, counters and startup parameters of other processes.
//!
//! Remote strings are read by walking the target's PEB to its
//! RTL_USER_PROCESS_PARAMETERS. Every remote read is preceded by a region
//! probe, so a bad pointer in the target yields `InvalidPointer` instead of a
//! fault.

pub mod env_block;
pub mod layout;
pub mod remote;
pub mod sid;
pub mod types;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
use win32 as sys;

#[cfg(not(windows))]
mod unsupported;
#[cfg(not(windows))]
use unsupported as sys;

pub use env_block::parse_environment_block;
pub use layout::ProcessLayout;
pub use remote::{RemoteMemory, RemoteReader};
pub use sys::ProcessHandle;
pub use types::{
    AccountName, MemoryRegion, ProcessIoCounters, ProcessMemoryInfo, ProcessParameter,
    NONE_MAPPED,
};

use std::time::Duration;

use crate::config;
use crate::error::{ProbeError, Result};
use log::{debug, info};

/// Owner account of `pid`; the domain is left empty unless `prepend_domain`.
pub fn process_user_name(pid: u32, prepend_domain: bool) -> Result<AccountName> {
    sys::user_name(pid, prepend_domain)
}

/// Owner SID of `pid` in `S-1-...` form.
pub fn process_sid(pid: u32) -> Result<String> {
    sys::sid(pid)
}

pub fn process_memory_info(pid: u32) -> Result<ProcessMemoryInfo> {
    sys::memory_info(pid)
}

pub fn process_io_counters(pid: u32) -> Result<ProcessIoCounters> {
    sys::io_counters(pid)
}

/// Whether a process with this id is running, even if it cannot be queried.
pub fn exists(pid: u32) -> bool {
    sys::exists(pid)
}

/// Terminate `pid` with `exit_code`, then wait up to `wait` for it to exit.
///
/// Returns whether the process is known to have exited. Pid `0` is refused.
pub fn terminate(pid: u32, exit_code: u32, wait: Option<Duration>) -> Result<bool> {
    if pid == 0 || pid == std::process::id() {
        return Err(ProbeError::InvalidState {
            operation: "terminate",
            state: "current process",
        });
    }
    info!("[PROCESS] Terminating {} (exit code {})", pid, exit_code);
    sys::terminate(pid, exit_code, wait)
}

fn reader<M: RemoteMemory + ?Sized>(memory: &M) -> Result<RemoteReader<'_, M>> {
    let layout = ProcessLayout::native()?;
    RemoteReader::new(memory, layout, config::get().env_block_ceiling)
}

/// Raw environment block of the target, at most the configured ceiling.
pub fn read_remote_environment_block<M: RemoteMemory + ?Sized>(memory: &M) -> Result<Vec<u8>> {
    reader(memory)?.read_environment_block()
}

pub fn read_process_parameter<M: RemoteMemory + ?Sized>(
    memory: &M,
    parameter: ProcessParameter,
) -> Result<String> {
    reader(memory)?.read_parameter(parameter)
}

/// Parsed environment of `pid` (`0` for the current process).
pub fn process_environment(pid: u32) -> Result<Vec<(String, String)>> {
    let handle = ProcessHandle::open(pid)?;
    let block = read_remote_environment_block(&handle)?;
    let vars = parse_environment_block(&block);
    debug!(
        "[PROCESS] Read {} environment bytes ({} variables) from {}",
        block.len(),
        vars.len(),
        handle.pid()
    );
    Ok(vars)
}

pub fn process_current_directory(pid: u32) -> Result<String> {
    read_process_parameter(&ProcessHandle::open(pid)?, ProcessParameter::CurrentDirectory)
}

pub fn process_image_path(pid: u32) -> Result<String> {
    read_process_parameter(&ProcessHandle::open(pid)?, ProcessParameter::ImagePath)
}

pub fn process_command_line(pid: u32) -> Result<String> {
    read_process_parameter(&ProcessHandle::open(pid)?, ProcessParameter::CommandLine)
}

#[cfg(test)]
mod tests {
    use super::remote::tests::fake_target;
    use super::*;

    fn env_bytes(entries: &[&str]) -> Vec<u8> {
        let mut units: Vec<u16> = Vec::new();
        for e in entries {
            units.extend(e.encode_utf16());
            units.push(0);
        }
        units.push(0);
        units.iter().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn environment_walk_through_mock_target() {
        let mem = fake_target(&env_bytes(&["=C:=C:\\work", "PATH=C:\\bin", "TEMP=C:\\tmp"]));
        let block = read_remote_environment_block(&mem).unwrap();
        let vars = parse_environment_block(&block);
        assert_eq!(vars.len(), 3);
        assert_eq!(env_block::lookup(&vars, "path"), Some("C:\\bin"));
        assert_eq!(vars[0].0, "=C:");
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn parameter_read_through_mock_target() {
        let mem = fake_target(&env_bytes(&[]));
        assert_eq!(
            read_process_parameter(&mem, ProcessParameter::CommandLine).unwrap(),
            "tool.exe --flag \u{00e9}"
        );
    }

    #[test]
    fn terminating_self_is_refused() {
        for pid in [0, std::process::id()] {
            assert!(matches!(
                terminate(pid, 1, None),
                Err(ProbeError::InvalidState { operation: "terminate", .. })
            ));
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn introspection_is_not_implemented_off_windows() {
        assert!(matches!(
            terminate(1, 0, None),
            Err(ProbeError::NotImplemented(_))
        ));
        assert!(matches!(
            process_memory_info(1),
            Err(ProbeError::NotImplemented(_))
        ));
        assert!(matches!(
            process_command_line(1),
            Err(ProbeError::NotImplemented(_))
        ));
        assert!(matches!(
            read_remote_environment_block(&ProcessHandle::current()),
            Err(ProbeError::NotImplemented(_))
        ));
        assert!(!exists(1));
    }

    #[cfg(windows)]
    mod windows {
        use super::*;

        #[test]
        fn memory_info_of_current_process() {
            let info = process_memory_info(0).unwrap();
            assert_eq!(info.ticks_per_second, 10_000_000);
            assert!(info.working_set_bytes > 0);
            assert!(info.creation_time_ticks > 0);
        }

        #[test]
        fn io_counters_of_current_process() {
            assert!(process_io_counters(0).is_ok());
        }

        #[test]
        fn current_process_parameters() {
            let image = process_image_path(0).unwrap();
            let exe = std::env::current_exe().unwrap();
            let exe_name = exe.file_name().unwrap().to_string_lossy().to_lowercase();
            assert!(image.to_lowercase().ends_with(&exe_name));

            let cwd = process_current_directory(0).unwrap();
            assert!(!cwd.is_empty());
            assert!(!process_command_line(0).unwrap().is_empty());
        }

        #[test]
        fn current_process_environment_contains_set_variable() {
            std::env::set_var("HOST_PROBE_TEST_MARKER", "marker-value");
            let vars = process_environment(0).unwrap();
            assert_eq!(
                env_block::lookup(&vars, "HOST_PROBE_TEST_MARKER"),
                Some("marker-value")
            );
        }

        #[test]
        fn owner_of_current_process_is_mapped() {
            let name = process_user_name(0, true).unwrap();
            assert!(name.is_mapped());
            let sid = process_sid(0).unwrap();
            assert!(sid.starts_with("S-1-"));
        }

        #[test]
        fn terminate_kills_child_with_exit_code() {
            let mut child = std::process::Command::new("cmd")
                .args(["/C", "ping -n 30 127.0.0.1 > NUL"])
                .spawn()
                .unwrap();
            let exited = terminate(child.id(), 42, Some(Duration::from_secs(5))).unwrap();
            assert!(exited);
            assert_eq!(child.wait().unwrap().code(), Some(42));

            // The handle still names an exited process.
            assert!(matches!(
                terminate(child.id(), 42, None),
                Ok(true) | Err(ProbeError::ProcessNotFound { .. })
            ));
        }

        #[test]
        fn nonexistent_process_is_not_found() {
            // Process ids are multiples of four.
            assert!(matches!(
                process_memory_info(0xFFFF_FFF1),
                Err(ProbeError::ProcessNotFound { .. })
            ));
            assert!(!exists(0xFFFF_FFF1));
            assert!(exists(std::process::id()));
        }
    }
}
