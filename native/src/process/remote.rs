//! Probe-then-read walker over another process's address space.

use crate::constants::NativeCode;
use crate::conversions::utf16_bytes_to_string;
use crate::error::{ProbeError, Result};
use log::{debug, trace};

use super::layout::ProcessLayout;
use super::types::{MemoryRegion, ProcessParameter};

/// Read access to a target process's virtual memory.
pub trait RemoteMemory {
    /// Address of the target's PEB.
    fn peb_address(&self) -> Result<u64>;

    /// Region containing `address`, or `None` when nothing is mapped there.
    fn query_region(&self, address: u64) -> Result<Option<MemoryRegion>>;

    /// Copy bytes starting at `address` into `buf`.
    ///
    /// A partial copy returns the number of bytes actually read.
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize>;

    /// Whether the target runs under WOW64.
    fn is_wow64(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Walks PEB → process parameters → strings, probing before each read.
pub struct RemoteReader<'a, M: RemoteMemory + ?Sized> {
    memory: &'a M,
    layout: &'a ProcessLayout,
    ceiling: usize,
}

impl<'a, M: RemoteMemory + ?Sized> RemoteReader<'a, M> {
    /// Fails with `UnsupportedPlatform` for WOW64 targets.
    pub fn new(memory: &'a M, layout: &'a ProcessLayout, ceiling: usize) -> Result<Self> {
        if memory.is_wow64()? {
            return Err(ProbeError::UnsupportedPlatform(
                "32-bit (WOW64) target process".to_string(),
            ));
        }
        Ok(Self {
            memory,
            layout,
            ceiling,
        })
    }

    /// Region containing `address`, which must be readable.
    pub fn probe(&self, address: u64) -> Result<MemoryRegion> {
        if address == 0 {
            return Err(ProbeError::InvalidPointer { address });
        }
        match self.memory.query_region(address)? {
            Some(region) if region.is_readable() && region.remaining_from(address) > 0 => {
                trace!(
                    "[PROCESS] Probe {:#x}: base {:#x} size {:#x} protect {:#x}",
                    address,
                    region.base_address,
                    region.region_size,
                    region.protect
                );
                Ok(region)
            }
            _ => Err(ProbeError::InvalidPointer { address }),
        }
    }

    /// Confirm every byte of `[address, address + length)` is readable.
    pub fn ensure_readable(&self, address: u64, length: usize) -> Result<()> {
        let end = address
            .checked_add(length as u64)
            .ok_or(ProbeError::InvalidPointer { address })?;

        let mut cursor = address;
        while cursor < end {
            let region = self.probe(cursor)?;
            cursor = region.end();
        }
        Ok(())
    }

    fn read_exact(&self, what: &'static str, address: u64, length: usize) -> Result<Vec<u8>> {
        self.ensure_readable(address, length)?;

        let mut buf = vec![0u8; length];
        let read = self
            .memory
            .read(address, &mut buf)
            .map_err(|e| match e.os_code() {
                Some(code) => ProbeError::RemoteReadFailed {
                    what,
                    address,
                    code,
                },
                None => e,
            })?;

        if read < length {
            return Err(ProbeError::PartialRead {
                address,
                requested: length,
                read,
            });
        }
        Ok(buf)
    }

    /// Fixed-size structure copies report any shortfall as a refused read.
    fn read_snapshot(&self, what: &'static str, address: u64, length: usize) -> Result<Vec<u8>> {
        self.read_exact(what, address, length).map_err(|e| match e {
            ProbeError::PartialRead { address, .. } => ProbeError::RemoteReadFailed {
                what,
                address,
                code: NativeCode::ERROR_PARTIAL_COPY.code(),
            },
            other => other,
        })
    }

    /// Address of the target's RTL_USER_PROCESS_PARAMETERS.
    pub fn process_parameters_address(&self) -> Result<u64> {
        let peb_address = self.memory.peb_address()?;
        let peb = self.read_snapshot("PEB", peb_address, self.layout.peb_size)?;
        let address = self
            .layout
            .read_pointer(&peb, self.layout.process_parameters_offset)?;
        debug!(
            "[PROCESS] PEB at {:#x}, process parameters at {:#x}",
            peb_address, address
        );
        Ok(address)
    }

    pub fn read_parameters_snapshot(&self) -> Result<Vec<u8>> {
        let address = self.process_parameters_address()?;
        self.read_snapshot(
            "process parameters",
            address,
            self.layout.parameters_size,
        )
    }

    /// Decode one of the counted UTF-16 strings in the parameters block.
    pub fn read_parameter(&self, parameter: ProcessParameter) -> Result<String> {
        let snapshot = self.read_parameters_snapshot()?;
        let descriptor = self
            .layout
            .unicode_string(&snapshot, self.layout.parameter_offset(parameter))?;

        // Odd lengths cannot hold whole code units.
        let length = (descriptor.length & !1) as usize;
        if length == 0 {
            return Ok(String::new());
        }

        let bytes = self.read_exact(parameter.name(), descriptor.buffer, length)?;
        Ok(utf16_bytes_to_string(&bytes))
    }

    /// Raw bytes of the environment block, clamped to its region and the ceiling.
    pub fn read_environment_block(&self) -> Result<Vec<u8>> {
        let snapshot = self.read_parameters_snapshot()?;
        let address = self
            .layout
            .read_pointer(&snapshot, self.layout.environment_offset)?;

        let region = self.probe(address)?;
        let available = region.remaining_from(address);
        let length = available.min(self.ceiling as u64) as usize;
        debug!(
            "[PROCESS] Environment at {:#x}: {:#x} bytes available, reading {:#x}",
            address, available, length
        );

        self.read_exact("environment block", address, length)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::process::types::MEM_COMMIT;
    use std::cell::RefCell;

    const PAGE_READWRITE: u32 = 0x04;

    /// In-process stand-in for a target address space.
    #[derive(Default)]
    pub struct MockMemory {
        pub peb: u64,
        pub wow64: bool,
        regions: Vec<(MemoryRegion, Vec<u8>)>,
        /// `(region base, limit)`: reads inside that region copy at most
        /// `limit` bytes and report a partial copy.
        short_reads: Vec<(u64, usize)>,
        pub reads: RefCell<Vec<(u64, usize)>>,
    }

    impl MockMemory {
        pub fn map(&mut self, base: u64, data: Vec<u8>, protect: u32) {
            let region = MemoryRegion {
                base_address: base,
                region_size: data.len() as u64,
                state: MEM_COMMIT,
                protect,
            };
            self.regions.push((region, data));
        }

        pub fn map_rw(&mut self, base: u64, data: Vec<u8>) {
            self.map(base, data, PAGE_READWRITE);
        }

        /// Cut every read in the region based at `base` short after `limit` bytes.
        pub fn short_read_at(&mut self, base: u64, limit: usize) {
            self.short_reads.push((base, limit));
        }

        fn find(&self, address: u64) -> Option<&(MemoryRegion, Vec<u8>)> {
            self.regions
                .iter()
                .find(|(r, _)| address >= r.base_address && address < r.end())
        }
    }

    impl RemoteMemory for MockMemory {
        fn peb_address(&self) -> Result<u64> {
            Ok(self.peb)
        }

        fn query_region(&self, address: u64) -> Result<Option<MemoryRegion>> {
            Ok(self.find(address).map(|(r, _)| *r))
        }

        fn read(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
            self.reads.borrow_mut().push((address, buf.len()));
            let (region, data) = match self.find(address) {
                Some(found) => found,
                None => panic!("dereferenced unmapped address {:#x}", address),
            };
            assert!(region.is_readable(), "read from unreadable region");

            let start = (address - region.base_address) as usize;
            let mut n = buf.len().min(data.len() - start);
            if let Some((_, limit)) = self
                .short_reads
                .iter()
                .find(|(base, _)| *base == region.base_address)
            {
                n = n.min(*limit);
            }
            buf[..n].copy_from_slice(&data[start..start + n]);
            Ok(n)
        }

        fn is_wow64(&self) -> Result<bool> {
            Ok(self.wow64)
        }
    }

    pub const PEB: u64 = 0x7ff0_0000_0000;
    pub const PARAMS: u64 = 0x0000_0200_0000_0000;
    pub const STRINGS: u64 = 0x0000_0200_0001_0000;
    pub const ENV: u64 = 0x0000_0200_0002_0000;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn put_string(params: &mut [u8], offset: usize, length: u16, buffer: u64) {
        params[offset..offset + 2].copy_from_slice(&length.to_le_bytes());
        params[offset + 2..offset + 4].copy_from_slice(&length.to_le_bytes());
        params[offset + 8..offset + 16].copy_from_slice(&buffer.to_le_bytes());
    }

    /// Target with cwd, image path, command line and an environment block.
    pub fn fake_target(env: &[u8]) -> MockMemory {
        let layout = ProcessLayout::X64;
        let mut mem = MockMemory {
            peb: PEB,
            ..Default::default()
        };

        let mut peb = vec![0u8; 0x1000];
        peb[layout.process_parameters_offset..layout.process_parameters_offset + 8]
            .copy_from_slice(&PARAMS.to_le_bytes());
        mem.map_rw(PEB, peb);

        let cwd = utf16("C:\\work\\");
        let image = utf16("C:\\bin\\tool.exe");
        let cmdline = utf16("tool.exe --flag \u{00e9}");
        let mut strings = Vec::new();
        let cwd_at = STRINGS;
        strings.extend_from_slice(&cwd);
        let image_at = STRINGS + strings.len() as u64;
        strings.extend_from_slice(&image);
        let cmdline_at = STRINGS + strings.len() as u64;
        strings.extend_from_slice(&cmdline);
        strings.resize(0x1000, 0);
        mem.map_rw(STRINGS, strings);

        let mut params = vec![0u8; 0x1000];
        put_string(&mut params, layout.current_directory_offset, cwd.len() as u16, cwd_at);
        put_string(&mut params, layout.image_path_offset, image.len() as u16, image_at);
        put_string(&mut params, layout.command_line_offset, cmdline.len() as u16, cmdline_at);
        params[layout.environment_offset..layout.environment_offset + 8]
            .copy_from_slice(&ENV.to_le_bytes());
        mem.map_rw(PARAMS, params);

        mem.map_rw(ENV, env.to_vec());
        mem
    }

    fn reader(mem: &MockMemory) -> RemoteReader<'_, MockMemory> {
        RemoteReader::new(mem, &ProcessLayout::X64, 0x38000).unwrap()
    }

    #[test]
    fn reads_each_parameter_string() {
        let mem = fake_target(&[0u8; 64]);
        let r = reader(&mem);
        assert_eq!(
            r.read_parameter(ProcessParameter::CurrentDirectory).unwrap(),
            "C:\\work\\"
        );
        assert_eq!(
            r.read_parameter(ProcessParameter::ImagePath).unwrap(),
            "C:\\bin\\tool.exe"
        );
        assert_eq!(
            r.read_parameter(ProcessParameter::CommandLine).unwrap(),
            "tool.exe --flag \u{00e9}"
        );
    }

    #[test]
    fn string_of_l_bytes_reads_back_as_half_as_many_units() {
        let mem = fake_target(&[0u8; 64]);
        let s = reader(&mem)
            .read_parameter(ProcessParameter::ImagePath)
            .unwrap();
        let l = "C:\\bin\\tool.exe".encode_utf16().count() * 2;
        assert_eq!(s.encode_utf16().count(), l / 2);
    }

    #[test]
    fn unmapped_parameters_page_is_invalid_pointer() {
        let mut mem = fake_target(&[0u8; 64]);
        mem.regions.retain(|(r, _)| r.base_address != PARAMS);
        let err = reader(&mem)
            .read_parameter(ProcessParameter::CommandLine)
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidPointer { address } if address == PARAMS));
    }

    #[test]
    fn no_access_region_is_never_read() {
        let mut mem = fake_target(&[0u8; 64]);
        mem.regions.retain(|(r, _)| r.base_address != ENV);
        mem.map(ENV, vec![0u8; 64], crate::process::types::PAGE_NOACCESS);
        let err = reader(&mem).read_environment_block().unwrap_err();
        assert!(matches!(err, ProbeError::InvalidPointer { .. }));
        assert!(mem.reads.borrow().iter().all(|(addr, _)| *addr != ENV));
    }

    #[test]
    fn environment_is_clamped_to_region_remainder() {
        let env = vec![0x41u8; 0x300];
        let mem = fake_target(&env);
        let block = reader(&mem).read_environment_block().unwrap();
        assert_eq!(block.len(), 0x300);
    }

    #[test]
    fn environment_is_clamped_to_ceiling() {
        let env = vec![0x41u8; 0x300];
        let mem = fake_target(&env);
        let r = RemoteReader::new(&mem, &ProcessLayout::X64, 0x100).unwrap();
        assert_eq!(r.read_environment_block().unwrap().len(), 0x100);
    }

    #[test]
    fn empty_string_needs_no_read() {
        let mut mem = fake_target(&[0u8; 64]);
        let layout = ProcessLayout::X64;
        let params = mem
            .regions
            .iter_mut()
            .find(|(r, _)| r.base_address == PARAMS)
            .map(|(_, d)| d)
            .unwrap();
        put_string(params, layout.current_directory_offset, 0, 0);
        let r = reader(&mem);
        assert_eq!(r.read_parameter(ProcessParameter::CurrentDirectory).unwrap(), "");
        assert!(mem.reads.borrow().iter().all(|(addr, _)| *addr != 0));
    }

    #[test]
    fn short_snapshot_read_is_refused_read() {
        let mut mem = fake_target(&[0u8; 64]);
        mem.short_read_at(PEB, 4);
        let err = reader(&mem)
            .read_parameter(ProcessParameter::ImagePath)
            .unwrap_err();
        assert!(matches!(
            err,
            ProbeError::RemoteReadFailed { what: "PEB", code: 299, .. }
        ));
    }

    #[test]
    fn short_parameters_snapshot_is_refused_read() {
        let mut mem = fake_target(&[0u8; 64]);
        mem.short_read_at(PARAMS, 0x10);
        let err = reader(&mem).read_environment_block().unwrap_err();
        assert!(matches!(
            err,
            ProbeError::RemoteReadFailed { what: "process parameters", address: PARAMS, code: 299 }
        ));
    }

    #[test]
    fn short_command_line_read_is_partial() {
        let mut mem = fake_target(&[0u8; 64]);
        mem.short_read_at(STRINGS, 6);
        let r = reader(&mem);
        let expected = "tool.exe --flag \u{00e9}".encode_utf16().count() * 2;
        match r.read_parameter(ProcessParameter::CommandLine).unwrap_err() {
            ProbeError::PartialRead {
                requested, read, ..
            } => {
                assert_eq!(requested, expected);
                assert_eq!(read, 6);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn short_environment_read_is_partial() {
        let env = vec![0x41u8; 0x300];
        let mut mem = fake_target(&env);
        mem.short_read_at(ENV, 0x80);
        let err = reader(&mem).read_environment_block().unwrap_err();
        assert!(matches!(
            err,
            ProbeError::PartialRead { address: ENV, requested: 0x300, read: 0x80 }
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn wow64_target_is_rejected_before_reading() {
        let mut mem = fake_target(&[0u8; 64]);
        mem.wow64 = true;
        let result = RemoteReader::new(&mem, &ProcessLayout::X64, 0x38000);
        assert!(matches!(result, Err(ProbeError::UnsupportedPlatform(_))));
        assert!(mem.reads.borrow().is_empty());
    }

    #[test]
    fn range_spanning_regions_is_checked_piecewise() {
        let mut mem = MockMemory::default();
        mem.map_rw(0x1000, vec![0u8; 0x1000]);
        mem.map_rw(0x2000, vec![0u8; 0x1000]);
        let r = reader(&mem);
        assert!(r.ensure_readable(0x1800, 0x1000).is_ok());
        assert!(matches!(
            r.ensure_readable(0x2800, 0x1000),
            Err(ProbeError::InvalidPointer { address: 0x3000 })
        ));
    }

    #[test]
    fn null_pointer_is_invalid() {
        let mem = MockMemory::default();
        assert!(matches!(
            reader(&mem).probe(0),
            Err(ProbeError::InvalidPointer { address: 0 })
        ));
    }
}
