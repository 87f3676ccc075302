//! Offset tables for the kernel structures walked in a target process.

use crate::conversions::{read_u16_le, read_u64_le};
use crate::error::{ProbeError, Result};

use super::types::ProcessParameter;

/// Counted UTF-16 string descriptor as laid out in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicodeStringRef {
    /// Byte length, excluding any terminator.
    pub length: u16,
    pub maximum_length: u16,
    pub buffer: u64,
}

/// Versioned description of the PEB and user process parameters layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLayout {
    pub name: &'static str,
    pub pointer_size: usize,
    /// Bytes copied from the PEB.
    pub peb_size: usize,
    pub process_parameters_offset: usize,
    /// Bytes copied from RTL_USER_PROCESS_PARAMETERS.
    pub parameters_size: usize,
    pub current_directory_offset: usize,
    pub image_path_offset: usize,
    pub command_line_offset: usize,
    pub environment_offset: usize,
    /// Offset of the buffer pointer inside a UNICODE_STRING.
    pub unicode_buffer_offset: usize,
}

impl ProcessLayout {
    pub const X64: ProcessLayout = ProcessLayout {
        name: "x64",
        pointer_size: 8,
        peb_size: 0x28,
        process_parameters_offset: 0x20,
        parameters_size: 0x88,
        current_directory_offset: 0x38,
        image_path_offset: 0x60,
        command_line_offset: 0x70,
        environment_offset: 0x80,
        unicode_buffer_offset: 8,
    };

    /// Layout matching the running build, if any.
    pub fn native() -> Result<&'static ProcessLayout> {
        if cfg!(target_pointer_width = "64") {
            Ok(&Self::X64)
        } else {
            Err(ProbeError::UnsupportedPlatform(format!(
                "{}-bit builds cannot walk 64-bit process structures",
                usize::BITS
            )))
        }
    }

    pub fn parameter_offset(&self, parameter: ProcessParameter) -> usize {
        match parameter {
            ProcessParameter::CurrentDirectory => self.current_directory_offset,
            ProcessParameter::ImagePath => self.image_path_offset,
            ProcessParameter::CommandLine => self.command_line_offset,
        }
    }

    pub fn unicode_string_size(&self) -> usize {
        self.unicode_buffer_offset + self.pointer_size
    }

    /// Read a pointer-sized field from a snapshot.
    pub fn read_pointer(&self, snapshot: &[u8], offset: usize) -> Result<u64> {
        if self.pointer_size != 8 {
            return Err(ProbeError::UnsupportedPlatform(format!(
                "{} pointer size {}",
                self.name, self.pointer_size
            )));
        }
        read_u64_le(snapshot, offset).ok_or_else(|| {
            ProbeError::Malformed(format!(
                "pointer at {:#x} outside {}-byte snapshot",
                offset,
                snapshot.len()
            ))
        })
    }

    /// Decode a UNICODE_STRING descriptor from a snapshot.
    pub fn unicode_string(&self, snapshot: &[u8], offset: usize) -> Result<UnicodeStringRef> {
        let end = offset.checked_add(self.unicode_string_size());
        if end.map_or(true, |end| end > snapshot.len()) {
            return Err(ProbeError::Malformed(format!(
                "string descriptor at {:#x} outside {}-byte snapshot",
                offset,
                snapshot.len()
            )));
        }

        let length = read_u16_le(snapshot, offset).unwrap_or_default();
        let maximum_length = read_u16_le(snapshot, offset + 2).unwrap_or_default();
        let buffer = self.read_pointer(snapshot, offset + self.unicode_buffer_offset)?;

        Ok(UnicodeStringRef {
            length,
            maximum_length,
            buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_string(offset: usize, length: u16, buffer: u64) -> Vec<u8> {
        let layout = ProcessLayout::X64;
        let mut snap = vec![0u8; layout.parameters_size];
        snap[offset..offset + 2].copy_from_slice(&length.to_le_bytes());
        snap[offset + 2..offset + 4].copy_from_slice(&(length + 2).to_le_bytes());
        snap[offset + 8..offset + 16].copy_from_slice(&buffer.to_le_bytes());
        snap
    }

    #[test]
    fn x64_offsets_fit_their_snapshots() {
        let l = ProcessLayout::X64;
        assert!(l.process_parameters_offset + l.pointer_size <= l.peb_size);
        assert!(l.environment_offset + l.pointer_size <= l.parameters_size);
        for p in [
            ProcessParameter::CurrentDirectory,
            ProcessParameter::ImagePath,
            ProcessParameter::CommandLine,
        ] {
            assert!(l.parameter_offset(p) + l.unicode_string_size() <= l.parameters_size);
        }
    }

    #[test]
    fn decodes_command_line_descriptor() {
        let l = ProcessLayout::X64;
        let snap = snapshot_with_string(l.command_line_offset, 24, 0x0000_0200_0000_1000);
        let s = l.unicode_string(&snap, l.command_line_offset).unwrap();
        assert_eq!(s.length, 24);
        assert_eq!(s.maximum_length, 26);
        assert_eq!(s.buffer, 0x0000_0200_0000_1000);
    }

    #[test]
    fn descriptor_outside_snapshot_is_malformed() {
        let l = ProcessLayout::X64;
        let snap = vec![0u8; 0x40];
        assert!(matches!(
            l.unicode_string(&snap, l.image_path_offset),
            Err(ProbeError::Malformed(_))
        ));
        assert!(matches!(
            l.read_pointer(&snap, usize::MAX - 2),
            Err(ProbeError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_pointer_width_fails_closed() {
        let l = ProcessLayout {
            pointer_size: 4,
            ..ProcessLayout::X64
        };
        assert!(matches!(
            l.read_pointer(&[0u8; 16], 0),
            Err(ProbeError::UnsupportedPlatform(_))
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn native_layout_is_x64_on_64_bit() {
        assert_eq!(ProcessLayout::native().unwrap().name, "x64");
    }
}
