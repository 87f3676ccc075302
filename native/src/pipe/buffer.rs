use crate::error::{ProbeError, Result};

/// Fixed-size heap buffer used as the target of overlapped I/O.
///
/// The allocation never moves, so its address stays valid while an operation
/// that owns it is in flight.
#[derive(Debug)]
pub struct DirectBuffer {
    bytes: Box<[u8]>,
}

impl DirectBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn check(&self, offset: usize, length: usize) -> Result<std::ops::Range<usize>> {
        let capacity = self.capacity();
        match offset.checked_add(length) {
            Some(end) if end <= capacity => Ok(offset..end),
            _ => Err(ProbeError::BufferRange {
                offset,
                length,
                capacity,
            }),
        }
    }

    pub fn slice(&self, offset: usize, length: usize) -> Result<&[u8]> {
        let range = self.check(offset, length)?;
        Ok(&self.bytes[range])
    }

    pub fn slice_mut(&mut self, offset: usize, length: usize) -> Result<&mut [u8]> {
        let range = self.check(offset, length)?;
        Ok(&mut self.bytes[range])
    }

    /// Copy `data` in at `offset`.
    pub fn fill(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.slice_mut(offset, data.len())?.copy_from_slice(data);
        Ok(())
    }
}
