//! Receive accumulation buffer
//!
//! Fixed-size stack array sized for one maximum RTU ADU. Incoming reply bytes
//! are accumulated here across ticks until the decoder recognizes a complete
//! frame. Pushing past capacity is reported, not fatal: the engine decides
//! per its overflow policy whether to discard the byte or fail the
//! transaction.

use crate::constants::MAX_ADU_SIZE;
use crate::error::{ModbusError, ModbusResult};

/// Fixed-capacity frame accumulation buffer
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_ADU_SIZE],
    /// Actual data length
    len: usize,
}

impl FrameBuffer {
    /// Create an empty buffer
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_ADU_SIZE],
            len: 0,
        }
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_ADU_SIZE {
            return Err(ModbusError::BufferOverflow);
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get current length
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remaining capacity in bytes
    #[inline]
    pub fn remaining(&self) -> usize {
        MAX_ADU_SIZE - self.len
    }

    /// Discard all accumulated bytes
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let mut buf = FrameBuffer::new();
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
        assert_eq!(buf.remaining(), MAX_ADU_SIZE);

        buf.push(0x05).unwrap();
        buf.push(0x03).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.as_slice(), &[0x05, 0x03]);
        assert_eq!(buf.remaining(), MAX_ADU_SIZE - 2);
    }

    #[test]
    fn test_push_until_full() {
        let mut buf = FrameBuffer::new();
        for i in 0..MAX_ADU_SIZE {
            buf.push(i as u8).unwrap();
        }
        assert_eq!(buf.len(), MAX_ADU_SIZE);
        assert_eq!(buf.remaining(), 0);

        // Next push reports overflow, buffer contents untouched
        assert_eq!(buf.push(0xFF), Err(ModbusError::BufferOverflow));
        assert_eq!(buf.len(), MAX_ADU_SIZE);
    }

    #[test]
    fn test_clear() {
        let mut buf = FrameBuffer::new();
        buf.push(0xAA).unwrap();
        buf.push(0xBB).unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.as_slice(), &[] as &[u8]);

        // Reusable after clear
        buf.push(0xCC).unwrap();
        assert_eq!(buf.as_slice(), &[0xCC]);
    }
}
