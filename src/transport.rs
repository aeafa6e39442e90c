//! Serial transport abstraction and transfer statistics
//!
//! The engine consumes a byte-oriented, non-blocking transport; it never owns
//! the port itself. A half-duplex RS485 transceiver exposes its direction
//! line through [`SerialTransport::set_tx_enable`]; full-duplex or
//! auto-direction hardware leaves the default no-op in place.

use serde::Serialize;

use crate::error::ModbusResult;

/// Byte-oriented, non-blocking serial transport consumed by the engine.
///
/// `write` and `flush` are the only calls allowed to take real time: `flush`
/// blocks until the bytes are physically out the wire, which the direction
/// switching depends on. `read_byte` must never block.
pub trait SerialTransport {
    /// Number of received bytes ready to read without blocking
    fn bytes_available(&self) -> usize;

    /// Take one received byte, or `None` if nothing is pending
    fn read_byte(&mut self) -> Option<u8>;

    /// Queue bytes for transmission
    fn write(&mut self, data: &[u8]) -> ModbusResult<()>;

    /// Block until all queued bytes have left the wire
    fn flush(&mut self) -> ModbusResult<()>;

    /// Drive the transceiver direction line; `true` selects transmit.
    ///
    /// Default is a no-op for transports without a direction line.
    fn set_tx_enable(&mut self, _enabled: bool) {}
}

/// Engine transfer statistics
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MasterStats {
    /// Frames transmitted
    pub requests_sent: u64,
    /// CRC-valid, non-exception replies received
    pub responses_received: u64,
    /// Exception replies received
    pub exceptions: u64,
    /// Transactions that ended in timeout
    pub timeouts: u64,
    /// Transactions failed on CRC under the strict CRC policy
    pub crc_errors: u64,
    /// Receive bytes dropped by the overflow policy
    pub overflow_bytes_dropped: u64,
    /// Requests whose frame could not be encoded
    pub encode_failures: u64,
}

/// Scripted in-memory transport for exercising the engine and the device
/// drivers built on top of it, without hardware on the bench.
///
/// Transmitted frames accumulate in [`MockSerial::written`]; replies are
/// staged with [`MockSerial::queue_rx`] and drained by the engine's tick.
#[derive(Debug, Default)]
pub struct MockSerial {
    rx: std::collections::VecDeque<u8>,
    tx: Vec<u8>,
    tx_enable: bool,
    tx_enable_transitions: Vec<bool>,
    flushes: u64,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage bytes the engine will receive on subsequent ticks
    pub fn queue_rx(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    /// Everything the engine has transmitted so far
    pub fn written(&self) -> &[u8] {
        &self.tx
    }

    /// Drop the transmit log, keeping staged receive bytes
    pub fn clear_written(&mut self) {
        self.tx.clear();
    }

    /// Current state of the direction line
    pub fn tx_enabled(&self) -> bool {
        self.tx_enable
    }

    /// Every direction line transition observed, in order
    pub fn tx_enable_transitions(&self) -> &[bool] {
        &self.tx_enable_transitions
    }

    /// Number of flush calls observed
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }
}

impl SerialTransport for MockSerial {
    fn bytes_available(&self) -> usize {
        self.rx.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, data: &[u8]) -> ModbusResult<()> {
        self.tx.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> ModbusResult<()> {
        self.flushes += 1;
        Ok(())
    }

    fn set_tx_enable(&mut self, enabled: bool) {
        if self.tx_enable != enabled {
            self.tx_enable_transitions.push(enabled);
        }
        self.tx_enable = enabled;
    }
}
