//! Core error types and result handling
//!
//! Every failure the engine can hit maps onto one variant here. None of them
//! is fatal: the transaction state machine degrades to discard-and-wait or
//! timeout-and-report and keeps running.

use thiserror::Error;

/// Result type for bioflux_modbus operations
pub type ModbusResult<T> = std::result::Result<T, ModbusError>;

/// Modbus RTU master errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// The request store has no free slot; the caller must retry later
    #[error("request queue full")]
    QueueFull,

    /// The function code has no RTU encoding; nothing was transmitted
    #[error("invalid function code: 0x{0:02X}")]
    InvalidFunctionCode(u8),

    /// Received frame failed CRC validation
    #[error("CRC mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    CrcMismatch {
        /// CRC computed over the received frame body
        computed: u16,
        /// CRC carried in the trailing two frame bytes
        received: u16,
    },

    /// No valid reply arrived within the configured response timeout
    #[error("response timeout")]
    Timeout,

    /// The slave explicitly rejected the request
    #[error("modbus exception 0x{0:02X}")]
    Exception(u8),

    /// Receive accumulation buffer capacity exceeded
    #[error("receive buffer overflow")]
    BufferOverflow,

    /// Request parameters outside protocol limits
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Underlying serial transport failed
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Transport(err.to_string())
    }
}

// Helper methods for creating errors
impl ModbusError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        ModbusError::InvalidRequest(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        ModbusError::Transport(msg.into())
    }

    /// True for failures that complete a transaction (the callback fires)
    /// as opposed to failures surfaced directly to the enqueuing caller.
    pub fn completes_transaction(&self) -> bool {
        matches!(
            self,
            ModbusError::Timeout
                | ModbusError::Exception(_)
                | ModbusError::CrcMismatch { .. }
                | ModbusError::BufferOverflow
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ModbusError::InvalidFunctionCode(0x2B).to_string(),
            "invalid function code: 0x2B"
        );
        assert_eq!(
            ModbusError::CrcMismatch {
                computed: 0x0A84,
                received: 0xFFFF
            }
            .to_string(),
            "CRC mismatch: computed 0x0A84, received 0xFFFF"
        );
        assert_eq!(ModbusError::Timeout.to_string(), "response timeout");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "port gone");
        let err: ModbusError = io_err.into();
        assert!(matches!(err, ModbusError::Transport(_)));
        assert!(err.to_string().contains("port gone"));
    }

    #[test]
    fn test_completes_transaction() {
        assert!(ModbusError::Timeout.completes_transaction());
        assert!(ModbusError::Exception(0x02).completes_transaction());
        assert!(!ModbusError::QueueFull.completes_transaction());
        assert!(!ModbusError::InvalidFunctionCode(0x99).completes_transaction());
    }
}
