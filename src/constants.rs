//! Modbus RTU protocol constants based on the official specification
//!
//! Size limits derive from the RS485 ADU limit of 256 bytes:
//! ADU (256) - unit address (1) - CRC (2) = 253 bytes of PDU.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum RTU ADU size: unit address + PDU + CRC
pub const MAX_ADU_SIZE: usize = 256;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Minimum valid RTU reply: unit + function + one payload byte + 2 CRC bytes.
/// An exception reply (unit, fc|0x80, exception code, CRC) is exactly this long.
pub const MIN_RESPONSE_LEN: usize = 5;

/// Fixed reply length for all write echoes:
/// unit + function + 2-byte address + 2-byte value/quantity + 2 CRC bytes
pub const WRITE_RESPONSE_LEN: usize = 8;

// ============================================================================
// Addressing
// ============================================================================

/// Lowest addressable unit (slave) id
pub const UNIT_ID_MIN: u8 = 1;

/// Highest addressable unit (slave) id
pub const UNIT_ID_MAX: u8 = 247;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Response PDU: FC(1) + byte count(1) + N*2 <= 253 -> N <= 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers for FC16 (Write Multiple Registers)
///
/// Request PDU: FC(1) + addr(2) + qty(2) + byte count(1) + N*2 <= 253 -> N <= 123
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum coils for FC01/FC02 (Read Coils/Discrete Inputs)
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum coils for FC15 (Write Multiple Coils)
pub const MAX_WRITE_COILS: u16 = 1968;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Exception flag: set in the function code byte of an error reply
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Coil ON wire value for FC05
pub const COIL_ON: u16 = 0xFF00;

/// Coil OFF wire value for FC05
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Engine Defaults
// ============================================================================

/// Default response timeout (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Default request store capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Get human-readable exception description
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MAX_ADU_SIZE, 1 + MAX_PDU_SIZE + 2);
        assert_eq!(MIN_RESPONSE_LEN, 5);
        assert_eq!(WRITE_RESPONSE_LEN, 8);
    }

    #[test]
    fn test_register_limits() {
        // Read response PDU must fit
        let read_pdu = 1 + 1 + (MAX_READ_REGISTERS as usize * 2);
        assert!(read_pdu <= MAX_PDU_SIZE);

        // Write request PDU must fit
        let write_pdu = 1 + 2 + 2 + 1 + (MAX_WRITE_REGISTERS as usize * 2);
        assert!(write_pdu <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_coil_limits() {
        let read_coil_pdu = 1 + 1 + (MAX_READ_COILS as usize).div_ceil(8);
        assert!(read_coil_pdu <= MAX_PDU_SIZE);

        let write_coil_pdu = 1 + 2 + 2 + 1 + (MAX_WRITE_COILS as usize).div_ceil(8);
        assert!(write_coil_pdu <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_exception_descriptions() {
        assert_eq!(exception_description(0x02), "Illegal Data Address");
        assert_eq!(exception_description(0x0B), "Gateway Target Device Failed to Respond");
        assert_eq!(exception_description(0x7F), "Unknown Exception");
    }
}
