//! Modbus RTU CRC16 engine
//!
//! Standard Modbus CRC16 (polynomial 0xA001, initial value 0xFFFF), used both
//! to build outgoing frames and to validate incoming ones. The checksum is
//! appended to frames low byte first.

/// Calculate CRC16 checksum over a byte slice (Modbus RTU standard)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Verify the trailing CRC of a complete frame.
///
/// Recomputes the checksum over `frame[..len - 2]` and compares it against the
/// two trailing bytes (low byte first). Frames shorter than 3 bytes cannot
/// carry a checksum and always fail.
pub fn frame_crc_ok(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let body = &frame[..frame.len() - 2];
    let received = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
    crc16(body) == received
}
