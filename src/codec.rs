//! RTU frame encoder and incremental response decoder
//!
//! Pure, stateless services called by the transaction state machine. The
//! encoder turns one request into a complete ADU:
//! `[unit][function][payload][crc_lo][crc_hi]`. The decoder inspects the
//! accumulation buffer as bytes dribble in across ticks, works out the
//! expected reply length from the function code and byte-count field, and
//! validates the CRC once enough bytes are present.
//!
//! Coil bit arrays use packed word storage on the request side: logical coil
//! `i` is bit `i % 16` of word `i / 16`, and travels on the wire as bit
//! `i % 8` of payload byte `i / 8` (LSB first).

use tracing::{trace, warn};

use crate::constants::{
    exception_description, COIL_OFF, COIL_ON, EXCEPTION_FLAG, FC_READ_COILS,
    FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, MAX_WRITE_COILS, MAX_WRITE_REGISTERS, MIN_RESPONSE_LEN,
    WRITE_RESPONSE_LEN,
};
use crate::crc::{crc16, frame_crc_ok};
use crate::error::{ModbusError, ModbusResult};
use crate::queue::Request;

/// What the accumulation buffer currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Not enough bytes yet to complete a frame (or length undeterminable)
    Pending,
    /// A CRC-valid frame of this many bytes starts the buffer
    Complete(usize),
    /// Enough bytes for a frame, but the trailing checksum does not match
    CrcMismatch {
        /// CRC computed over the frame body
        computed: u16,
        /// CRC carried in the trailing two bytes
        received: u16,
    },
}

/// Encode a request into a complete RTU frame.
///
/// Fails without producing any bytes when the function code has no RTU
/// encoding or the request parameters cannot be framed; nothing reaches the
/// wire in that case.
pub fn encode_request(request: &Request) -> ModbusResult<Vec<u8>> {
    let mut frame = Vec::with_capacity(8 + request.data.len() * 2);
    frame.push(request.unit_id);
    frame.push(request.function);

    match request.function {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS => {
            frame.extend_from_slice(&request.address.to_be_bytes());
            frame.extend_from_slice(&request.quantity.to_be_bytes());
        },
        FC_WRITE_SINGLE_COIL => {
            let value = request
                .data
                .first()
                .ok_or_else(|| ModbusError::invalid_request("write requires a value"))?;
            let wire = if *value != 0 { COIL_ON } else { COIL_OFF };
            frame.extend_from_slice(&request.address.to_be_bytes());
            frame.extend_from_slice(&wire.to_be_bytes());
        },
        FC_WRITE_SINGLE_REGISTER => {
            let value = request
                .data
                .first()
                .ok_or_else(|| ModbusError::invalid_request("write requires a value"))?;
            frame.extend_from_slice(&request.address.to_be_bytes());
            frame.extend_from_slice(&value.to_be_bytes());
        },
        FC_WRITE_MULTIPLE_COILS => {
            let quantity = request.quantity;
            if quantity == 0 || quantity > MAX_WRITE_COILS {
                return Err(ModbusError::invalid_request(format!(
                    "coil count {quantity} outside 1-{MAX_WRITE_COILS}"
                )));
            }
            let words_needed = usize::from(quantity).div_ceil(16);
            if request.data.len() < words_needed {
                return Err(ModbusError::invalid_request(format!(
                    "coil data holds {} words, {} coils need {}",
                    request.data.len(),
                    quantity,
                    words_needed
                )));
            }
            let byte_count = usize::from(quantity).div_ceil(8);
            frame.extend_from_slice(&request.address.to_be_bytes());
            frame.extend_from_slice(&quantity.to_be_bytes());
            frame.push(byte_count as u8);
            frame.extend_from_slice(&pack_coils(&request.data, quantity));
        },
        FC_WRITE_MULTIPLE_REGISTERS => {
            let quantity = request.quantity;
            if quantity == 0 || quantity > MAX_WRITE_REGISTERS {
                return Err(ModbusError::invalid_request(format!(
                    "register count {quantity} outside 1-{MAX_WRITE_REGISTERS}"
                )));
            }
            if request.data.len() < usize::from(quantity) {
                return Err(ModbusError::invalid_request(format!(
                    "register data holds {} values, quantity is {}",
                    request.data.len(),
                    quantity
                )));
            }
            frame.extend_from_slice(&request.address.to_be_bytes());
            frame.extend_from_slice(&quantity.to_be_bytes());
            frame.push((quantity * 2) as u8);
            for value in &request.data[..usize::from(quantity)] {
                frame.extend_from_slice(&value.to_be_bytes());
            }
        },
        other => return Err(ModbusError::InvalidFunctionCode(other)),
    }

    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());

    trace!(
        unit_id = request.unit_id,
        function = format_args!("0x{:02X}", request.function),
        frame = %hex::encode(&frame),
        "encoded request frame"
    );

    Ok(frame)
}

/// Expected total reply length, once enough header bytes are present.
///
/// `None` means the length cannot be determined yet - either more bytes are
/// needed, or the function code is unknown and the reply will never be
/// recognized (the transaction then ends by timeout).
pub fn expected_response_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    let function = buf[1];
    if function & EXCEPTION_FLAG != 0 {
        // unit, function | 0x80, exception code, CRC
        return Some(MIN_RESPONSE_LEN);
    }
    match function {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS => {
            // unit, function, byte count, payload, CRC
            if buf.len() >= 3 {
                Some(MIN_RESPONSE_LEN + usize::from(buf[2]))
            } else {
                None
            }
        },
        FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER | FC_WRITE_MULTIPLE_COILS
        | FC_WRITE_MULTIPLE_REGISTERS => Some(WRITE_RESPONSE_LEN),
        _ => None,
    }
}

/// Incrementally inspect the accumulation buffer for a complete reply.
///
/// Nothing is decided below the 5-byte minimum reply size. A frame whose
/// checksum fails is reported as [`ResponseStatus::CrcMismatch`]; whether
/// that keeps the engine waiting or fails the transaction is the state
/// machine's policy, not the decoder's.
pub fn inspect_response(buf: &[u8]) -> ResponseStatus {
    if buf.len() < MIN_RESPONSE_LEN {
        return ResponseStatus::Pending;
    }
    let Some(expected) = expected_response_len(buf) else {
        return ResponseStatus::Pending;
    };
    if buf.len() < expected {
        return ResponseStatus::Pending;
    }

    let frame = &buf[..expected];
    if frame_crc_ok(frame) {
        ResponseStatus::Complete(expected)
    } else {
        let computed = crc16(&frame[..expected - 2]);
        let received = u16::from_le_bytes([frame[expected - 2], frame[expected - 1]]);
        ResponseStatus::CrcMismatch { computed, received }
    }
}

/// Decode a complete, CRC-valid reply frame into the request's data buffer.
///
/// Exception replies and unknown function codes come back as errors; write
/// echoes need no payload decoding.
pub fn decode_response(frame: &[u8], request: &mut Request) -> ModbusResult<()> {
    let unit_id = frame[0];
    let function = frame[1];

    if unit_id != request.unit_id {
        warn!(
            expected = request.unit_id,
            received = unit_id,
            "reply unit address does not match in-flight request"
        );
    }

    if function & EXCEPTION_FLAG != 0 {
        let exception_code = frame[2];
        warn!(
            unit_id,
            function = format_args!("0x{:02X}", function & !EXCEPTION_FLAG),
            exception_code = format_args!("0x{:02X}", exception_code),
            "{}",
            exception_description(exception_code)
        );
        return Err(ModbusError::Exception(exception_code));
    }

    if function != request.function {
        warn!(
            expected = format_args!("0x{:02X}", request.function),
            received = format_args!("0x{:02X}", function),
            "reply function code does not match in-flight request"
        );
    }

    match function {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => {
            let byte_count = usize::from(frame[2]);
            let payload = read_payload(frame, byte_count);
            unpack_coils(payload, request.quantity, &mut request.data);
            trace!(
                unit_id,
                coils = request.quantity,
                byte_count,
                "decoded coil read reply"
            );
            Ok(())
        },
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
            let byte_count = usize::from(frame[2]);
            let payload = read_payload(frame, byte_count);
            request.data.clear();
            for pair in payload.chunks_exact(2) {
                request.data.push(u16::from_be_bytes([pair[0], pair[1]]));
            }
            trace!(
                unit_id,
                registers = request.data.len(),
                "decoded register read reply"
            );
            Ok(())
        },
        FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER | FC_WRITE_MULTIPLE_COILS
        | FC_WRITE_MULTIPLE_REGISTERS => Ok(()),
        other => Err(ModbusError::InvalidFunctionCode(other)),
    }
}

/// Read-reply payload, clamped to what the frame actually carries.
///
/// A CRC-valid frame always holds exactly its declared byte count; the clamp
/// only matters for callers feeding hand-built frames.
fn read_payload(frame: &[u8], byte_count: usize) -> &[u8] {
    let available = frame.len().saturating_sub(MIN_RESPONSE_LEN);
    if byte_count > available {
        warn!(
            byte_count,
            available, "reply declares more payload than the frame carries"
        );
    }
    &frame[3..3 + byte_count.min(available)]
}

/// Pack `quantity` coils from word storage into wire bytes, LSB first
fn pack_coils(words: &[u16], quantity: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; usize::from(quantity).div_ceil(8)];
    for i in 0..usize::from(quantity) {
        let bit = (words[i / 16] >> (i % 16)) & 1;
        bytes[i / 8] |= (bit as u8) << (i % 8);
    }
    bytes
}

/// Unpack wire bytes into word storage, zeroing unused high bits
fn unpack_coils(bytes: &[u8], quantity: u16, words: &mut Vec<u16>) {
    words.clear();
    words.resize(usize::from(quantity).div_ceil(16), 0);
    let limit = usize::from(quantity).min(bytes.len() * 8);
    for i in 0..limit {
        let bit = u16::from((bytes[i / 8] >> (i % 8)) & 1);
        words[i / 16] |= bit << (i % 16);
    }
}
