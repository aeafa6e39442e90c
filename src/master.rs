//! RTU master transaction state machine
//!
//! One [`RtuMaster`] instance owns one physical bus. The caller's control
//! loop drives it with repeated, non-blocking [`RtuMaster::manage`] ticks;
//! the engine never spawns threads or blocks on I/O. The only deliberate
//! waits are the short, bounded bus-timing delays (inter-frame silence and
//! the transceiver guard interval), which are hardware requirements rather
//! than I/O waits.
//!
//! At most one transaction is in flight at a time, so the state machine
//! itself serializes access to the serial transport; no lock is needed.
//! Pending requests are served in round-robin rotation with no priorities.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::codec::{decode_response, encode_request, inspect_response, ResponseStatus};
use crate::constants::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_RESPONSE_TIMEOUT_MS, FC_READ_COILS, FC_READ_DISCRETE_INPUTS,
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_COILS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER, MAX_READ_COILS,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS, UNIT_ID_MAX, UNIT_ID_MIN,
};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::FrameBuffer;
use crate::queue::{Callback, Request, RequestQueue};
use crate::timing::{BusTiming, SerialConfig};
use crate::transport::{MasterStats, SerialTransport};

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    /// No transaction in flight; the next tick may start one
    Idle,
    /// A request frame is on the wire; accumulating the reply
    WaitingForReply,
    /// A complete reply is being interpreted; folds back to Idle within
    /// the same tick. Kept distinct so the instant is visible to
    /// instrumentation and extension.
    ProcessingReply,
}

/// What to do when a held frame fails CRC validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CrcPolicy {
    /// Keep accumulating bytes; the transaction resolves by timeout if no
    /// valid frame ever forms. No re-synchronization is attempted.
    #[default]
    Wait,
    /// Fail the transaction immediately
    Error,
}

/// What to do with receive bytes beyond the accumulation buffer capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Silently drop the excess bytes (counted in stats)
    #[default]
    Discard,
    /// Fail the transaction immediately
    Error,
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Response timeout in milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Request store capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// CRC mismatch handling
    #[serde(default)]
    pub crc_policy: CrcPolicy,
    /// Receive overflow handling
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            crc_policy: CrcPolicy::default(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Non-blocking Modbus RTU master transaction engine
pub struct RtuMaster<T: SerialTransport> {
    transport: T,
    serial: SerialConfig,
    timing: BusTiming,
    response_timeout: Duration,
    crc_policy: CrcPolicy,
    overflow_policy: OverflowPolicy,
    queue: RequestQueue,
    state: MasterState,
    /// Reply accumulation buffer for the in-flight transaction
    rx: FrameBuffer,
    /// Slot index of the in-flight request, if any
    in_flight: Option<usize>,
    /// Last bus activity; drives both timeout detection and inter-frame silence
    last_activity: Instant,
    stats: MasterStats,
}

impl<T: SerialTransport> RtuMaster<T> {
    /// Create an engine with default configuration
    pub fn new(transport: T, serial: SerialConfig) -> Self {
        Self::with_config(transport, serial, MasterConfig::default())
    }

    /// Create an engine with explicit configuration
    pub fn with_config(transport: T, serial: SerialConfig, config: MasterConfig) -> Self {
        Self {
            transport,
            serial,
            timing: BusTiming::from_config(&serial),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            crc_policy: config.crc_policy,
            overflow_policy: config.overflow_policy,
            queue: RequestQueue::new(config.queue_capacity),
            state: MasterState::Idle,
            rx: FrameBuffer::new(),
            in_flight: None,
            last_activity: Instant::now(),
            stats: MasterStats::default(),
        }
    }

    /// Current engine state
    #[inline]
    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Transfer statistics since construction
    #[inline]
    pub fn stats(&self) -> MasterStats {
        self.stats
    }

    /// Number of queued requests, including the in-flight one
    #[inline]
    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// Current serial framing
    #[inline]
    pub fn serial_config(&self) -> SerialConfig {
        self.serial
    }

    /// Borrow the underlying transport
    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport (port reconfiguration is the
    /// transport owner's concern, not the engine's)
    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Override the response timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    /// Override serial framing at runtime; bus timing is re-derived
    pub fn set_serial_config(&mut self, serial: SerialConfig) {
        self.serial = serial;
        self.timing = BusTiming::from_config(&serial);
        debug!(
            baud_rate = serial.baud_rate,
            inter_frame_us = self.timing.inter_frame_delay().as_micros() as u64,
            "serial framing updated"
        );
    }

    /// Drop every queued request and abandon the in-flight transaction.
    ///
    /// This is the only cancellation mechanism, and it is total: an
    /// abandoned in-flight request's callback is never invoked. Every other
    /// completion path fires the callback exactly once.
    pub fn clear(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.in_flight = None;
        self.rx.clear();
        self.state = MasterState::Idle;
        if dropped > 0 {
            debug!(dropped, "request store cleared");
        }
    }

    /// Queue a generic request.
    ///
    /// When the store is full the request is handed back unchanged, so the
    /// caller keeps its buffer and callback and may retry later. A queued
    /// request whose frame later fails to encode stays in the store and is
    /// skipped over by the rotation; remove it with [`RtuMaster::clear`].
    pub fn enqueue(&mut self, request: Request) -> Result<(), Request> {
        let unit_id = request.unit_id;
        let function = request.function;
        match self.queue.push(request) {
            Ok(_) => {
                trace!(
                    unit_id,
                    function = format_args!("0x{function:02X}"),
                    pending = self.queue.len(),
                    "request queued"
                );
                Ok(())
            },
            Err(rejected) => {
                warn!(unit_id, "request store full; request rejected");
                Err(rejected)
            },
        }
    }

    // ===== Typed convenience wrappers (FC01-FC16) =====

    /// Read coils (FC01). Results arrive packed 16 per word.
    pub fn read_coils(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
        tag: u32,
        callback: Callback,
    ) -> ModbusResult<()> {
        self.enqueue_read(FC_READ_COILS, unit_id, address, quantity, MAX_READ_COILS, tag, callback)
    }

    /// Read discrete inputs (FC02). Results arrive packed 16 per word.
    pub fn read_discrete_inputs(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
        tag: u32,
        callback: Callback,
    ) -> ModbusResult<()> {
        self.enqueue_read(
            FC_READ_DISCRETE_INPUTS,
            unit_id,
            address,
            quantity,
            MAX_READ_COILS,
            tag,
            callback,
        )
    }

    /// Read holding registers (FC03)
    pub fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
        tag: u32,
        callback: Callback,
    ) -> ModbusResult<()> {
        self.enqueue_read(
            FC_READ_HOLDING_REGISTERS,
            unit_id,
            address,
            quantity,
            MAX_READ_REGISTERS,
            tag,
            callback,
        )
    }

    /// Read input registers (FC04)
    pub fn read_input_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        quantity: u16,
        tag: u32,
        callback: Callback,
    ) -> ModbusResult<()> {
        self.enqueue_read(
            FC_READ_INPUT_REGISTERS,
            unit_id,
            address,
            quantity,
            MAX_READ_REGISTERS,
            tag,
            callback,
        )
    }

    /// Write a single coil (FC05)
    pub fn write_single_coil(
        &mut self,
        unit_id: u8,
        address: u16,
        value: bool,
        tag: u32,
        callback: Callback,
    ) -> ModbusResult<()> {
        validate_unit_id(unit_id)?;
        let data = vec![u16::from(value)];
        self.enqueue_checked(Request::new(
            unit_id,
            FC_WRITE_SINGLE_COIL,
            address,
            1,
            data,
            tag,
            callback,
        ))
    }

    /// Write a single holding register (FC06)
    pub fn write_single_register(
        &mut self,
        unit_id: u8,
        address: u16,
        value: u16,
        tag: u32,
        callback: Callback,
    ) -> ModbusResult<()> {
        validate_unit_id(unit_id)?;
        self.enqueue_checked(Request::new(
            unit_id,
            FC_WRITE_SINGLE_REGISTER,
            address,
            1,
            vec![value],
            tag,
            callback,
        ))
    }

    /// Write multiple coils (FC15)
    pub fn write_multiple_coils(
        &mut self,
        unit_id: u8,
        address: u16,
        values: &[bool],
        tag: u32,
        callback: Callback,
    ) -> ModbusResult<()> {
        validate_unit_id(unit_id)?;
        let quantity = values.len();
        if quantity == 0 || quantity > usize::from(MAX_WRITE_COILS) {
            return Err(ModbusError::invalid_request(format!(
                "coil count {quantity} outside 1-{MAX_WRITE_COILS}"
            )));
        }
        // Pack into word storage: coil i -> word i/16, bit i%16
        let mut data = vec![0u16; quantity.div_ceil(16)];
        for (i, &on) in values.iter().enumerate() {
            if on {
                data[i / 16] |= 1 << (i % 16);
            }
        }
        self.enqueue_checked(Request::new(
            unit_id,
            FC_WRITE_MULTIPLE_COILS,
            address,
            quantity as u16,
            data,
            tag,
            callback,
        ))
    }

    /// Write multiple holding registers (FC16)
    pub fn write_multiple_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        values: &[u16],
        tag: u32,
        callback: Callback,
    ) -> ModbusResult<()> {
        validate_unit_id(unit_id)?;
        let quantity = values.len();
        if quantity == 0 || quantity > usize::from(MAX_WRITE_REGISTERS) {
            return Err(ModbusError::invalid_request(format!(
                "register count {quantity} outside 1-{MAX_WRITE_REGISTERS}"
            )));
        }
        self.enqueue_checked(Request::new(
            unit_id,
            FC_WRITE_MULTIPLE_REGISTERS,
            address,
            quantity as u16,
            values.to_vec(),
            tag,
            callback,
        ))
    }

    fn enqueue_read(
        &mut self,
        function: u8,
        unit_id: u8,
        address: u16,
        quantity: u16,
        max_quantity: u16,
        tag: u32,
        callback: Callback,
    ) -> ModbusResult<()> {
        validate_unit_id(unit_id)?;
        if quantity == 0 || quantity > max_quantity {
            return Err(ModbusError::invalid_request(format!(
                "quantity {quantity} outside 1-{max_quantity} for FC{function:02X}"
            )));
        }
        self.enqueue_checked(Request::new(
            unit_id,
            function,
            address,
            quantity,
            Vec::new(),
            tag,
            callback,
        ))
    }

    fn enqueue_checked(&mut self, request: Request) -> ModbusResult<()> {
        self.enqueue(request).map_err(|_| ModbusError::QueueFull)
    }

    // ===== Tick =====

    /// The non-blocking engine tick.
    ///
    /// Call this periodically from the control loop. Each tick either starts
    /// the next queued transaction, advances reply accumulation, or detects
    /// a timeout. Completion callbacks fire synchronously from here, exactly
    /// once per consumed request; they must not re-enter the engine.
    pub fn manage(&mut self) {
        match self.state {
            MasterState::Idle => self.start_next_transaction(),
            MasterState::WaitingForReply => self.poll_reply(),
            // Transient; an interpreted reply folds straight back to Idle
            MasterState::ProcessingReply => self.state = MasterState::Idle,
        }
    }

    fn start_next_transaction(&mut self) {
        let Some(index) = self.queue.next() else {
            return;
        };
        let Some(request) = self.queue.get(index) else {
            return;
        };

        let frame = match encode_request(request) {
            Ok(frame) => frame,
            Err(err) => {
                // Nothing was transmitted; the request stays queued and the
                // rotation moves on to the next one
                self.stats.encode_failures += 1;
                warn!(
                    unit_id = request.unit_id,
                    function = format_args!("0x{:02X}", request.function),
                    %err,
                    "request frame could not be encoded"
                );
                return;
            },
        };

        self.rx.clear();
        self.transport.set_tx_enable(true);
        self.pause_for_inter_frame_silence();

        let write_result = self
            .transport
            .write(&frame)
            .and_then(|()| self.transport.flush());
        if let Err(err) = write_result {
            // Degrade to the timeout path; the transaction still completes
            warn!(%err, "transport write failed; reply will time out");
        }

        // Hold the direction line until the last stop bit is out
        thread::sleep(self.timing.guard_interval());
        self.transport.set_tx_enable(false);

        self.last_activity = Instant::now();
        self.in_flight = Some(index);
        self.state = MasterState::WaitingForReply;
        self.stats.requests_sent += 1;

        debug!(
            unit_id = frame[0],
            function = format_args!("0x{:02X}", frame[1]),
            frame = %hex::encode(&frame),
            "request transmitted"
        );
    }

    fn poll_reply(&mut self) {
        // Defensive: some transceivers glitch the direction line on noise
        self.transport.set_tx_enable(false);

        self.drain_receive_bytes();
        if self.state != MasterState::WaitingForReply {
            // Overflow policy already completed the transaction
            return;
        }

        match inspect_response(self.rx.as_slice()) {
            ResponseStatus::Complete(len) => {
                self.state = MasterState::ProcessingReply;
                self.finish_transaction(len);
            },
            ResponseStatus::CrcMismatch { computed, received } => match self.crc_policy {
                CrcPolicy::Wait => {
                    // Held pending more bytes; resolves by timeout if no
                    // valid frame ever forms
                    trace!(
                        computed = format_args!("0x{computed:04X}"),
                        received = format_args!("0x{received:04X}"),
                        "frame failed CRC; waiting for more bytes"
                    );
                    self.check_timeout();
                },
                CrcPolicy::Error => {
                    self.stats.crc_errors += 1;
                    warn!(
                        computed = format_args!("0x{computed:04X}"),
                        received = format_args!("0x{received:04X}"),
                        "frame failed CRC; failing transaction"
                    );
                    self.complete_in_flight(false);
                },
            },
            ResponseStatus::Pending => self.check_timeout(),
        }
    }

    fn drain_receive_bytes(&mut self) {
        while self.transport.bytes_available() > 0 {
            let Some(byte) = self.transport.read_byte() else {
                break;
            };
            if self.rx.push(byte).is_err() {
                match self.overflow_policy {
                    OverflowPolicy::Discard => {
                        self.stats.overflow_bytes_dropped += 1;
                        trace!("accumulation buffer full; byte discarded");
                    },
                    OverflowPolicy::Error => {
                        warn!("accumulation buffer overflow; failing transaction");
                        self.complete_in_flight(false);
                        return;
                    },
                }
            }
        }
    }

    fn finish_transaction(&mut self, len: usize) {
        let Some(index) = self.in_flight else {
            self.state = MasterState::Idle;
            return;
        };
        let Some(request) = self.queue.get_mut(index) else {
            self.in_flight = None;
            self.state = MasterState::Idle;
            return;
        };

        let frame = &self.rx.as_slice()[..len];
        let success = match decode_response(frame, request) {
            Ok(()) => {
                self.stats.responses_received += 1;
                true
            },
            Err(ModbusError::Exception(_)) => {
                self.stats.exceptions += 1;
                false
            },
            Err(err) => {
                warn!(%err, "reply could not be decoded");
                false
            },
        };

        self.complete_in_flight(success);
    }

    fn complete_in_flight(&mut self, success: bool) {
        if let Some(index) = self.in_flight.take() {
            if let Some(request) = self.queue.take(index) {
                debug!(
                    unit_id = request.unit_id,
                    tag = request.tag,
                    success,
                    queued_ms = request.queued_at.elapsed().as_millis() as u64,
                    pending = self.queue.len(),
                    "transaction complete"
                );
                request.complete(success);
            }
        }
        // Inter-frame silence for the next send is measured from here
        self.last_activity = Instant::now();
        self.rx.clear();
        self.state = MasterState::Idle;
    }

    fn check_timeout(&mut self) {
        if self.last_activity.elapsed() > self.response_timeout {
            self.stats.timeouts += 1;
            warn!(
                timeout_ms = self.response_timeout.as_millis() as u64,
                accumulated = self.rx.len(),
                "response timeout"
            );
            self.complete_in_flight(false);
        }
    }

    fn pause_for_inter_frame_silence(&mut self) {
        let elapsed = self.last_activity.elapsed();
        let required = self.timing.inter_frame_delay();
        if elapsed < required {
            thread::sleep(required - elapsed);
        }
    }
}

fn validate_unit_id(unit_id: u8) -> ModbusResult<()> {
    if !(UNIT_ID_MIN..=UNIT_ID_MAX).contains(&unit_id) {
        return Err(ModbusError::invalid_request(format!(
            "unit id {unit_id} outside {UNIT_ID_MIN}-{UNIT_ID_MAX}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::MockSerial;

    fn quiet_master() -> RtuMaster<MockSerial> {
        // High baud keeps the bounded timing sleeps negligible in tests
        let serial = SerialConfig {
            baud_rate: 115_200,
            ..SerialConfig::default()
        };
        RtuMaster::new(MockSerial::new(), serial)
    }

    #[test]
    fn test_idle_tick_is_noop() {
        let mut master = quiet_master();
        master.manage();
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(master.pending_requests(), 0);
        assert!(master.transport().written().is_empty());
    }

    #[test]
    fn test_wrapper_validation() {
        let mut master = quiet_master();
        let err = master
            .read_holding_registers(0, 0, 1, 0, Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidRequest(_)));

        let err = master
            .read_holding_registers(1, 0, 126, 0, Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidRequest(_)));

        let err = master
            .write_multiple_registers(1, 0, &[], 0, Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidRequest(_)));

        assert_eq!(master.pending_requests(), 0);
    }

    #[test]
    fn test_enqueue_hands_request_back_when_full() {
        let serial = SerialConfig {
            baud_rate: 115_200,
            ..SerialConfig::default()
        };
        let config = MasterConfig {
            queue_capacity: 1,
            ..MasterConfig::default()
        };
        let mut master = RtuMaster::with_config(MockSerial::new(), serial, config);

        master
            .read_holding_registers(1, 0, 1, 1, Box::new(|_| {}))
            .unwrap();
        let rejected = master.enqueue(Request::new(
            2,
            FC_READ_HOLDING_REGISTERS,
            0,
            1,
            Vec::new(),
            2,
            Box::new(|_| {}),
        ));
        let request = rejected.unwrap_err();
        assert_eq!(request.unit_id, 2);
        assert_eq!(master.pending_requests(), 1);
    }

    #[test]
    fn test_transmit_asserts_and_releases_direction_line() {
        let mut master = quiet_master();
        master
            .read_holding_registers(5, 100, 2, 42, Box::new(|_| {}))
            .unwrap();
        master.manage();

        assert_eq!(master.state(), MasterState::WaitingForReply);
        let mock = master.transport();
        assert!(!mock.tx_enabled());
        assert_eq!(mock.tx_enable_transitions(), &[true, false]);
        assert_eq!(mock.flush_count(), 1);
        assert_eq!(
            mock.written(),
            &[0x05, 0x03, 0x00, 0x64, 0x00, 0x02, 0x84, 0x50]
        );
    }

    #[test]
    fn test_encode_failure_leaves_request_queued() {
        let mut master = quiet_master();
        master
            .enqueue(Request::new(
                1,
                0x2B, // no RTU encoding
                0,
                1,
                Vec::new(),
                7,
                Box::new(|_| panic!("callback must not fire")),
            ))
            .map_err(|_| ())
            .unwrap();

        master.manage();
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(master.pending_requests(), 1);
        assert_eq!(master.stats().encode_failures, 1);
        assert!(master.transport().written().is_empty());
    }

    #[test]
    fn test_encode_failure_does_not_starve_other_requests() {
        let mut master = quiet_master();
        master
            .read_holding_registers(3, 0, 1, 9, Box::new(|_| {}))
            .unwrap();
        master
            .enqueue(Request::new(1, 0x2B, 0, 1, Vec::new(), 0, Box::new(|_| {})))
            .map_err(|_| ())
            .unwrap();

        // The rotation lands on the unencodable request first, then the good one
        master.manage();
        assert_eq!(master.stats().encode_failures, 1);
        master.manage();
        assert_eq!(master.state(), MasterState::WaitingForReply);
        assert_eq!(master.transport().written()[0], 0x03);
    }

    #[test]
    fn test_clear_while_in_flight_abandons_without_callback() {
        let mut master = quiet_master();
        master
            .read_holding_registers(5, 0, 1, 1, Box::new(|_| panic!("abandoned callback fired")))
            .unwrap();
        master.manage();
        assert_eq!(master.state(), MasterState::WaitingForReply);

        master.clear();
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(master.pending_requests(), 0);

        // A late reply for the abandoned request is ignored harmlessly
        let reply = [0x05, 0x03, 0x02, 0x00, 0x01];
        master.transport_mut().queue_rx(&reply);
        master.manage();
        assert_eq!(master.pending_requests(), 0);
    }

    #[test]
    fn test_config_json_defaults() {
        let config: MasterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MasterConfig::default());

        let config: MasterConfig =
            serde_json::from_str(r#"{"response_timeout_ms": 250, "crc_policy": "error"}"#)
                .unwrap();
        assert_eq!(config.response_timeout_ms, 250);
        assert_eq!(config.crc_policy, CrcPolicy::Error);
        assert_eq!(config.overflow_policy, OverflowPolicy::Discard);
    }
}
