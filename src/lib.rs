//! # Bioflux Modbus - Non-Blocking Modbus RTU Master Engine
//!
//! A cooperative, single-threaded Modbus RTU master transaction engine for
//! control loops that cannot afford to block on serial I/O. Built for
//! process-control firmware hosts that poll many bus peripherals (drives,
//! sensor heads, valve islands) from one periodic loop.
//!
//! ## Features
//!
//! - **Non-Blocking**: one `manage()` tick per loop pass; no threads, no
//!   async runtime, no I/O waits. The only sleeps are the short, bounded
//!   RTU bus-timing delays the wire requires.
//! - **Fixed-Capacity Request Store**: requests are served in round-robin
//!   rotation so no peripheral starves another.
//! - **Callback Completion**: each request carries a `FnOnce` callback that
//!   fires exactly once with the transfer outcome and data.
//! - **Transport Abstraction**: bring any byte port via [`SerialTransport`];
//!   a [`MockSerial`] is included for tests.
//! - **Built-in Monitoring**: per-engine [`MasterStats`] counters and
//!   structured `tracing` instrumentation.
//!
//! ## Supported Function Codes
//!
//! | Code | Function |
//! |------|----------|
//! | 0x01 | Read Coils |
//! | 0x02 | Read Discrete Inputs |
//! | 0x03 | Read Holding Registers |
//! | 0x04 | Read Input Registers |
//! | 0x05 | Write Single Coil |
//! | 0x06 | Write Single Register |
//! | 0x0F | Write Multiple Coils |
//! | 0x10 | Write Multiple Registers |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bioflux_modbus::{MockSerial, RtuMaster, SerialConfig};
//!
//! let mut master = RtuMaster::new(MockSerial::new(), SerialConfig::default());
//!
//! master.read_holding_registers(5, 100, 2, 42, Box::new(|outcome| {
//!     if outcome.success {
//!         println!("tag {}: {:?}", outcome.tag, outcome.data);
//!     }
//! })).unwrap();
//!
//! loop {
//!     master.manage();
//!     // ... rest of the control loop ...
//! #   break;
//! }
//! ```

pub mod codec;
pub mod constants;
pub mod crc;
pub mod error;
pub mod frame;
pub mod master;
pub mod queue;
pub mod timing;
pub mod transport;

pub use codec::{decode_response, encode_request, inspect_response, ResponseStatus};
pub use crc::{crc16, frame_crc_ok};
pub use error::{ModbusError, ModbusResult};
pub use frame::FrameBuffer;
pub use master::{CrcPolicy, MasterConfig, MasterState, OverflowPolicy, RtuMaster};
pub use queue::{Callback, Request, RequestQueue, TransferOutcome};
pub use timing::{BusTiming, Parity, SerialConfig};
pub use transport::{MasterStats, MockSerial, SerialTransport};
