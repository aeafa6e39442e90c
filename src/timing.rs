//! Serial framing configuration and bus timing controller
//!
//! Modbus RTU delimits frames with silence: at least 3.5 character times must
//! separate consecutive frames on the wire. Above 19200 baud the specification
//! fixes the interval at 1750 microseconds instead of scaling it further down.
//! The controller also provides the short guard interval a half-duplex
//! transceiver needs before its direction line is released after transmit.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parity setting for the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line framing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate in bits per second
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits per character (typically 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity bit setting
    #[serde(default)]
    pub parity: Parity,
    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
        }
    }
}

impl SerialConfig {
    /// Bits on the wire per character: start bit + data + parity + stop
    pub fn bits_per_char(&self) -> u32 {
        let parity_bits = match self.parity {
            Parity::None => 0,
            Parity::Even | Parity::Odd => 1,
        };
        1 + u32::from(self.data_bits) + parity_bits + u32::from(self.stop_bits)
    }

    /// One character time in microseconds at the configured framing
    pub fn char_time_us(&self) -> u64 {
        let baud = self.baud_rate.max(1);
        u64::from(self.bits_per_char()) * 1_000_000 / u64::from(baud)
    }

    /// Duration of one character at the configured framing
    pub fn char_time(&self) -> Duration {
        Duration::from_micros(self.char_time_us())
    }
}

/// Bus timing derived from the serial framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTiming {
    inter_frame_delay: Duration,
    guard_interval: Duration,
}

/// Fixed inter-frame silence above 19200 baud, per the Modbus specification
const HIGH_BAUD_INTER_FRAME: Duration = Duration::from_micros(1750);

impl BusTiming {
    /// Derive bus timing from serial framing
    pub fn from_config(config: &SerialConfig) -> Self {
        let char_us = config.char_time_us();
        let inter_frame_delay = if config.baud_rate > 19200 {
            HIGH_BAUD_INTER_FRAME
        } else {
            Duration::from_micros(char_us * 7 / 2)
        };

        Self {
            inter_frame_delay,
            // One character time covers transceiver turnaround after the
            // final stop bit has left the shift register
            guard_interval: Duration::from_micros(char_us),
        }
    }

    /// Minimum silence between frames (3.5 character times, floored at
    /// 1750 microseconds above 19200 baud)
    #[inline]
    pub fn inter_frame_delay(&self) -> Duration {
        self.inter_frame_delay
    }

    /// Hold time before releasing the transmit-enable line
    #[inline]
    pub fn guard_interval(&self) -> Duration {
        self.guard_interval
    }
}

impl Default for BusTiming {
    fn default() -> Self {
        Self::from_config(&SerialConfig::default())
    }
}
