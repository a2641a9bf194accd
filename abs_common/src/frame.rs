//! Telemetry and status frame codec.
//!
//! Wire formats:
//!
//! | Frame     | Length | Layout                                               |
//! |-----------|--------|------------------------------------------------------|
//! | Telemetry | 8      | `[dist_hi, dist_lo, counter, status, r, r, r, crc]`  |
//! | Status    | 2      | `[active (0/1), percent (0-100)]`                    |
//!
//! The integrity check is CRC-8 (polynomial 0x07, MSB-first, initial
//! value 0) computed over bytes 0..6 and carried in byte 7. Distance is
//! big-endian millimetres; bytes 4..6 are reserved.

use thiserror::Error;

/// Payload length of a telemetry frame.
pub const TELEMETRY_FRAME_LEN: usize = 8;

/// Payload length of a status frame.
pub const STATUS_FRAME_LEN: usize = 2;

/// Error types for frame decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The check byte does not match the CRC computed over bytes 0..6.
    #[error("integrity check failed: received 0x{received:02X}, computed 0x{computed:02X}")]
    IntegrityMismatch {
        /// Check byte carried in the frame.
        received: u8,
        /// Check byte computed from the payload.
        computed: u8,
    },
}

/// Sensor health reported in telemetry byte 3.
///
/// Any nonzero raw value inhibits braking regardless of the distance
/// reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStatus {
    /// Reading is valid.
    Ok,
    /// Sensor reported a measurement timeout.
    Timeout,
    /// Reading was outside the sensor's measurable range.
    OutOfRange,
    /// Any other nonzero status code.
    Fault(u8),
}

impl SensorStatus {
    /// Map the raw status byte to the taxonomy.
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Ok,
            1 => Self::Timeout,
            2 => Self::OutOfRange,
            other => Self::Fault(other),
        }
    }

    /// Whether the reading may be acted upon.
    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// A decoded distance reading.
///
/// Immutable once decoded; consumed by exactly one control iteration and
/// then discarded — no history is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryFrame {
    /// Measured distance in millimetres.
    pub distance_mm: u16,
    /// Sender's rolling sequence counter (wraps at 255).
    pub counter: u8,
    /// Sensor health for this reading.
    pub status: SensorStatus,
}

/// CRC-8, polynomial 0x07, MSB-first, initial value 0.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Decode and validate an 8-byte telemetry payload.
///
/// # Errors
///
/// Returns [`FrameError::IntegrityMismatch`] carrying both check values
/// when byte 7 disagrees with the CRC over bytes 0..6.
pub fn decode_telemetry(bytes: &[u8; TELEMETRY_FRAME_LEN]) -> Result<TelemetryFrame, FrameError> {
    let computed = crc8(&bytes[..7]);
    if computed != bytes[7] {
        return Err(FrameError::IntegrityMismatch {
            received: bytes[7],
            computed,
        });
    }

    Ok(TelemetryFrame {
        distance_mm: u16::from_be_bytes([bytes[0], bytes[1]]),
        counter: bytes[2],
        status: SensorStatus::from_raw(bytes[3]),
    })
}

/// Encode a 2-byte status frame. `percent` is clamped to 100.
pub fn encode_status(active: bool, percent: u8) -> [u8; STATUS_FRAME_LEN] {
    [u8::from(active), percent.min(100)]
}

// ─── Tests ──────────────────────────────────────────────────────────
