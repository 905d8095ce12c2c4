//! Decoder for the environmental sensing frame broadcast by ATC MiThermometer
//! firmware.
//!
//! The frame is carried as service data under the Environmental Sensing
//! service (0x181A) and is exactly 15 bytes long:
//!
//! | Offset | Size | Content                                   |
//! |--------|------|-------------------------------------------|
//! | 0..6   | 6    | sensor MAC (not interpreted)              |
//! | 6..8   | 2    | temperature, signed LE, 0.01 °C           |
//! | 8..10  | 2    | relative humidity, unsigned LE, 0.01 %    |
//! | 10..12 | 2    | battery voltage, unsigned LE, 1 mV        |
//! | 12     | 1    | battery level in percent                  |
//! | 13     | 1    | rolling measurement counter               |
//! | 14     | 1    | flags (not interpreted)                   |

use thiserror::Error;

/// Length of a valid frame.
pub const FRAME_LENGTH: usize = 15;

/// Name reported for devices that do not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "unknown";

/// Errors returned when a service data payload cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected a frame of 15 bytes, got {0}")]
    BadFrameLength(usize),
}

/// A single reading decoded from one advertisement.
///
/// Units:
/// - Temperature in Celsius
/// - Humidity in percent (0-100)
/// - Battery voltage in Volts
/// - Battery level in percent, as reported by the device
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Device address, as carried by the advertisement
    pub address: String,
    /// Advertised local name, or [`UNKNOWN_DEVICE_NAME`]
    pub name: String,
    pub temperature: f64,
    pub humidity: f64,
    pub battery_voltage: f64,
    pub battery_percent: u8,
    /// Device-local counter, wraps at 255
    pub counter: u8,
}

#[inline]
fn le_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn le_i16(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Decode a service data payload into a [`Measurement`].
///
/// # Arguments
/// * `data` - The service data bytes (without the UUID)
/// * `name` - The advertised local name, may be empty
/// * `address` - The advertised device address, copied verbatim
///
/// # Errors
/// Returns [`DecodeError::BadFrameLength`] unless `data` is exactly
/// [`FRAME_LENGTH`] bytes long.
pub fn decode(data: &[u8], name: &str, address: &str) -> Result<Measurement, DecodeError> {
    if data.len() != FRAME_LENGTH {
        return Err(DecodeError::BadFrameLength(data.len()));
    }

    let name = if name.is_empty() {
        UNKNOWN_DEVICE_NAME
    } else {
        name
    };

    Ok(Measurement {
        address: address.to_string(),
        name: name.to_string(),
        temperature: f64::from(le_i16(data, 6)) / 100.0,
        humidity: f64::from(le_u16(data, 8)) / 100.0,
        battery_voltage: f64::from(le_u16(data, 10)) / 1000.0,
        battery_percent: data[12],
        counter: data[13],
    })
}
