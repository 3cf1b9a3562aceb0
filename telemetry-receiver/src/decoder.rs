//! Frame payload decoding
//!
//! Every transport carries the same 8-byte ASCII payload: bytes 0-3 hold the
//! speed in meters per second as a decimal float, bytes 4-7 hold the RPM as a
//! decimal integer. Only the framing around the payload differs per transport.

use crate::types::{FrameError, Sample, PAYLOAD_LEN};

const SPEED_FIELD: std::ops::Range<usize> = 0..4;
const RPM_FIELD: std::ops::Range<usize> = 4..8;

/// Frame decoder - turns a signal payload into a [`Sample`]
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decode an 8-byte payload into a sample
    ///
    /// # Returns
    /// * `Ok(Sample)` with `speed_kmh = speed_raw_ms * 3.6`
    /// * `Err(FrameError)` if the payload has the wrong length or either field
    ///   is not a number
    pub fn decode(payload: &[u8]) -> Result<Sample, FrameError> {
        if payload.len() != PAYLOAD_LEN {
            return Err(FrameError::InvalidLength {
                expected: PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        let speed_text = latin1_field(&payload[SPEED_FIELD]);
        let rpm_text = latin1_field(&payload[RPM_FIELD]);

        let speed_raw = Self::parse_speed(&speed_text)?;
        let rpm = Self::parse_rpm(&rpm_text)?;

        Ok(Sample::new(speed_raw, rpm))
    }

    fn parse_speed(field: &str) -> Result<f64, FrameError> {
        match field.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(FrameError::InvalidSpeed(field.to_string())),
        }
    }

    fn parse_rpm(field: &str) -> Result<i32, FrameError> {
        field
            .trim()
            .parse::<i32>()
            .map_err(|_| FrameError::InvalidRpm(field.to_string()))
    }
}

/// Interpret bytes as Latin-1: every byte maps to the code point of equal value.
fn latin1_field(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
