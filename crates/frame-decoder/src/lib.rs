//! Decoding of the inverter's hex-encoded Modbus-RTU responses into a
//! [`MeasurementRecord`].

mod aggregator;
mod field_map;

use thiserror::Error;
use tracing::warn;
use types::MeasurementRecord;

pub use aggregator::{FrameSlots, SLOT_COUNT};
pub use field_map::{
    Field, FieldSpec, FrameKind, ENERGY_FIELDS, ENERGY_FRAME_PREFIX, POWER_FIELDS,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short for {field}: need {needed} hex chars, have {available}")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("non-hex characters in {field}: {text:?}")]
    InvalidHex { field: &'static str, text: String },
}

/// Decodes the accumulated frames into a record.
///
/// Every field is extracted on its own: a field that cannot be read from its
/// frame stays absent and the rest of the record is kept. Failures are logged
/// and never returned.
pub fn decode_frames<S: AsRef<str>>(frames: &[S]) -> MeasurementRecord {
    let mut record = MeasurementRecord::default();

    for frame in frames {
        let frame = frame.as_ref();
        let kind = FrameKind::classify(frame);
        for spec in kind.fields() {
            match extract(frame, spec) {
                Ok(value) => *spec.field.slot(&mut record) = Some(value),
                Err(err) => {
                    warn!(frame_kind = ?kind, frame_len = frame.len(), error = %err, "error calculating values");
                }
            }
        }
    }

    record
}

/// Parses the hex digits at `spec`'s offsets and divides by its scale factor.
pub fn extract(frame: &str, spec: &FieldSpec) -> Result<f64, DecodeError> {
    let name = spec.field.name();
    let text = frame.get(spec.start..spec.end).ok_or(DecodeError::Truncated {
        field: name,
        needed: spec.end,
        available: frame.len(),
    })?;
    if !text.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidHex {
            field: name,
            text: text.to_string(),
        });
    }
    let raw = u32::from_str_radix(text, 16).map_err(|_| DecodeError::InvalidHex {
        field: name,
        text: text.to_string(),
    })?;

    Ok(f64::from(raw) / f64::from(spec.scale))
}
