//! Fixed offsets of each reading inside the hex text of a response frame.
//!
//! Offsets count hex characters from the start of the frame, header included,
//! and are half-open. They were measured against the device and are not
//! derivable from the register layout alone.

use types::MeasurementRecord;

/// Hex prefix of the response to the energy request (slave 1, function 3, 0x3a data bytes).
pub const ENERGY_FRAME_PREFIX: &str = "01033";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Energy,
    Power,
}

impl FrameKind {
    pub fn classify(frame: &str) -> Self {
        if frame.starts_with(ENERGY_FRAME_PREFIX) {
            FrameKind::Energy
        } else {
            FrameKind::Power
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            FrameKind::Energy => ENERGY_FIELDS,
            FrameKind::Power => POWER_FIELDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    SolarInput,
    InverterPower,
    PeakPower,
    ActivePower,
    L1Voltage,
    L1Current,
    Temperature,
    EToday,
    ETotal,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::SolarInput => "Solar_Input",
            Field::InverterPower => "Inverter_Power",
            Field::PeakPower => "Peak_Power",
            Field::ActivePower => "Active_Power",
            Field::L1Voltage => "L1_Voltage",
            Field::L1Current => "L1_Current",
            Field::Temperature => "Temperature",
            Field::EToday => "E_Today",
            Field::ETotal => "E_Total",
        }
    }

    pub(crate) fn slot(self, record: &mut MeasurementRecord) -> &mut Option<f64> {
        match self {
            Field::SolarInput => &mut record.solar_input,
            Field::InverterPower => &mut record.inverter_power,
            Field::PeakPower => &mut record.peak_power,
            Field::ActivePower => &mut record.active_power,
            Field::L1Voltage => &mut record.l1_voltage,
            Field::L1Current => &mut record.l1_current,
            Field::Temperature => &mut record.temperature,
            Field::EToday => &mut record.e_today,
            Field::ETotal => &mut record.e_total,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    pub start: usize,
    pub end: usize,
    pub scale: u32,
}

const fn spec(field: Field, start: usize, end: usize, scale: u32) -> FieldSpec {
    FieldSpec {
        field,
        start,
        end,
        scale,
    }
}

pub const ENERGY_FIELDS: &[FieldSpec] = &[
    spec(Field::EToday, 34, 38, 1000),
    spec(Field::ETotal, 10, 14, 1000),
    spec(Field::PeakPower, 114, 118, 10_000),
    spec(Field::ActivePower, 98, 102, 10),
];

pub const POWER_FIELDS: &[FieldSpec] = &[
    spec(Field::SolarInput, 78, 82, 10),
    spec(Field::InverterPower, 18, 22, 10_000),
    spec(Field::L1Voltage, 6, 10, 10),
    spec(Field::L1Current, 10, 14, 100),
    spec(Field::Temperature, 116, 118, 1),
];
