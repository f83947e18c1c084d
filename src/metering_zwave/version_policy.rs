use super::structs::{QuantityType, COMMAND_CLASS_METER, METER_CMD_GET};
use super::utils::byte_at;
use super::{MeterError, MeterField};
use std::collections::BTreeSet;

/* Byte 1 of a report */
const METER_TYPE_MASK: u8 = 0x1F;
const RATE_TYPE_MASK: u8 = 0x60;
const RATE_TYPE_SHIFT: u8 = 5;
const SCALE_HIGH_BIT_MASK: u8 = 0x80;
const SCALE_HIGH_BIT_SHIFT: u8 = 5;

/* Byte 2 of a report */
const SIZE_MASK: u8 = 0x07;
const SCALE_MASK: u8 = 0x18;
const SCALE_SHIFT: u8 = 3;
const PRECISION_MASK: u8 = 0xE0;
const PRECISION_SHIFT: u8 = 5;

/// Rate type value marking an export (produced energy) reading
pub const RATE_TYPE_EXPORT: u8 = 0x02;

/// Scale 1 value announcing that the real scale lives in the Scale 2 byte
pub const SCALE_2_MARKER: u8 = 0x07;

/* Highest scale a get request can carry in the Scale 1 bits */
const MAX_SCALE_1: u16 = 7;

/// Scale as carried in the header and the scale the reading resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFields {
    /// Scale 1 from the header bits, 0..=7
    pub primary: u8,
    /// Scale used for the registry, Scale 2 + 8 when the extension is in use
    pub resolved: u16,
}

/// Wire format revision of the Meter command class.
///
/// Every byte layout difference between the versions is answered here,
/// versions above 5 use the version 5 layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VersionPolicy {
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
    V5 = 5,
}

impl VersionPolicy {
    pub fn from_version(version: u8) -> Result<Self, MeterError> {
        match version {
            0 => Err(MeterError::InvalidVersion(version)),
            1 => Ok(VersionPolicy::V1),
            2 => Ok(VersionPolicy::V2),
            3 => Ok(VersionPolicy::V3),
            4 => Ok(VersionPolicy::V4),
            _ => Ok(VersionPolicy::V5),
        }
    }

    pub fn version(&self) -> u8 {
        *self as u8
    }

    pub fn quantity_type(&self, data: &[u8]) -> Result<QuantityType, MeterError> {
        let ordinal = byte_at(data, 1)? & METER_TYPE_MASK;

        let highest = match self {
            VersionPolicy::V1 | VersionPolicy::V2 | VersionPolicy::V3 => QuantityType::Water,
            _ => QuantityType::Cooling,
        };

        match QuantityType::from_ordinal(ordinal) {
            Some(quantity) if quantity <= highest => Ok(quantity),
            _ => Err(MeterError::MalformedField { field: MeterField::MeterType, value: ordinal }),
        }
    }

    pub fn rate_type(&self, data: &[u8]) -> Result<u8, MeterError> {
        if *self == VersionPolicy::V1 {
            return Ok(0);
        }

        let rate_type = (byte_at(data, 1)? & RATE_TYPE_MASK) >> RATE_TYPE_SHIFT;
        match self {
            VersionPolicy::V2 | VersionPolicy::V3 if rate_type >= 0x04 => {
                Err(MeterError::MalformedField { field: MeterField::RateType, value: rate_type })
            }
            _ => Ok(rate_type),
        }
    }

    pub fn is_exporting(&self, rate_type: u8) -> bool {
        *self > VersionPolicy::V1 && rate_type == RATE_TYPE_EXPORT
    }

    pub fn element_size(&self, data: &[u8]) -> Result<u8, MeterError> {
        let size = byte_at(data, 2)? & SIZE_MASK;
        match size {
            1 | 2 | 4 => Ok(size),
            _ => Err(MeterError::MalformedField { field: MeterField::ElementSize, value: size }),
        }
    }

    pub fn scale(&self, data: &[u8]) -> Result<ScaleFields, MeterError> {
        let mut primary = (byte_at(data, 2)? & SCALE_MASK) >> SCALE_SHIFT;

        if *self >= VersionPolicy::V3 {
            primary |= (byte_at(data, 1)? & SCALE_HIGH_BIT_MASK) >> SCALE_HIGH_BIT_SHIFT;
        }

        let mut resolved = primary as u16;
        if *self >= VersionPolicy::V4 && primary == SCALE_2_MARKER {
            /* Scale 2 is the last byte of the report */
            let scale_2 = byte_at(data, data.len().saturating_sub(1))?;
            resolved = scale_2 as u16 + 8;
        }

        Ok(ScaleFields { primary, resolved })
    }

    pub fn precision(&self, data: &[u8]) -> Result<u8, MeterError> {
        Ok((byte_at(data, 2)? & PRECISION_MASK) >> PRECISION_SHIFT)
    }

    pub fn delta_time(&self, data: &[u8], element_size: u8) -> Result<u16, MeterError> {
        if *self == VersionPolicy::V1 {
            return Ok(0);
        }

        let offset = 3 + element_size as usize;
        let high = byte_at(data, offset)? as u16;
        let low = byte_at(data, offset + 1)? as u16;
        Ok(high << 8 | low)
    }

    /// Frame length a report must have, counted like the transport does
    /// (command class byte included)
    pub fn expected_length(&self, element_size: u8, primary_scale: u8, delta_time: u16) -> usize {
        let element_size = element_size as usize;
        let mut expected = 4 + element_size;

        if *self >= VersionPolicy::V2 {
            expected += 2;
            if delta_time > 0 {
                /* previous value */
                expected += element_size;
            }
        }

        if *self >= VersionPolicy::V5 && primary_scale == SCALE_2_MARKER {
            expected += 1;
        }

        expected
    }

    pub fn validate_length(&self, element_size: u8, primary_scale: u8, delta_time: u16, length: usize) -> Result<(), MeterError> {
        let expected = self.expected_length(element_size, primary_scale, delta_time);
        if expected != length {
            return Err(MeterError::LengthMismatch { expected, actual: length });
        }
        Ok(())
    }

    /// Scales set in the bitmap of a supported report
    pub fn supported_scales(&self, data: &[u8]) -> Result<BTreeSet<u16>, MeterError> {
        let mut scales = BTreeSet::new();

        let bitmap = match self {
            /* Version 1 has no supported report, the scale comes with every report */
            VersionPolicy::V1 => return Ok(scales),
            VersionPolicy::V2 => byte_at(data, 2)? & 0x0F,
            VersionPolicy::V3 => byte_at(data, 2)?,
            _ => byte_at(data, 2)? & 0x7F,
        };
        push_bits(&mut scales, bitmap, 0);

        if *self >= VersionPolicy::V4 && byte_at(data, 2)? & 0x80 != 0 {
            let count = byte_at(data, 3)? as usize;
            for extension in 1..=count {
                let bitmap = byte_at(data, 3 + extension)?;
                push_bits(&mut scales, bitmap, 8 * extension as u16);
            }
        }

        Ok(scales)
    }

    pub fn supports_supported_get(&self) -> bool {
        *self > VersionPolicy::V1
    }

    /// Length byte, class, command and scale bytes of a get request
    pub fn get_payload(&self, scale: u16) -> Vec<u8> {
        match self {
            VersionPolicy::V1 => vec![2, COMMAND_CLASS_METER, METER_CMD_GET],
            VersionPolicy::V2 => vec![3, COMMAND_CLASS_METER, METER_CMD_GET, ((scale as u8) & 0x03) << 3],
            VersionPolicy::V3 => vec![3, COMMAND_CLASS_METER, METER_CMD_GET, ((scale as u8) & 0x07) << 3],
            _ if scale > MAX_SCALE_1 => {
                vec![4, COMMAND_CLASS_METER, METER_CMD_GET, SCALE_2_MARKER << 3, (scale - 8) as u8]
            }
            _ => vec![3, COMMAND_CLASS_METER, METER_CMD_GET, ((scale as u8) & 0x07) << 3],
        }
    }
}

fn push_bits(scales: &mut BTreeSet<u16>, bitmap: u8, offset: u16) {
    for bit in 0..8 {
        if bitmap & (1 << bit) != 0 {
            scales.insert(offset + bit);
        }
    }
}
