use super::meter_definitions::get_descriptor;
use super::structs::*;
use super::utils::{byte_at, get_report_value};
use super::version_policy::VersionPolicy;
use super::{MeterError, MeterField};
use log::{debug, warn};

/* The value field starts after command id, type byte and size byte */
const VALUE_OFFSET: usize = 3;
/* Bytes of the frame in front of `data` that the transport counts, the class id */
const CLASS_HEADER_LEN: usize = 1;

const CAN_RESET_MASK: u8 = 0x80;
const SUPPORTED_TYPE_MASK: u8 = 0x1F;

/// Decodes a METER_REPORT.
///
/// `data` starts with the command id, the command class byte in front of it
/// is already stripped but counts for the length check. Any violation
/// rejects the whole report, there is no partial reading.
pub fn parse_report(data: &[u8], policy: VersionPolicy) -> Result<MeterReading, MeterError> {
    /* header */
    let quantity = policy.quantity_type(data)?;
    let rate_type = policy.rate_type(data)?;
    let element_size = policy.element_size(data)?;
    let scale = policy.scale(data)?;
    let precision = policy.precision(data)?;

    /* a frame shorter than the report without previous value is truncated */
    let length = data.len() + CLASS_HEADER_LEN;
    let minimum = policy.expected_length(element_size, scale.primary, 0);
    if length < minimum {
        warn!("Meter report truncated, {length} of at least {minimum} bytes");
        return Err(MeterError::LengthMismatch { expected: minimum, actual: length });
    }

    let delta_time = policy.delta_time(data, element_size)?;
    policy.validate_length(element_size, scale.primary, delta_time, length)?;

    /* numeric fields */
    let (value, rendered) = get_report_value(&data[VALUE_OFFSET..], element_size, precision)?;

    let (previous_value, previous_rendered) = if delta_time > 0 {
        let offset = VALUE_OFFSET + 2 + element_size as usize;
        get_report_value(data.get(offset..).unwrap_or_default(), element_size, precision)?
    } else {
        (value, rendered.clone())
    };

    let key = MeterKey::new(quantity, scale.resolved);
    let descriptor = match get_descriptor(&key) {
        Some(d) => d,
        None => {
            warn!("Meter index is out of range/not valid - {key}");
            return Err(MeterError::UnresolvedIndex { quantity, scale: scale.resolved });
        }
    };

    debug!("Decoded report {} ({}) precision {precision} delta {delta_time}s: {rendered}", descriptor.label, key.flat_index());

    Ok(MeterReading {
        key,
        flat_index: key.flat_index(),
        descriptor,
        value,
        rendered,
        previous_value,
        previous_rendered,
        delta_time,
        precision,
        rate_type,
        exporting: policy.is_exporting(rate_type),
    })
}

/// Decodes a METER_SUPPORTED_REPORT, `data` starts with the command id.
///
/// Advertised scales without a registry entry are skipped with a warning.
pub fn parse_supported_report(data: &[u8], policy: VersionPolicy) -> Result<SupportedCapabilities, MeterError> {
    let flags = byte_at(data, 1)?;
    let can_reset = flags & CAN_RESET_MASK != 0;
    let ordinal = flags & SUPPORTED_TYPE_MASK;

    let quantity = match QuantityType::from_ordinal(ordinal) {
        Some(q) => q,
        None => {
            warn!("meterType Value was greater than range. Dropping Message");
            return Err(MeterError::MalformedField { field: MeterField::MeterType, value: ordinal });
        }
    };

    let supported_scales = policy.supported_scales(data)?;

    let mut resolved = Vec::new();
    for scale in &supported_scales {
        let key = MeterKey::new(quantity, *scale);
        match get_descriptor(&key) {
            Some(descriptor) => resolved.push(ResolvedQuantity { key, flat_index: key.flat_index(), descriptor }),
            None => warn!("MeterType {} and Unit {scale} is unknown", quantity.to_string()),
        }
    }

    Ok(SupportedCapabilities { quantity, can_reset, supported_scales, resolved })
}
