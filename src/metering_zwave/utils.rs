use super::MeterError;
use log::debug;

/// Bounds checked byte access, a short frame is an error and never a panic
pub fn byte_at(data: &[u8], index: usize) -> Result<u8, MeterError> {
    data.get(index).copied().ok_or(MeterError::FrameTooShort { needed: index + 1, actual: data.len() })
}

/// Reads a big endian value of `element_size` bytes and scales it by `precision`.
///
/// The raw value is accumulated in 32 bits. One and two byte values get sign
/// extended when their MSB is set, four byte values do not get an extension
/// step, their MSB already lands in the sign bit of the accumulator.
pub fn get_report_value(data: &[u8], element_size: u8, precision: u8) -> Result<(f64, String), MeterError> {
    let size = element_size as usize;
    if data.len() < size {
        return Err(MeterError::FrameTooShort { needed: size, actual: data.len() });
    }

    let mut raw: u32 = 0;
    for byte in &data[..size] {
        raw = (raw << 8) | *byte as u32;
    }

    if size > 0 && data[0] & 0x80 != 0 {
        match element_size {
            1 => raw |= 0xFFFF_FF00,
            2 => raw |= 0xFFFF_0000,
            _ => {}
        }
    }

    let value = raw as i32 as f64 / 10f64.powi(precision as i32);
    let rendered = render_value(value, precision);
    debug!("Decoded {size} byte value {raw:#010x} with precision {precision} as {rendered}");

    Ok((value, rendered))
}

/// Renders with exactly `precision` digits after the decimal point
pub fn render_value(value: f64, precision: u8) -> String {
    format!("{:.*}", precision as usize, value)
}
