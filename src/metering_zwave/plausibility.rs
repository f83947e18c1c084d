use super::structs::{MeterKey, MeterReading, QuantityType};
use log::{debug, warn};
use thiserror::Error;

/* Lower bound for kWh readings, anything below is a set MSB on a broken device */
const MIN_KWH_VALUE: f64 = -1_000_000.0;
/* Allowed kWh change per second of delta time, 36 kWh per hour */
const MAX_KWH_CHANGE_PER_SECOND: f64 = 0.01;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlausibilityViolation {
    #[error("kWh value {value:.2} is ridiculously negative")]
    NegativeValue { value: f64 },
    #[error("kWh previous value {previous:.2} is ridiculously negative")]
    NegativePrevious { previous: f64 },
    #[error("kWh value changed by {change:.2} in {delta_time}s, allowed are {allowed:.2}")]
    ExcessiveChange { change: f64, allowed: f64, delta_time: u16 },
}

/// Checks a cumulative electric energy reading, other quantities always pass
pub fn check_values(key: &MeterKey, value: f64, previous: f64, delta_time: u16) -> Result<(), PlausibilityViolation> {
    if *key != MeterKey::new(QuantityType::Electric, 0) {
        return Ok(());
    }

    if value < MIN_KWH_VALUE {
        warn!("kWh meter value is ridiculous negative. value:{value:.2} valuePrev:{previous:.2} deltaTime:{delta_time}");
        return Err(PlausibilityViolation::NegativeValue { value });
    }

    if previous < MIN_KWH_VALUE {
        warn!("kWh meter value has ridiculous negative previous. value:{value:.2} valuePrev:{previous:.2} deltaTime:{delta_time}");
        return Err(PlausibilityViolation::NegativePrevious { previous });
    }

    let allowed = delta_time as f64 * MAX_KWH_CHANGE_PER_SECOND;
    let change = (value - previous).abs();
    if change > allowed {
        warn!("kWh meter value has changed too much. value:{value:.2} valuePrev:{previous:.2} deltaTime:{delta_time}");
        return Err(PlausibilityViolation::ExcessiveChange { change, allowed, delta_time });
    }

    debug!("kWh meter value ok. value:{value:.2} valuePrev:{previous:.2} deltaTime:{delta_time}");
    Ok(())
}

pub fn check_reading(reading: &MeterReading) -> Result<(), PlausibilityViolation> {
    check_values(&reading.key, reading.value, reading.previous_value, reading.delta_time)
}
