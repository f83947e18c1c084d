//! Z-Wave meter bridge
//!
//! This library decodes the Z-Wave Meter command class of configured nodes
//! and exports the readings to MQTT, including Home Assistant discovery.

pub mod config;
pub mod models;
pub mod mqtt;
pub mod metering_zwave;

// Re-export common types for easier access
pub use models::DeviceProtocol;
pub use mqtt::{CALLBACKS, MeteringData};
pub use config::CONFIG;
pub use metering_zwave::{MeterError, MeterManager};

pub fn get_unix_ts() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

pub fn get_id(protocol: String, meter_name: &String) -> String {
    return format!("{}-{}-{:?}", protocol, meter_name, get_unix_ts());
}
