use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Z-Wave command class id of COMMAND_CLASS_METER
pub const COMMAND_CLASS_METER: u8 = 0x32;

/* Meter command ids */
pub const METER_CMD_GET: u8 = 0x01;
pub const METER_CMD_REPORT: u8 = 0x02;
pub const METER_CMD_SUPPORTED_GET: u8 = 0x03;
pub const METER_CMD_SUPPORTED_REPORT: u8 = 0x04;
pub const METER_CMD_RESET: u8 = 0x05;

/// Scales per quantity type in the flat index space
pub const SCALES_PER_TYPE: u16 = 16;

/* Slot indices outside of the quantity range */
pub const EXPORTING_INDEX: u16 = 256;
pub const RESET_INDEX: u16 = 257;

/// Physical quantity reported by a meter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum QuantityType {
    Electric = 1,
    Gas = 2,
    Water = 3,
    Heating = 4,
    Cooling = 5,
}

impl QuantityType {
    pub const ALL: [QuantityType; 5] = [
        QuantityType::Electric,
        QuantityType::Gas,
        QuantityType::Water,
        QuantityType::Heating,
        QuantityType::Cooling,
    ];

    /// Maps the wire ordinal (1..=5), anything else is unknown
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            1 => Some(QuantityType::Electric),
            2 => Some(QuantityType::Gas),
            3 => Some(QuantityType::Water),
            4 => Some(QuantityType::Heating),
            5 => Some(QuantityType::Cooling),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    pub fn to_string(&self) -> String {
        match self {
            QuantityType::Electric => "Electric".to_string(),
            QuantityType::Gas => "Gas".to_string(),
            QuantityType::Water => "Water".to_string(),
            QuantityType::Heating => "Heating".to_string(),
            QuantityType::Cooling => "Cooling".to_string(),
        }
    }
}

/// Typed (quantity, scale) key addressing the registry and the value slots.
///
/// The flat index used on the wire and by the value store is only ever
/// computed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MeterKey {
    pub quantity: QuantityType,
    pub scale: u16,
}

impl MeterKey {
    pub fn new(quantity: QuantityType, scale: u16) -> Self {
        MeterKey { quantity, scale }
    }

    /// `(quantity - 1) * 16 + scale`
    pub fn flat_index(&self) -> u16 {
        (self.quantity.ordinal() as u16 - 1) * SCALES_PER_TYPE + self.scale
    }

    pub fn from_flat_index(index: u16) -> Option<Self> {
        let ordinal = index / SCALES_PER_TYPE + 1;
        if ordinal > u8::MAX as u16 {
            return None;
        }
        let quantity = QuantityType::from_ordinal(ordinal as u8)?;
        Some(MeterKey { quantity, scale: index % SCALES_PER_TYPE })
    }
}

impl fmt::Display for MeterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} scale {}", self.quantity.to_string(), self.scale)
    }
}

/// Label and unit of one registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuantityDescriptor {
    pub label: &'static str,
    pub unit: &'static str,
}

/// A decoded meter report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterReading {
    pub key: MeterKey,
    pub flat_index: u16,
    pub descriptor: QuantityDescriptor,
    pub value: f64,
    pub rendered: String,
    pub previous_value: f64,
    pub previous_rendered: String,
    pub delta_time: u16,
    pub precision: u8,
    pub rate_type: u8,
    pub exporting: bool,
}

/// A quantity advertised in a supported report that the registry knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedQuantity {
    pub key: MeterKey,
    pub flat_index: u16,
    pub descriptor: QuantityDescriptor,
}

/// Decoded capability advertisement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportedCapabilities {
    pub quantity: QuantityType,
    pub can_reset: bool,
    /// every advertised scale bit, resolvable or not
    pub supported_scales: BTreeSet<u16>,
    pub resolved: Vec<ResolvedQuantity>,
}
