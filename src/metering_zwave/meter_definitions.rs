use super::structs::{MeterKey, QuantityDescriptor, QuantityType, SCALES_PER_TYPE};
use lazy_static::lazy_static;
use std::collections::HashMap;

use QuantityType::{Cooling, Electric, Gas, Heating, Water};

/* Known labels, every other scale of a quantity gets an "(Unknown)" entry */
const KNOWN_SCALES: &[(QuantityType, u16, &str, &str)] = &[
    (Electric, 0, "Electric - kWh", "kWh"),
    (Electric, 1, "Electric - kVah", "kVah"),
    (Electric, 2, "Electric - W", "W"),
    (Electric, 3, "Electric - Pulses", "Pulses"),
    (Electric, 4, "Electric - V", "V"),
    (Electric, 5, "Electric - A", "A"),
    (Electric, 6, "Electric - PF", "PF"),
    (Electric, 8, "Electric - kVar", "kVar"),
    (Electric, 9, "Electric - kVarh", "kVarh"),
    (Gas, 0, "Gas - m3", "m3"),
    (Gas, 1, "Gas - ft3", "ft3"),
    (Gas, 3, "Gas - Pulses", "Pulses"),
    (Water, 0, "Water - m3", "m3"),
    (Water, 1, "Water - ft3", "ft3"),
    (Water, 2, "Water - gal", "gal"),
    (Water, 3, "Water - Pulses", "Pulses"),
    (Heating, 0, "Heating - kWh", "kWh"),
    (Cooling, 0, "Cooling - kWh", "kWh"),
];

fn unknown_label(quantity: QuantityType) -> &'static str {
    match quantity {
        Electric => "Electric (Unknown)",
        Gas => "Gas (Unknown)",
        Water => "Water (Unknown)",
        Heating => "Heating (Unknown)",
        Cooling => "Cooling (Unknown)",
    }
}

/// Read-only map from (quantity, scale) to label and unit
pub struct QuantityRegistry {
    entries: HashMap<MeterKey, QuantityDescriptor>,
}

impl QuantityRegistry {
    fn build() -> Self {
        let mut entries = HashMap::new();

        for quantity in QuantityType::ALL {
            for scale in 0..SCALES_PER_TYPE {
                entries.insert(MeterKey::new(quantity, scale), QuantityDescriptor {
                    label: unknown_label(quantity),
                    unit: "",
                });
            }
        }

        for &(quantity, scale, label, unit) in KNOWN_SCALES {
            entries.insert(MeterKey::new(quantity, scale), QuantityDescriptor { label, unit });
        }

        QuantityRegistry { entries }
    }

    pub fn lookup(&self, key: &MeterKey) -> Option<QuantityDescriptor> {
        self.entries.get(key).copied()
    }

    /// Exclusive upper bound of the flat index space
    pub fn max(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

lazy_static! {
    pub static ref REGISTRY: QuantityRegistry = QuantityRegistry::build();
}

pub fn get_descriptor(key: &MeterKey) -> Option<QuantityDescriptor> {
    REGISTRY.lookup(key)
}
