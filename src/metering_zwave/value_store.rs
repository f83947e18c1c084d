use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SlotValue {
    Decimal { value: String, precision: u8 },
    Bool(bool),
    Trigger { pressed: bool },
}

/// One value of a node, addressed by its flat index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueSlot {
    pub index: u16,
    pub label: String,
    pub unit: String,
    pub value: SlotValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotChange {
    Created(ValueSlot),
    Refreshed(ValueSlot),
}

/// Storage of the per node values. The codec only ever references a slot
/// by index for the duration of one call.
pub trait ValueStore {
    /// Creating an existing slot keeps the current slot
    fn create_decimal(&mut self, index: u16, label: &str, unit: &str, initial: &str);
    fn create_bool(&mut self, index: u16, label: &str, unit: &str, initial: bool);
    fn create_trigger(&mut self, index: u16, label: &str);

    fn get(&self, index: u16) -> Option<&ValueSlot>;

    /// Returns false when there is no slot of a matching kind at `index`
    fn refresh_decimal(&mut self, index: u16, value: &str, precision: u8) -> bool;
    fn refresh_bool(&mut self, index: u16, value: bool) -> bool;
}

/// In process store that records every change until it gets drained
#[derive(Debug, Default)]
pub struct MemoryValueStore {
    slots: BTreeMap<u16, ValueSlot>,
    changes: Vec<SlotChange>,
}

impl MemoryValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> impl Iterator<Item = &ValueSlot> {
        self.slots.values()
    }

    pub fn drain_changes(&mut self) -> Vec<SlotChange> {
        std::mem::take(&mut self.changes)
    }

    fn create(&mut self, slot: ValueSlot) {
        if self.slots.contains_key(&slot.index) {
            return;
        }
        self.changes.push(SlotChange::Created(slot.clone()));
        self.slots.insert(slot.index, slot);
    }
}

impl ValueStore for MemoryValueStore {
    fn create_decimal(&mut self, index: u16, label: &str, unit: &str, initial: &str) {
        self.create(ValueSlot {
            index,
            label: label.to_string(),
            unit: unit.to_string(),
            value: SlotValue::Decimal { value: initial.to_string(), precision: 0 },
        });
    }

    fn create_bool(&mut self, index: u16, label: &str, unit: &str, initial: bool) {
        self.create(ValueSlot {
            index,
            label: label.to_string(),
            unit: unit.to_string(),
            value: SlotValue::Bool(initial),
        });
    }

    fn create_trigger(&mut self, index: u16, label: &str) {
        self.create(ValueSlot {
            index,
            label: label.to_string(),
            unit: String::new(),
            value: SlotValue::Trigger { pressed: false },
        });
    }

    fn get(&self, index: u16) -> Option<&ValueSlot> {
        self.slots.get(&index)
    }

    fn refresh_decimal(&mut self, index: u16, value: &str, precision: u8) -> bool {
        match self.slots.get_mut(&index) {
            Some(slot) if matches!(slot.value, SlotValue::Decimal { .. }) => {
                slot.value = SlotValue::Decimal { value: value.to_string(), precision };
                self.changes.push(SlotChange::Refreshed(slot.clone()));
                true
            }
            _ => false,
        }
    }

    fn refresh_bool(&mut self, index: u16, value: bool) -> bool {
        match self.slots.get_mut(&index) {
            Some(slot) if matches!(slot.value, SlotValue::Bool(_)) => {
                slot.value = SlotValue::Bool(value);
                self.changes.push(SlotChange::Refreshed(slot.clone()));
                true
            }
            _ => false,
        }
    }
}
