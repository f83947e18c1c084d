use super::meter_definitions::REGISTRY;
use super::plausibility::check_reading;
use super::report_parser::{parse_report, parse_supported_report};
use super::requests::{build_get, build_reset, build_supported_get, MeterRequest};
use super::structs::*;
use super::utils::byte_at;
use super::value_store::{SlotValue, ValueStore};
use super::version_policy::VersionPolicy;
use super::MeterError;
use log::{info, warn};

/// What the controller knows about a node, the negotiated command class
/// version and whether the node answers a proactive get
pub trait NodeInfo {
    fn node_id(&self) -> u8;
    fn name(&self) -> String;
    fn negotiated_version(&self) -> u8;
    fn supports_proactive_get(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandledMessage {
    Report(MeterReading),
    SupportedReport(SupportedCapabilities),
}

/// Meter command class of one node
pub struct MeterNode<N: NodeInfo, S: ValueStore> {
    info: N,
    store: S,
}

impl<N: NodeInfo, S: ValueStore> MeterNode<N, S> {
    pub fn new(info: N, store: S) -> Self {
        MeterNode { info, store }
    }

    pub fn info(&self) -> &N {
        &self.info
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn policy(&self) -> Result<VersionPolicy, MeterError> {
        let version = self.info.negotiated_version();
        VersionPolicy::from_version(version).inspect_err(|_| {
            warn!("Node {}: Not a valid version ({version})", self.info.node_id());
        })
    }

    /// Requests for the static (capabilities) and dynamic (values) state
    pub fn request_state(&self, request_static: bool, request_dynamic: bool) -> Result<Vec<MeterRequest>, MeterError> {
        let policy = self.policy()?;
        let mut requests = Vec::new();

        if request_static && policy.supports_supported_get() {
            requests.push(build_supported_get(self.info.node_id(), policy)?);
        }

        if request_dynamic {
            match self.request_values() {
                Ok(mut r) => requests.append(&mut r),
                Err(MeterError::UnsupportedOperation(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(requests)
    }

    /// One get request per existing value slot
    pub fn request_values(&self) -> Result<Vec<MeterRequest>, MeterError> {
        if !self.info.supports_proactive_get() {
            info!("Node {}: MeterCmd_Get Not Supported on this node", self.info.node_id());
            return Err(MeterError::UnsupportedOperation("MeterCmd_Get"));
        }

        let policy = self.policy()?;
        let requests = (0..REGISTRY.max())
            .filter(|index| self.store.get(*index).is_some())
            .filter_map(MeterKey::from_flat_index)
            .map(|key| build_get(self.info.node_id(), policy, &key))
            .collect();

        Ok(requests)
    }

    /// `data` starts with the command id
    pub fn handle_msg(&mut self, data: &[u8]) -> Result<HandledMessage, MeterError> {
        match byte_at(data, 0)? {
            METER_CMD_REPORT => self.handle_report(data).map(HandledMessage::Report),
            METER_CMD_SUPPORTED_REPORT => self.handle_supported_report(data).map(HandledMessage::SupportedReport),
            command => Err(MeterError::UnknownCommand(command)),
        }
    }

    pub fn handle_supported_report(&mut self, data: &[u8]) -> Result<SupportedCapabilities, MeterError> {
        let policy = self.policy()?;
        let capabilities = parse_supported_report(data, policy)?;
        let node_id = self.info.node_id();

        for quantity in &capabilities.resolved {
            info!(
                "Node {node_id}: Creating MeterType {} with Unit {} at Index {}",
                quantity.descriptor.label, quantity.descriptor.unit, quantity.flat_index
            );
            self.store.create_decimal(quantity.flat_index, quantity.descriptor.label, quantity.descriptor.unit, "0.0");
        }

        self.store.create_bool(EXPORTING_INDEX, "Exporting", "", false);

        if capabilities.can_reset {
            self.store.create_trigger(RESET_INDEX, "Reset");
        }

        Ok(capabilities)
    }

    pub fn handle_report(&mut self, data: &[u8]) -> Result<MeterReading, MeterError> {
        let policy = self.policy()?;
        let node_id = self.info.node_id();

        let reading = parse_report(data, policy).inspect_err(|e| {
            warn!("Node {node_id}: Dropping meter report: {e}");
        })?;
        check_reading(&reading)?;

        let index = reading.flat_index;
        info!(
            "Node {node_id}: Received Meter Report for {} with Units {} on Index {index}: {}",
            reading.descriptor.label, reading.descriptor.unit, reading.rendered
        );

        if self.store.get(index).is_none() {
            if policy != VersionPolicy::V1 {
                warn!("Node {node_id}: Can't Find a value for {} - Index {index}", reading.descriptor.label);
                return Err(MeterError::SlotMissing(index));
            }
            info!("Node {node_id}: Creating Version 1 MeterType {} at Index {index}", reading.descriptor.label);
            self.store.create_decimal(index, reading.descriptor.label, reading.descriptor.unit, "0.0");
        }

        self.store.refresh_decimal(index, &reading.rendered, reading.precision);

        if policy > VersionPolicy::V1 {
            self.store.refresh_bool(EXPORTING_INDEX, reading.exporting);
        }

        Ok(reading)
    }

    /// Reset request for a pressed reset trigger
    pub fn press_reset(&self) -> Result<MeterRequest, MeterError> {
        match self.store.get(RESET_INDEX) {
            Some(slot) if matches!(slot.value, SlotValue::Trigger { .. }) => Ok(build_reset(self.info.node_id())),
            _ => Err(MeterError::UnsupportedOperation("MeterCmd_Reset")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_zwave::plausibility::PlausibilityViolation;
    use crate::metering_zwave::requests::RequestKind;
    use crate::metering_zwave::value_store::{MemoryValueStore, SlotChange};

    struct TestNode {
        version: u8,
        supports_get: bool,
    }

    impl NodeInfo for TestNode {
        fn node_id(&self) -> u8 {
            7
        }
        fn name(&self) -> String {
            "test".to_string()
        }
        fn negotiated_version(&self) -> u8 {
            self.version
        }
        fn supports_proactive_get(&self) -> bool {
            self.supports_get
        }
    }

    fn node(version: u8) -> MeterNode<TestNode, MemoryValueStore> {
        MeterNode::new(TestNode { version, supports_get: true }, MemoryValueStore::new())
    }

    #[test]
    fn test_supported_report_creates_slots() {
        let mut node = node(3);
        let caps = node.handle_supported_report(&[0x04, 0x81, 0x05]).unwrap();
        assert!(caps.can_reset);

        let store = node.store();
        assert_eq!(store.get(0).unwrap().label, "Electric - kWh");
        assert_eq!(store.get(2).unwrap().label, "Electric - W");
        assert!(store.get(1).is_none());
        assert_eq!(store.get(EXPORTING_INDEX).unwrap().value, SlotValue::Bool(false));
        assert_eq!(store.get(RESET_INDEX).unwrap().value, SlotValue::Trigger { pressed: false });
        assert_eq!(store.slots().count(), 4);
    }

    #[test]
    fn test_supported_report_without_reset() {
        let mut node = node(2);
        node.handle_supported_report(&[0x04, 0x03, 0x01]).unwrap();
        assert!(node.store().get(32).is_some());
        assert!(node.store().get(EXPORTING_INDEX).is_some());
        assert!(node.store().get(RESET_INDEX).is_none());
        assert_eq!(node.press_reset(), Err(MeterError::UnsupportedOperation("MeterCmd_Reset")));
    }

    #[test]
    fn test_report_refreshes_slot_and_exporting() {
        let mut node = node(2);
        node.handle_supported_report(&[0x04, 0x01, 0x04]).unwrap();
        node.store_mut().drain_changes();

        /* W, export, 2 bytes, precision 1 */
        let reading = node.handle_report(&[0x02, 0x41, 0x32, 0x01, 0x2C, 0x00, 0x00]).unwrap();
        assert_eq!(reading.rendered, "30.0");

        let store = node.store();
        assert_eq!(store.get(2).unwrap().value, SlotValue::Decimal { value: "30.0".to_string(), precision: 1 });
        assert_eq!(store.get(EXPORTING_INDEX).unwrap().value, SlotValue::Bool(true));
    }

    #[test]
    fn test_report_without_slot_is_rejected() {
        let mut node = node(3);
        let result = node.handle_report(&[0x02, 0x01, 0x01, 0x05, 0x00, 0x00]);
        assert_eq!(result, Err(MeterError::SlotMissing(0)));
        assert!(node.store_mut().drain_changes().is_empty());
    }

    #[test]
    fn test_version_1_creates_slot_on_the_fly() {
        let mut node = node(1);
        let reading = node.handle_report(&[0x02, 0x02, 0x09, 0x2A]).unwrap();
        assert_eq!(reading.flat_index, 17);

        let changes = node.store_mut().drain_changes();
        assert_eq!(changes.len(), 2);
        assert!(matches!(&changes[0], SlotChange::Created(slot) if slot.label == "Gas - ft3"));
        assert!(matches!(&changes[1], SlotChange::Refreshed(slot) if slot.value == SlotValue::Decimal { value: "42".to_string(), precision: 0 }));
        assert!(node.store().get(EXPORTING_INDEX).is_none());
    }

    #[test]
    fn test_implausible_reading_is_dropped() {
        let mut node = node(2);
        node.handle_supported_report(&[0x04, 0x01, 0x01]).unwrap();
        node.store_mut().drain_changes();

        /* kWh jumps from 9.00 to 1000.00 in one second */
        let result = node.handle_report(&[0x02, 0x01, 0x44, 0x00, 0x01, 0x86, 0xA0, 0x00, 0x01, 0x00, 0x00, 0x03, 0x84]);
        assert!(matches!(result, Err(MeterError::ImplausibleReading(PlausibilityViolation::ExcessiveChange { .. }))));
        assert!(node.store_mut().drain_changes().is_empty());
        assert_eq!(node.store().get(0).unwrap().value, SlotValue::Decimal { value: "0.0".to_string(), precision: 0 });
    }

    #[test]
    fn test_handle_msg_dispatch() {
        let mut node = node(3);
        assert!(matches!(node.handle_msg(&[0x04, 0x01, 0x01]), Ok(HandledMessage::SupportedReport(_))));
        assert!(matches!(node.handle_msg(&[0x02, 0x01, 0x01, 0x05, 0x00, 0x00]), Ok(HandledMessage::Report(_))));
        assert_eq!(node.handle_msg(&[0x07, 0x00]), Err(MeterError::UnknownCommand(0x07)));
        assert!(matches!(node.handle_msg(&[]), Err(MeterError::FrameTooShort { .. })));
    }

    #[test]
    fn test_invalid_version() {
        let mut node = node(0);
        assert_eq!(node.handle_msg(&[0x04, 0x01, 0x01]), Err(MeterError::InvalidVersion(0)));
    }

    #[test]
    fn test_request_values() {
        let mut node = node(4);
        node.handle_supported_report(&[0x04, 0x01, 0x85, 0x01, 0x02]).unwrap();

        let requests = node.request_values().unwrap();
        let payloads: Vec<Vec<u8>> = requests.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(payloads, vec![
            vec![0x03, 0x32, 0x01, 0x00],
            vec![0x03, 0x32, 0x01, 0x10],
            vec![0x04, 0x32, 0x01, 0x38, 0x01],
        ]);
        assert!(requests.iter().all(|r| r.kind == RequestKind::Get && r.node_id == 7));
    }

    #[test]
    fn test_request_values_without_get_support() {
        let node = MeterNode::new(TestNode { version: 3, supports_get: false }, MemoryValueStore::new());
        assert_eq!(node.request_values(), Err(MeterError::UnsupportedOperation("MeterCmd_Get")));

        let requests = node.request_state(true, true).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, RequestKind::SupportedGet);
    }

    #[test]
    fn test_request_state_version_1() {
        let mut node = node(1);
        assert!(node.request_state(true, true).unwrap().is_empty());

        node.handle_report(&[0x02, 0x01, 0x01, 0x05]).unwrap();
        let requests = node.request_state(true, true).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload, vec![0x02, 0x32, 0x01]);
    }

    #[test]
    fn test_press_reset() {
        let mut node = node(2);
        node.handle_supported_report(&[0x04, 0x81, 0x01]).unwrap();
        let request = node.press_reset().unwrap();
        assert_eq!(request.kind, RequestKind::Reset);
        assert_eq!(request.payload, vec![0x02, 0x32, 0x05]);
    }
}
