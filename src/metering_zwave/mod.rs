use crate::config::{ConfigBases, MeterNodeConfig};
use crate::models::DeviceProtocol;
use crate::mqtt::ha_interface::{HAPlatform, HaComponent, HaDiscover};
use crate::mqtt::{PublishData, SubscribeData, Transmission};
use crate::{get_config_or_panic, get_id, get_unix_ts, MeteringData, CONFIG};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::Sender;

pub mod meter_definitions;
pub mod node;
pub mod plausibility;
pub mod report_parser;
pub mod requests;
pub mod structs;
pub mod utils;
pub mod value_store;
pub mod version_policy;

use node::{HandledMessage, MeterNode};
use plausibility::PlausibilityViolation;
use requests::MeterRequest;
use structs::{MeterReading, QuantityType, COMMAND_CLASS_METER, EXPORTING_INDEX};
use value_store::{MemoryValueStore, SlotChange, SlotValue, ValueSlot, ValueStore};

const INPUT_TOPIC: &str = "zwave_input";
const COMMAND_TOPIC: &str = "zwave_command";
const OUTPUT_TOPIC: &str = "zwave2mqtt/zwave_output";

/// Header field of a report that can carry an invalid value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterField {
    MeterType,
    RateType,
    ElementSize,
}

impl fmt::Display for MeterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterField::MeterType => write!(f, "Meter Type"),
            MeterField::RateType => write!(f, "Rate Type"),
            MeterField::ElementSize => write!(f, "Element Size"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeterError {
    #[error("{field} value {value} is out of range")]
    MalformedField { field: MeterField, value: u8 },
    #[error("Length mismatch, expected {expected} bytes but got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("No registry entry for {quantity:?} scale {scale}")]
    UnresolvedIndex { quantity: QuantityType, scale: u16 },
    #[error("Implausible reading: {0}")]
    ImplausibleReading(#[from] PlausibilityViolation),
    #[error("{0} is not supported by this node")]
    UnsupportedOperation(&'static str),
    #[error("Frame too short, needed {needed} bytes but got {actual}")]
    FrameTooShort { needed: usize, actual: usize },
    #[error("Command class version {0} is not valid")]
    InvalidVersion(u8),
    #[error("Unknown meter command {0:#04x}")]
    UnknownCommand(u8),
    #[error("No value slot at index {0}")]
    SlotMissing(u16),
    #[error("Frame is for command class {0:#04x}")]
    UnexpectedCommandClass(u8),
    #[error("Node {0} is not configured")]
    UnknownNode(u8),
}

/// Frame received from the Z-Wave transport
#[derive(Deserialize)]
pub struct InboundFrame {
    pub node_id: u8,
    /// hex of the command class frame, starting with the class id
    pub frame: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum NodeAction {
    Reset,
    Refresh,
}

#[derive(Deserialize)]
pub struct NodeCommand {
    pub node_id: u8,
    pub command: NodeAction,
}

type ConfiguredNode = MeterNode<MeterNodeConfig, MemoryValueStore>;

pub struct MeterManager {
    sender: Sender<Transmission>,
    nodes: BTreeMap<u8, ConfiguredNode>,
    last_poll: HashMap<u8, Instant>,
    ha_enabled: bool,
}

impl MeterManager {
    pub fn new(sender: Sender<Transmission>) -> Self {
        let zwave = get_config_or_panic!("zwave", ConfigBases::ZWave);
        let mqtt = get_config_or_panic!("mqtt", ConfigBases::Mqtt);
        MeterManager::with_nodes(sender, zwave.nodes, mqtt.ha_enabled)
    }

    pub fn with_nodes(sender: Sender<Transmission>, nodes: Vec<MeterNodeConfig>, ha_enabled: bool) -> Self {
        let mut map = BTreeMap::new();
        for config in nodes {
            if map.contains_key(&config.node_id) {
                warn!("Node {} is configured twice, ignoring {}", config.node_id, config.name);
                continue;
            }
            map.insert(config.node_id, MeterNode::new(config, MemoryValueStore::new()));
        }

        MeterManager { sender, nodes: map, last_poll: HashMap::new(), ha_enabled }
    }

    pub async fn start_thread(&mut self) {
        info!("Starting Z-Wave meter thread for {} nodes", self.nodes.len());

        let (input_sender, mut input_receiver) = tokio::sync::mpsc::channel(10);
        let (command_sender, mut command_receiver) = tokio::sync::mpsc::channel(10);

        for (topic, sender) in [(INPUT_TOPIC, input_sender), (COMMAND_TOPIC, command_sender)] {
            if self.sender.send(Transmission::Subscribe(SubscribeData { topic: topic.to_string(), sender })).await.is_err() {
                error!("MQTT channel closed, can not subscribe to {topic}");
            }
        }

        let requests = self.startup_requests(Instant::now());
        self.publish_requests(&requests).await;

        let mut ticker = tokio::time::interval(Duration::from_secs(1));

        info!("Z-Wave meter thread waiting for messages");
        loop {
            tokio::select! {
                Some(payload) = input_receiver.recv() => self.handle_input(&payload).await,
                Some(payload) = command_receiver.recv() => self.handle_command(&payload).await,
                _ = ticker.tick() => {
                    let requests = self.poll_due(Instant::now());
                    self.publish_requests(&requests).await;
                }
            }
        }
    }

    pub async fn handle_input(&mut self, payload: &str) {
        let inbound: InboundFrame = match serde_json::from_str(payload) {
            Ok(i) => i,
            Err(e) => {
                error!("Z-Wave input can not be parsed: {e}");
                return;
            }
        };

        let frame = match hex::decode(&inbound.frame) {
            Ok(f) => f,
            Err(_) => {
                error!("Non hex string received from node {}", inbound.node_id);
                return;
            }
        };

        match self.process_frame(inbound.node_id, &frame) {
            Ok(transmissions) => {
                for t in transmissions {
                    if self.sender.send(t).await.is_err() {
                        error!("Node {}: MQTT channel closed, reading not published", inbound.node_id);
                    }
                }
            }
            Err(e) => error!("Node {}: Meter frame dropped: {e}", inbound.node_id),
        }
    }

    pub async fn handle_command(&mut self, payload: &str) {
        let command: NodeCommand = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                error!("Z-Wave command can not be parsed: {e}");
                return;
            }
        };

        match self.process_command(&command) {
            Ok(requests) => self.publish_requests(&requests).await,
            Err(e) => warn!("Node {}: {:?} failed: {e}", command.node_id, command.command),
        }
    }

    /// Handles a frame that starts with the command class id
    pub fn process_frame(&mut self, node_id: u8, frame: &[u8]) -> Result<Vec<Transmission>, MeterError> {
        let class_id = utils::byte_at(frame, 0)?;
        if class_id != COMMAND_CLASS_METER {
            return Err(MeterError::UnexpectedCommandClass(class_id));
        }

        let ha_enabled = self.ha_enabled;
        let node = self.nodes.get_mut(&node_id).ok_or(MeterError::UnknownNode(node_id))?;
        let handled = node.handle_msg(&frame[1..])?;

        let mut transmissions = Vec::new();

        let changes = node.store_mut().drain_changes();
        let created = changes.iter().any(|c| matches!(c, SlotChange::Created(_)));
        if created && ha_enabled {
            transmissions.push(Transmission::AutoDiscovery(discovery_document(node)));
        }

        match handled {
            HandledMessage::Report(reading) => {
                transmissions.push(Transmission::Metering(metering_document(node, &reading)));
            }
            HandledMessage::SupportedReport(capabilities) => {
                debug!("Node {node_id}: {} scales of {} supported", capabilities.resolved.len(), capabilities.quantity.to_string());
                /* Fill the new slots right away */
                match node.request_values() {
                    Ok(requests) => transmissions.extend(requests.iter().filter_map(request_transmission)),
                    Err(MeterError::UnsupportedOperation(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(transmissions)
    }

    pub fn process_command(&mut self, command: &NodeCommand) -> Result<Vec<MeterRequest>, MeterError> {
        let node = self.nodes.get(&command.node_id).ok_or(MeterError::UnknownNode(command.node_id))?;
        match command.command {
            NodeAction::Reset => Ok(vec![node.press_reset()?]),
            NodeAction::Refresh => node.request_values(),
        }
    }

    /// Static and dynamic state requests of every node, starts the poll timers
    pub fn startup_requests(&mut self, now: Instant) -> Vec<MeterRequest> {
        let mut requests = Vec::new();
        for (node_id, node) in &self.nodes {
            match node.request_state(true, true) {
                Ok(mut r) => requests.append(&mut r),
                Err(e) => error!("Node {node_id}: State request failed: {e}"),
            }
            self.last_poll.insert(*node_id, now);
        }
        requests
    }

    /// Value requests of all nodes whose poll interval elapsed
    pub fn poll_due(&mut self, now: Instant) -> Vec<MeterRequest> {
        let mut requests = Vec::new();
        for (node_id, node) in &self.nodes {
            let interval = node.info().poll_interval;
            if interval == 0 {
                continue;
            }

            let due = match self.last_poll.get(node_id) {
                Some(last) => now.duration_since(*last) >= Duration::from_secs(interval),
                None => true,
            };
            if !due {
                continue;
            }

            self.last_poll.insert(*node_id, now);
            match node.request_values() {
                Ok(mut r) => requests.append(&mut r),
                Err(MeterError::UnsupportedOperation(_)) => {}
                Err(e) => error!("Node {node_id}: Polling failed: {e}"),
            }
        }
        requests
    }

    async fn publish_requests(&self, requests: &[MeterRequest]) {
        for t in requests.iter().filter_map(request_transmission) {
            if self.sender.send(t).await.is_err() {
                error!("MQTT channel closed, request not published");
            }
        }
    }
}

fn request_transmission(request: &MeterRequest) -> Option<Transmission> {
    match serde_json::to_string(&request.to_outbound()) {
        Ok(payload) => Some(Transmission::Publish(PublishData { topic: OUTPUT_TOPIC.to_string(), payload, qos: 1, retain: false })),
        Err(e) => {
            error!("Node {}: Can not serialize request: {e}", request.node_id);
            None
        }
    }
}

/// JSON key of a slot in the published values
pub fn value_key(slot: &ValueSlot) -> String {
    let mut key = String::new();
    for c in slot.label.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            key.push(c);
        } else if !key.is_empty() && !key.ends_with('_') {
            key.push('_');
        }
    }
    let key = key.trim_end_matches('_').to_string();

    /* every unknown scale of a quantity shares the label */
    if slot.unit.is_empty() && matches!(slot.value, SlotValue::Decimal { .. }) {
        return format!("{key}_{}", slot.index);
    }
    key
}

fn metering_document(node: &ConfiguredNode, reading: &MeterReading) -> MeteringData {
    let info = node.info();
    let now = get_unix_ts();

    let mut mr = MeteringData::new();
    mr.id = get_id("zwave".to_string(), &info.name);
    mr.meter_name = info.name.clone();
    mr.protocol = DeviceProtocol::ZWave;
    mr.transmission_time = now;
    mr.metered_time = now;

    let key = match node.store().get(reading.flat_index) {
        Some(slot) => value_key(slot),
        None => reading.flat_index.to_string(),
    };

    mr.metered_values.insert(key.clone(), serde_json::Value::from(reading.value));
    if reading.delta_time > 0 {
        mr.metered_values.insert(format!("previous_{key}"), serde_json::Value::from(reading.previous_value));
        mr.metered_values.insert("delta_time".to_string(), serde_json::Value::from(reading.delta_time));
    }
    if node.store().get(EXPORTING_INDEX).is_some() {
        mr.metered_values.insert("exporting".to_string(), serde_json::Value::from(reading.exporting));
    }

    let mut protocol_map = serde_json::Map::new();
    protocol_map.insert("type".to_string(), "zwave".into());
    protocol_map.insert("node_id".to_string(), serde_json::Value::from(info.node_id));
    protocol_map.insert("version".to_string(), serde_json::Value::from(info.version));
    protocol_map.insert("index".to_string(), serde_json::Value::from(reading.flat_index));
    protocol_map.insert("rendered".to_string(), serde_json::Value::from(reading.rendered.clone()));
    protocol_map.insert("precision".to_string(), serde_json::Value::from(reading.precision));
    protocol_map.insert("rate_type".to_string(), serde_json::Value::from(reading.rate_type));
    mr.metered_values.insert("proto".to_string(), protocol_map.into());

    mr
}

/* device class, unit and state class for Home Assistant */
fn sensor_class(label: &str, unit: &str) -> (&'static str, String, &'static str) {
    let volume_class = if label.starts_with("Gas") { "gas" } else { "water" };
    match unit {
        "kWh" => ("energy", "kWh".to_string(), "total_increasing"),
        "W" => ("power", "W".to_string(), "measurement"),
        "V" => ("voltage", "V".to_string(), "measurement"),
        "A" => ("current", "A".to_string(), "measurement"),
        "PF" => ("power_factor", String::new(), "measurement"),
        "kVar" => ("reactive_power", "kvar".to_string(), "measurement"),
        "m3" => (volume_class, "m³".to_string(), "total_increasing"),
        "ft3" => (volume_class, "ft³".to_string(), "total_increasing"),
        "gal" => ("water", "gal".to_string(), "total_increasing"),
        "kVah" | "kVarh" | "Pulses" => ("", unit.to_string(), "total_increasing"),
        _ => ("", unit.to_string(), "measurement"),
    }
}

fn discovery_document(node: &ConfiguredNode) -> HaDiscover {
    let info = node.info();
    let proto = format!("{:?}", DeviceProtocol::ZWave);
    let mut disc = HaDiscover::new(info.name.clone(), DeviceProtocol::ZWave.to_string(), format!("Meter v{}", info.version), proto.clone());

    for slot in node.store().slots() {
        let key = value_key(slot);
        let component = match &slot.value {
            SlotValue::Decimal { .. } => {
                let (dclass, unit, state_class) = sensor_class(&slot.label, &slot.unit);
                HaComponent::new(HAPlatform::Sensor, info.name.clone(), dclass.to_string(), unit, proto.clone(), slot.label.clone(), key.clone(), state_class.to_string())
            }
            SlotValue::Bool(_) => HaComponent::new(HAPlatform::BinarySensor, info.name.clone(), String::new(), String::new(), proto.clone(), slot.label.clone(), key.clone(), String::new()),
            SlotValue::Trigger { .. } => {
                let press = format!(r#"{{"node_id":{},"command":"{key}"}}"#, info.node_id);
                HaComponent::new_button(info.name.clone(), proto.clone(), slot.label.clone(), format!("zwave2mqtt/{COMMAND_TOPIC}"), press)
            }
        };

        match serde_json::to_value(&component) {
            Ok(v) => {
                disc.cmps.insert(key, v);
            }
            Err(e) => error!("Can not serialize discovery of {}: {e}", slot.label),
        }
    }

    disc
}
