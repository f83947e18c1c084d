pub mod ha_interface;

use std::collections::HashMap;
use lazy_static::lazy_static;
use tokio::sync::RwLock;
use crate::mqtt::ha_interface::HaDiscover;
use crate::{config::ConfigBases, models::DeviceProtocol};
use crate::{get_config_or_panic, CONFIG};
use log::{debug, error, info};
use tokio::sync::mpsc::{error::TrySendError, Receiver, Sender};
use serde::{Serialize, Deserialize};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};

const TOPIC_PREFIX: &str = "zwave2mqtt";

#[derive(Clone)]
pub struct AppStatus {
    pub start_time: Instant,
}

impl AppStatus {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MeteringData {
    pub id: String,
    pub meter_name: String,
    pub protocol: DeviceProtocol,
    pub transmission_time: u64,
    pub metered_time: u64,
    pub metered_values: serde_json::Map<String, serde_json::Value>
}

impl MeteringData {
    pub fn new() -> Self {
        MeteringData {
            id: "".to_string(),
            meter_name: "".to_string(),
            protocol: DeviceProtocol::Unknown,
            transmission_time: 0,
            metered_time: 0,
            metered_values: serde_json::Map::new()
        }
    }

    /// Topic carrying the values of one device
    pub fn device_topic(&self) -> String {
        format!("{TOPIC_PREFIX}/devs/{:?}/{}", self.protocol, self.meter_name)
    }
}

pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub struct SubscribeData {
    pub topic: String,
    pub sender: tokio::sync::mpsc::Sender<String>
}

pub enum Transmission {
    Metering(MeteringData),
    AutoDiscovery(HaDiscover),
    Subscribe(SubscribeData),
    Publish(PublishData)
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    exit_thread: bool,
    client: AsyncClient,
}

pub struct Callbacks {
    calls: HashMap<String, Vec<tokio::sync::mpsc::Sender<String>>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Callbacks { calls: HashMap::new() }
    }

    pub fn insert(&mut self, topic: String, callback: tokio::sync::mpsc::Sender<String>) {
        debug!("Adding callback to topic {topic}");
        self.calls.entry(topic).or_default().push(callback);
    }

    /// Hands the payload to every subscriber of `topic` without waiting.
    ///
    /// Runs inside the MQTT event loop, a full subscriber queue drops the
    /// message for that subscriber instead of stalling the connection.
    pub fn forward(&self, topic: &str, payload: String) {
        let calls = match self.calls.get(topic) {
            Some(c) => c,
            None => {
                debug!("Send for unknown topic {topic}");
                return;
            }
        };

        for call in calls {
            debug!("Sending to callback: {payload}");
            match call.try_send(payload.clone()) {
                Ok(_) => {},
                Err(TrySendError::Full(_)) => { error!("Callback queue of topic {topic} is full, message dropped"); },
                Err(TrySendError::Closed(_)) => { error!("Callback of topic {topic} is gone"); },
            }
        }
    }

    pub fn get_topics(&self) -> Vec<String> {
        self.calls.keys().cloned().collect()
    }
}

lazy_static! {
    pub static ref CALLBACKS: RwLock<Callbacks> = RwLock::new(Callbacks::new());
    pub static ref APP_STATUS: RwLock<AppStatus> = RwLock::new(AppStatus::new());
}

fn to_qos(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

impl MqttManager {
    pub fn new() -> (Self, Sender<Transmission>) {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection starting up");
        let config = get_config_or_panic!("mqtt", ConfigBases::Mqtt);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        mqttoptions.set_credentials(config.user.clone(), config.pass.clone());

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        // Spawn a new thread to handle the incomming messages
        let reconnect_c = client.clone();
        tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let payload = match String::from_utf8(p.payload.to_vec()) {
                            Ok(s) => s,
                            Err(_) => {
                                error!("Non UTF-8 payload on {}", p.topic);
                                continue;
                            }
                        };
                        debug!("Received MQTT message {payload:?}");
                        CALLBACKS.read().await.forward(&p.topic, payload);
                    },
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected, resubscribing everything");

                        /* We are connected resubscribe to everything */
                        let topics = CALLBACKS.read().await.get_topics();
                        for topic in topics {
                            /* Move the resubscription to it's own thread */
                            let client_clone = reconnect_c.clone();
                            tokio::spawn(async move {
                                if let Err(e) = client_clone.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                                    error!("Resubscribing {topic} failed: {e}");
                                }
                            });
                        }
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting ", e);
                    }
                }
            }
        });

        (MqttManager {
            client,
            rx: mrx,
            exit_thread: false,
        }, mtx)
    }

    pub async fn start_thread(&mut self) {
        // Handle all the incomming metering stuff
        while !self.exit_thread {
            let transmission = match self.rx.recv().await {
                Some(t) => t,
                None => {
                    debug!("Reading returned none, we exit now");
                    self.exit_thread = true;
                    continue;
                }
            };

            match transmission {
                Transmission::Metering(data) => {
                    info!("Metering data received: {}", data.id);
                    let raw = match serde_json::to_string(&data) {
                        Ok(r) => r,
                        Err(e) => { error!("Can not serialize metering data: {e}"); continue; }
                    };
                    match self.client.publish(format!("{TOPIC_PREFIX}/raw"), QoS::AtLeastOnce, false, raw).await {
                        Err(e) => { error!("Error sending: {}", e); },
                        Ok(_) => { debug!("Send successfully"); }
                    }

                    if let Ok(values) = serde_json::to_string(&data.metered_values) {
                        if let Err(e) = self.client.publish(data.device_topic(), QoS::AtLeastOnce, false, values).await {
                            error!("Error sending values of {}: {e}", data.meter_name);
                        }
                    }
                },
                Transmission::AutoDiscovery(disc) => {
                    match serde_json::to_string(&disc) {
                        Ok(d) => {
                            if let Err(e) = self.client.publish(disc.discover_topic.clone(), QoS::AtLeastOnce, true, d).await {
                                error!("Error sending discovery {}: {e}", disc.get_dev_id());
                            }
                        },
                        Err(e) => { error!("Can not serialize discovery {}: {e}", disc.get_dev_id()); }
                    }
                },
                Transmission::Subscribe(subscribe_data) => {
                    let topic = format!("{TOPIC_PREFIX}/{}", subscribe_data.topic);
                    match self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                        Ok(_) => {
                            CALLBACKS.write().await.insert(topic.clone(), subscribe_data.sender);
                            info!("Registered Callback {topic}");
                        },
                        Err(e) => { error!("Subscribing {topic} failed: {e}"); }
                    }
                },
                Transmission::Publish(publish_data) => {
                    match self.client.publish(
                        publish_data.topic,
                        to_qos(publish_data.qos),
                        publish_data.retain,
                        publish_data.payload
                    ).await {
                        Err(e) => { error!("Error publishing: {}", e); },
                        Ok(_) => { debug!("Published successfully"); }
                    }
                },
            };
        }

        info!("Thread exit, waiting");
    }
}

pub async fn get_app_status() -> AppStatus {
    APP_STATUS.read().await.clone()
}

pub async fn publish_uptime(mqtt_sender: &Sender<Transmission>) {
    let app_status = get_app_status().await;

    let uptime_publish = PublishData {
        topic: format!("{TOPIC_PREFIX}/mgt/uptime"),
        payload: app_status.uptime_seconds().to_string(),
        qos: 1,
        retain: true,
    };
    if mqtt_sender.send(Transmission::Publish(uptime_publish)).await.is_err() {
        error!("MQTT channel closed, uptime not published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_topic() {
        let mut mr = MeteringData::new();
        mr.protocol = DeviceProtocol::ZWave;
        mr.meter_name = "plug".to_string();
        assert_eq!(mr.device_topic(), "zwave2mqtt/devs/ZWave/plug");
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_qos(0), QoS::AtMostOnce);
        assert_eq!(to_qos(1), QoS::AtLeastOnce);
        assert_eq!(to_qos(2), QoS::ExactlyOnce);
        assert_eq!(to_qos(7), QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_callbacks_route_by_topic() {
        let mut callbacks = Callbacks::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(2);
        callbacks.insert("zwave2mqtt/zwave_input".to_string(), tx);

        callbacks.forward("zwave2mqtt/zwave_input", "abc".to_string());
        callbacks.forward("zwave2mqtt/other", "def".to_string());

        assert_eq!(rx.try_recv().unwrap(), "abc");
        assert!(rx.try_recv().is_err());
        assert_eq!(callbacks.get_topics(), vec!["zwave2mqtt/zwave_input".to_string()]);
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_forwarding() {
        let mut callbacks = Callbacks::new();
        let (slow_tx, mut slow_rx) = tokio::sync::mpsc::channel(1);
        let (fast_tx, mut fast_rx) = tokio::sync::mpsc::channel(4);
        callbacks.insert("zwave2mqtt/zwave_input".to_string(), slow_tx);
        callbacks.insert("zwave2mqtt/zwave_input".to_string(), fast_tx);

        /* The slow queue is full after the first message, the rest must not wait */
        let forwarding = async {
            for payload in ["a", "b", "c"] {
                callbacks.forward("zwave2mqtt/zwave_input", payload.to_string());
            }
        };
        tokio::time::timeout(Duration::from_secs(1), forwarding).await.unwrap();

        assert_eq!(slow_rx.try_recv().unwrap(), "a");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.try_recv().unwrap(), "a");
        assert_eq!(fast_rx.try_recv().unwrap(), "b");
        assert_eq!(fast_rx.try_recv().unwrap(), "c");
    }

    #[test]
    fn test_forward_to_closed_subscriber() {
        let mut callbacks = Callbacks::new();
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        callbacks.insert("zwave2mqtt/zwave_input".to_string(), tx);
        drop(rx);
        callbacks.forward("zwave2mqtt/zwave_input", "abc".to_string());
    }

    #[tokio::test]
    async fn test_publish_uptime_on_closed_channel() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);
        publish_uptime(&tx).await;
    }

    #[tokio::test]
    async fn test_publish_uptime() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        publish_uptime(&tx).await;
        match rx.try_recv() {
            Ok(Transmission::Publish(p)) => {
                assert_eq!(p.topic, "zwave2mqtt/mgt/uptime");
                assert!(p.retain);
                assert!(p.payload.parse::<u64>().is_ok());
            }
            _ => panic!("expected uptime publish"),
        }
    }
}
