use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct HaDevice {
    ids: String,
    name: String,
    manufacturer: String,
    model: String,
}

#[derive(Serialize)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub support_url: String,
}

fn is_none_str(value: &String) -> bool {
    value.is_empty() || value == "NONE"
}

#[derive(Serialize, PartialEq, Deserialize, Clone, Default, Debug)]
pub enum HAPlatform {
    #[default]
    Sensor,
    BinarySensor,
    Button,
}

impl HAPlatform {
    pub fn to_string(&self) -> String {
        match self {
            HAPlatform::Sensor => "sensor".to_string(),
            HAPlatform::BinarySensor => "binary_sensor".to_string(),
            HAPlatform::Button => "button".to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct HaComponent {
    pub p: String,
    pub name: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub device_class: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub unit_of_measurement: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub value_template: String,
    pub unique_id: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub state_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_press: Option<String>,
}

impl HaComponent {
    /// Sensor or binary sensor reading `json_key` from the device state topic
    pub fn new(platform: HAPlatform, device: String, dclass: String, uof: String, proto: String, name: String, json_key: String, state_class: String) -> Self {
        let (p_on, p_off) = match platform {
            HAPlatform::BinarySensor => (Some(true), Some(false)),
            _ => (None, None),
        };

        HaComponent {
            p: platform.to_string(),
            name,
            device_class: dclass,
            unit_of_measurement: uof,
            value_template: format!("{{{{ value_json.{json_key} }}}}"),
            unique_id: format!("zw2m_{proto}_{device}_{json_key}").to_lowercase(),
            object_id: format!("{device}_{json_key}").to_lowercase(),
            state_class,
            payload_on: p_on,
            payload_off: p_off,
            command_topic: None,
            payload_press: None,
        }
    }

    /// Button publishing `payload` to `command_topic` when pressed
    pub fn new_button(device: String, proto: String, name: String, command_topic: String, payload: String) -> Self {
        let safe_name = name.replace(' ', "_");
        HaComponent {
            p: HAPlatform::Button.to_string(),
            name,
            device_class: String::new(),
            unit_of_measurement: String::new(),
            value_template: String::new(),
            unique_id: format!("zw2m_{proto}_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_class: String::new(),
            payload_on: None,
            payload_off: None,
            command_topic: Some(command_topic),
            payload_press: Some(payload),
        }
    }
}

#[derive(Serialize)]
pub struct HaDiscover {
    pub dev: HaDevice,
    pub o: HaOrigin,
    pub cmps: serde_json::Map<String, serde_json::Value>,
    pub state_topic: String,
    pub qos: u32,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaDiscover {
    pub fn new(name: String, manu: String, model: String, proto: String) -> Self {
        HaDiscover {
            discover_topic: format!("homeassistant/device/zw2m_{proto}-{name}/config"),
            dev: HaDevice {
                ids: format!("zw2m_{proto}_{name}"),
                name: name.clone(),
                manufacturer: manu,
                model,
            },
            o: HaOrigin {
                name: "zwave2mqtt".to_string(),
                sw_version: env!("CARGO_PKG_VERSION").to_string(),
                support_url: env!("CARGO_PKG_REPOSITORY").to_string(),
            },
            cmps: serde_json::Map::new(),
            state_topic: format!("zwave2mqtt/devs/{proto}/{name}"),
            qos: 2,
        }
    }

    pub fn get_dev_id(&self) -> String {
        self.dev.ids.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_component() {
        let c = HaComponent::new(
            HAPlatform::Sensor,
            "Plug".to_string(),
            "power".to_string(),
            "W".to_string(),
            "ZWave".to_string(),
            "Electric - W".to_string(),
            "electric_w".to_string(),
            "measurement".to_string(),
        );
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["p"], "sensor");
        assert_eq!(v["value_template"], "{{ value_json.electric_w }}");
        assert_eq!(v["unique_id"], "zw2m_zwave_plug_electric_w");
        assert!(v.get("payload_on").is_none());
        assert!(v.get("command_topic").is_none());
    }

    #[test]
    fn test_binary_sensor_skips_empty_fields() {
        let c = HaComponent::new(
            HAPlatform::BinarySensor,
            "plug".to_string(),
            String::new(),
            String::new(),
            "ZWave".to_string(),
            "Exporting".to_string(),
            "exporting".to_string(),
            String::new(),
        );
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["payload_on"], true);
        assert_eq!(v["payload_off"], false);
        assert!(v.get("device_class").is_none());
        assert!(v.get("unit_of_measurement").is_none());
        assert!(v.get("state_class").is_none());
    }

    #[test]
    fn test_button_and_discover() {
        let c = HaComponent::new_button("plug".to_string(), "ZWave".to_string(), "Reset".to_string(), "zwave2mqtt/zwave_command".to_string(), "{}".to_string());
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["p"], "button");
        assert_eq!(v["command_topic"], "zwave2mqtt/zwave_command");
        assert!(v.get("value_template").is_none());

        let d = HaDiscover::new("plug".to_string(), "Z-Wave".to_string(), "Meter v3".to_string(), "ZWave".to_string());
        assert_eq!(d.discover_topic, "homeassistant/device/zw2m_ZWave-plug/config");
        assert_eq!(d.state_topic, "zwave2mqtt/devs/ZWave/plug");
        assert_eq!(d.get_dev_id(), "zw2m_ZWave_plug");
        let v = serde_json::to_value(&d).unwrap();
        assert!(v.get("discover_topic").is_none());
    }
}
