use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceProtocol {
    Unknown,
    ZWave,
}

impl DeviceProtocol {
    pub fn to_string(&self) -> String {
        match self {
            DeviceProtocol::ZWave => "Z-Wave".to_string(),
            DeviceProtocol::Unknown => "Unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names() {
        assert_eq!(DeviceProtocol::ZWave.to_string(), "Z-Wave");
        assert_eq!(DeviceProtocol::Unknown.to_string(), "Unknown");
    }
}
