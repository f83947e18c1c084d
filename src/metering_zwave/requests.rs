use super::structs::{MeterKey, COMMAND_CLASS_METER, METER_CMD_RESET, METER_CMD_SUPPORTED_GET};
use super::version_policy::VersionPolicy;
use super::MeterError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestKind {
    Get,
    SupportedGet,
    Reset,
}

impl RequestKind {
    pub fn to_string(&self) -> String {
        match self {
            RequestKind::Get => "MeterCmd_Get".to_string(),
            RequestKind::SupportedGet => "MeterCmd_SupportedGet".to_string(),
            RequestKind::Reset => "MeterCmd_Reset".to_string(),
        }
    }
}

/// Body of an outbound request, the transport adds addressing and framing.
///
/// `payload` is the length byte followed by the command class bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterRequest {
    pub node_id: u8,
    pub kind: RequestKind,
    pub payload: Vec<u8>,
}

/// Wire representation published to the transport
#[derive(Serialize)]
pub struct OutboundFrame {
    pub node_id: u8,
    pub command: String,
    pub payload: String,
}

impl MeterRequest {
    pub fn to_outbound(&self) -> OutboundFrame {
        OutboundFrame {
            node_id: self.node_id,
            command: self.kind.to_string(),
            payload: hex::encode(&self.payload),
        }
    }
}

pub fn build_supported_get(node_id: u8, policy: VersionPolicy) -> Result<MeterRequest, MeterError> {
    if !policy.supports_supported_get() {
        return Err(MeterError::UnsupportedOperation("MeterCmd_SupportedGet"));
    }

    Ok(MeterRequest {
        node_id,
        kind: RequestKind::SupportedGet,
        payload: vec![2, COMMAND_CLASS_METER, METER_CMD_SUPPORTED_GET],
    })
}

pub fn build_get(node_id: u8, policy: VersionPolicy, key: &MeterKey) -> MeterRequest {
    MeterRequest {
        node_id,
        kind: RequestKind::Get,
        payload: policy.get_payload(key.scale),
    }
}

pub fn build_reset(node_id: u8) -> MeterRequest {
    MeterRequest {
        node_id,
        kind: RequestKind::Reset,
        payload: vec![2, COMMAND_CLASS_METER, METER_CMD_RESET],
    }
}
