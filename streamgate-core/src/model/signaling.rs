use crate::model::peer::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Текст, которым сторона завершает разговор с пиром.
pub const HANG_UP_MESSAGE: &str = "BYE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// `{ "type": "offer"|"answer", "sdp": "..." }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// `{ "sdpMid": "...", "sdpMLineIndex": 0, "candidate": "..." }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
    pub candidate: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerMessageError {
    #[error("message is not a JSON object")]
    InvalidJson,
    #[error("session description without sdp")]
    MissingSdp,
    #[error("unsupported session description type {0:?}")]
    UnsupportedType(String),
    /// `offer-loopback`: зритель просит соединение с самим собой, сервер
    /// такие вызовы не обслуживает.
    #[error("loopback offers are not served")]
    LoopbackOffer,
    #[error("candidate message is missing {0}")]
    MalformedCandidate(&'static str),
}

impl PeerMessage {
    /// Разбирает сообщение пира. Наличие `type` означает описание сессии,
    /// иначе сообщение считается ICE-кандидатом.
    pub fn parse(text: &str) -> Result<Self, PeerMessageError> {
        let value: Value = serde_json::from_str(text).map_err(|_| PeerMessageError::InvalidJson)?;
        let Some(object) = value.as_object() else {
            return Err(PeerMessageError::InvalidJson);
        };

        if let Some(kind) = object.get("type").and_then(Value::as_str) {
            let kind = match kind {
                "offer" => SdpType::Offer,
                "answer" => SdpType::Answer,
                "offer-loopback" => return Err(PeerMessageError::LoopbackOffer),
                other => return Err(PeerMessageError::UnsupportedType(other.to_owned())),
            };
            let sdp = object
                .get("sdp")
                .and_then(Value::as_str)
                .ok_or(PeerMessageError::MissingSdp)?;
            return Ok(Self::Description(SessionDescription {
                kind,
                sdp: sdp.to_owned(),
            }));
        }

        let sdp_mid = object
            .get("sdpMid")
            .and_then(Value::as_str)
            .ok_or(PeerMessageError::MalformedCandidate("sdpMid"))?;
        let sdp_mline_index = object
            .get("sdpMLineIndex")
            .and_then(Value::as_u64)
            .and_then(|i| u16::try_from(i).ok())
            .ok_or(PeerMessageError::MalformedCandidate("sdpMLineIndex"))?;
        let candidate = object
            .get("candidate")
            .and_then(Value::as_str)
            .ok_or(PeerMessageError::MalformedCandidate("candidate"))?;

        Ok(Self::Candidate(IceCandidate {
            sdp_mid: sdp_mid.to_owned(),
            sdp_mline_index,
            candidate: candidate.to_owned(),
        }))
    }

    pub fn to_json(&self) -> String {
        let encoded = match self {
            PeerMessage::Description(desc) => serde_json::to_string(desc),
            PeerMessage::Candidate(candidate) => serde_json::to_string(candidate),
        };
        // Обе структуры состоят только из строк и чисел.
        encoded.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Исходящее сигнальное сообщение, ожидающее отправки через сервер.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    pub target_peer: PeerId,
    pub payload: String,
}

impl OutboundEnvelope {
    pub fn new(target_peer: PeerId, payload: impl Into<String>) -> Self {
        Self {
            target_peer,
            payload: payload.into(),
        }
    }
}
