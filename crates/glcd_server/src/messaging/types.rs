//! Message type definitions for bus traffic.
//!
//! Inbound messages arrive as loosely shaped JSON objects and are decoded in
//! two steps: [`Envelope::decode`] checks the outer shape (who sent it and
//! what kind of message it is), then [`Envelope::into_message`] decodes the
//! `data` payload for the specific kind into a [`HubMessage`].
//!
//! Outbound messages are always [`Outbound`] envelopes `{type, data}`.

use crate::error::HubError;
use crate::registry::{ClientId, SERVER_CLIENT_ID};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A message received from the bus, decoded only as far as its outer shape.
///
/// # Examples
///
/// Legacy clients tag with `command`, newer ones with `type`:
/// ```json
/// { "client": "10.0.0.5:4151:arena", "command": "sendZone", "data": { "zone": "town" } }
/// ```
///
/// A message without a tag is a bare heartbeat:
/// ```json
/// { "client": "10.0.0.5:4151:arena" }
/// ```
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    /// Identifier of the sending client
    pub client: ClientId,
    /// Message tag, `None` for a bare heartbeat
    pub tag: Option<String>,
    /// The whole message as JSON
    pub raw: Value,
    /// The bytes exactly as received
    pub bytes: &'a [u8],
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    client: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl<'a> Envelope<'a> {
    /// Decodes the outer envelope shape.
    ///
    /// # Errors
    ///
    /// [`HubError::Decode`] if the bytes are not a JSON object with a string
    /// `client` field and string-valued tag fields.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, HubError> {
        let raw: Value = serde_json::from_slice(bytes)
            .map_err(|e| HubError::Decode(format!("Invalid JSON: {e}")))?;
        let header = EnvelopeHeader::deserialize(&raw)
            .map_err(|e| HubError::Decode(format!("Invalid envelope: {e}")))?;

        Ok(Self {
            client: header.client,
            tag: header.command.or(header.kind),
            raw,
            bytes,
        })
    }

    /// Whether this is the hub's own topic-provisioning echo.
    pub fn is_server_echo(&self) -> bool {
        self.client == SERVER_CLIENT_ID
    }

    /// The `data` payload, treating JSON `null` as absent.
    pub fn data(&self) -> Option<&Value> {
        self.raw.get("data").filter(|v| !v.is_null())
    }

    /// Decodes the payload for the envelope's tag.
    ///
    /// # Errors
    ///
    /// [`HubError::Routing`] if the tag is unknown or the payload lacks the
    /// fields that tag requires.
    pub fn into_message(self) -> Result<HubMessage, HubError> {
        let Some(tag) = self.tag.as_deref() else {
            return Ok(HubMessage::Heartbeat);
        };
        let kind = MessageKind::from_tag(tag)
            .ok_or_else(|| HubError::Routing(format!("Unknown message type '{tag}'")))?;

        let message = match kind {
            MessageKind::Heartbeat => HubMessage::Heartbeat,
            MessageKind::Ping => HubMessage::Ping,
            MessageKind::Connected => HubMessage::Connected,
            MessageKind::PlayerState => {
                if self.data().is_none() {
                    return Err(missing_data(tag));
                }
                HubMessage::PlayerState { message: self.raw }
            }
            MessageKind::UpdateZone => {
                let payload: ZoneUpdate = self.payload(tag)?;
                HubMessage::UpdateZone {
                    zone: payload.zone,
                    data: payload.data,
                }
            }
            MessageKind::SendZone => {
                let payload: ZoneRequest = self.payload(tag)?;
                HubMessage::SendZone { zone: payload.zone }
            }
            MessageKind::Wall | MessageKind::Chat | MessageKind::Broadcast => {
                HubMessage::Broadcast {
                    kind,
                    raw: self.bytes.to_vec(),
                }
            }
            MessageKind::PlayerAuth => {
                let payload: Credentials = self.payload(tag)?;
                HubMessage::PlayerAuth {
                    user: payload.user,
                    password: payload.password,
                }
            }
        };
        Ok(message)
    }

    fn payload<T: for<'de> Deserialize<'de>>(&self, tag: &str) -> Result<T, HubError> {
        let data = self.data().ok_or_else(|| missing_data(tag))?;
        T::deserialize(data).map_err(|e| HubError::Routing(format!("Invalid '{tag}' data: {e}")))
    }
}

fn missing_data(tag: &str) -> HubError {
    HubError::Routing(format!("Message '{tag}' has no data"))
}

#[derive(Deserialize)]
struct ZoneUpdate {
    zone: String,
    data: Value,
}

#[derive(Deserialize)]
struct ZoneRequest {
    zone: String,
}

#[derive(Deserialize)]
struct Credentials {
    user: String,
    password: String,
}

/// Every message tag the hub understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ping,
    Heartbeat,
    PlayerState,
    UpdateZone,
    SendZone,
    Connected,
    Wall,
    Chat,
    Broadcast,
    PlayerAuth,
}

impl MessageKind {
    /// Looks up a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "ping" => Self::Ping,
            "heartbeat" => Self::Heartbeat,
            "playerState" => Self::PlayerState,
            "updateZone" => Self::UpdateZone,
            "sendZone" => Self::SendZone,
            "connected" => Self::Connected,
            "wall" => Self::Wall,
            "chat" => Self::Chat,
            "broadcast" => Self::Broadcast,
            "playerAuth" => Self::PlayerAuth,
            _ => return None,
        };
        Some(kind)
    }

    /// The wire tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Heartbeat => "heartbeat",
            Self::PlayerState => "playerState",
            Self::UpdateZone => "updateZone",
            Self::SendZone => "sendZone",
            Self::Connected => "connected",
            Self::Wall => "wall",
            Self::Chat => "chat",
            Self::Broadcast => "broadcast",
            Self::PlayerAuth => "playerAuth",
        }
    }
}

/// A fully decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Liveness only
    Heartbeat,
    /// Liveness plus a `pong` reply
    Ping,
    /// The full `playerState` message as received
    PlayerState { message: Value },
    /// Persist `data` as zone `zone`
    UpdateZone { zone: String, data: Value },
    /// Reply with one zone document
    SendZone { zone: String },
    /// Reply with every zone and every known player state
    Connected,
    /// Fan the original bytes out to every client
    Broadcast { kind: MessageKind, raw: Vec<u8> },
    /// Check credentials
    PlayerAuth { user: String, password: String },
}

impl HubMessage {
    /// The tag this message was decoded from.
    pub fn kind(&self) -> MessageKind {
        match self {
            HubMessage::Heartbeat => MessageKind::Heartbeat,
            HubMessage::Ping => MessageKind::Ping,
            HubMessage::PlayerState { .. } => MessageKind::PlayerState,
            HubMessage::UpdateZone { .. } => MessageKind::UpdateZone,
            HubMessage::SendZone { .. } => MessageKind::SendZone,
            HubMessage::Connected => MessageKind::Connected,
            HubMessage::Broadcast { kind, .. } => *kind,
            HubMessage::PlayerAuth { .. } => MessageKind::PlayerAuth,
        }
    }
}

/// A decoded message together with the client that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub client: ClientId,
    pub message: HubMessage,
}

/// A message published by the hub: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl Outbound {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Reply to `ping` carrying the hub's current time.
    pub fn pong(now: DateTime<Utc>) -> Self {
        Self::new("pong", json!(now.to_rfc3339_opts(SecondsFormat::Millis, true)))
    }

    /// Human-readable status text.
    pub fn message(text: impl Into<String>) -> Self {
        Self::new("message", Value::String(text.into()))
    }

    /// A failure the client should be told about.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new("error", json!({ "code": code, "message": message.into() }))
    }

    /// Announces that a client has timed out.
    pub fn player_gone(client_id: &str) -> Self {
        Self::new("playerGone", json!({ "client": client_id }))
    }

    /// Serializes the envelope for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
