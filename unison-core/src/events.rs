use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Closed set of event kinds carried over the broadcast transport.
///
/// The serde spellings are the wire names; `seekTo` and friends keep their
/// camelCase form so envelopes stay compatible with non-Rust participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "play")]
    Play,
    #[serde(rename = "pause")]
    Pause,
    #[serde(rename = "seekTo")]
    SeekTo,
    #[serde(rename = "setTrack")]
    SetTrack,
    #[serde(rename = "setTrackData")]
    SetTrackData,
    #[serde(rename = "positionUpdate")]
    PositionUpdate,
    #[serde(rename = "joined")]
    Joined,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Play => "play",
            EventKind::Pause => "pause",
            EventKind::SeekTo => "seekTo",
            EventKind::SetTrack => "setTrack",
            EventKind::SetTrackData => "setTrackData",
            EventKind::PositionUpdate => "positionUpdate",
            EventKind::Joined => "joined",
        }
    }

    /// Inbound events of these kinds are only accepted from senders holding
    /// one of the allowed transport roles. Position updates and join pings
    /// stay unrestricted.
    pub fn is_restricted(self) -> bool {
        !matches!(self, EventKind::PositionUpdate | EventKind::Joined)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport envelope wrapped around every event.
///
/// `timestamp` is reference time in integer milliseconds, stamped by the
/// sender at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub client_id: String,
    pub timestamp: u64,
    pub name: EventKind,
    pub data: Value,
}

/// Opaque track descriptor. Only `track_identity` takes part in equality;
/// everything else rides along untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub track_identity: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TrackMetadata {
    pub fn new(track_identity: impl Into<String>) -> Self {
        Self {
            track_identity: track_identity.into(),
            extra: serde_json::Map::new(),
        }
    }
}

impl PartialEq for TrackMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.track_identity == other.track_identity
    }
}

impl Eq for TrackMetadata {}

/// A playback offset at which participants hold until the release condition
/// (all online peers, or `max_clients` of them) is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitPoint {
    pub position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clients: Option<u32>,
}

impl WaitPoint {
    pub fn at(position: f64) -> Self {
        Self {
            position,
            max_clients: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    #[default]
    None,
    Paused,
    Playing,
    Ended,
    Suspended,
    Waiting,
}

impl PlaybackState {
    pub fn is_playing(self) -> bool {
        matches!(self, PlaybackState::Playing)
    }

    /// `suspended` and `waiting` are observable only locally; on the wire
    /// both read as `paused`.
    pub fn wire(self) -> PlaybackState {
        match self {
            PlaybackState::Suspended | PlaybackState::Waiting => PlaybackState::Paused,
            other => other,
        }
    }
}

/// Snapshot reported by the local media element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub metadata: Option<TrackMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_data: Option<Value>,
    pub playback_state: PlaybackState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_state: Option<PositionState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionState {
    pub position: f64,
    pub playback_rate: f64,
    pub timestamp: u64,
}

/// Payload of `play`, `pause` and `seekTo`. The track reference lets
/// receivers reject commands that raced a track change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub track: TrackMetadata,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTrackPayload {
    pub metadata: Option<TrackMetadata>,
    #[serde(default)]
    pub wait_points: Vec<WaitPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetTrackDataPayload {
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdatePayload {
    pub playback_state: PlaybackState,
    pub position: f64,
    pub playback_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_point: Option<WaitPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackMetadata>,
}

/// Typed view of an envelope's kind + payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Play(CommandPayload),
    Pause(CommandPayload),
    SeekTo(CommandPayload),
    SetTrack(SetTrackPayload),
    SetTrackData(SetTrackDataPayload),
    PositionUpdate(PositionUpdatePayload),
    Joined,
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Play(_) => EventKind::Play,
            TransportEvent::Pause(_) => EventKind::Pause,
            TransportEvent::SeekTo(_) => EventKind::SeekTo,
            TransportEvent::SetTrack(_) => EventKind::SetTrack,
            TransportEvent::SetTrackData(_) => EventKind::SetTrackData,
            TransportEvent::PositionUpdate(_) => EventKind::PositionUpdate,
            TransportEvent::Joined => EventKind::Joined,
        }
    }

    /// The track this event refers to, when it carries one.
    pub fn track_ref(&self) -> Option<&TrackMetadata> {
        match self {
            TransportEvent::Play(cmd)
            | TransportEvent::Pause(cmd)
            | TransportEvent::SeekTo(cmd) => Some(&cmd.track),
            TransportEvent::SetTrack(payload) => payload.metadata.as_ref(),
            TransportEvent::PositionUpdate(payload) => payload.track.as_ref(),
            TransportEvent::SetTrackData(_) | TransportEvent::Joined => None,
        }
    }

    pub fn into_envelope(
        self,
        client_id: impl Into<String>,
        timestamp: u64,
    ) -> Result<Envelope, ProtocolError> {
        let kind = self.kind();
        let data = match self {
            TransportEvent::Play(p) | TransportEvent::Pause(p) | TransportEvent::SeekTo(p) => {
                serde_json::to_value(p)
            }
            TransportEvent::SetTrack(p) => serde_json::to_value(p),
            TransportEvent::SetTrackData(p) => serde_json::to_value(p),
            TransportEvent::PositionUpdate(p) => serde_json::to_value(p),
            TransportEvent::Joined => Ok(Value::Object(serde_json::Map::new())),
        }
        .map_err(|source| ProtocolError::Encode {
            kind: kind.as_str(),
            source,
        })?;

        Ok(Envelope {
            client_id: client_id.into(),
            timestamp,
            name: kind,
            data,
        })
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let malformed = |source| ProtocolError::Malformed {
            kind: envelope.name.as_str(),
            source,
        };
        let event = match envelope.name {
            EventKind::Play => {
                TransportEvent::Play(serde_json::from_value(envelope.data.clone()).map_err(malformed)?)
            }
            EventKind::Pause => {
                TransportEvent::Pause(serde_json::from_value(envelope.data.clone()).map_err(malformed)?)
            }
            EventKind::SeekTo => {
                TransportEvent::SeekTo(serde_json::from_value(envelope.data.clone()).map_err(malformed)?)
            }
            EventKind::SetTrack => TransportEvent::SetTrack(
                serde_json::from_value(envelope.data.clone()).map_err(malformed)?,
            ),
            EventKind::SetTrackData => TransportEvent::SetTrackData(
                serde_json::from_value(envelope.data.clone()).map_err(malformed)?,
            ),
            EventKind::PositionUpdate => TransportEvent::PositionUpdate(
                serde_json::from_value(envelope.data.clone()).map_err(malformed)?,
            ),
            EventKind::Joined => TransportEvent::Joined,
        };
        Ok(event)
    }
}

/// Malformed or unencodable event payloads. Always recovered by the
/// receiving coordinator (logged and dropped), never fatal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed `{kind}` payload: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode `{kind}` payload: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
