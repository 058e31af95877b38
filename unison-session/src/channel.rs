use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use unison_core::clock::{correlation_id, ReferenceClock};
use unison_core::events::{
    CommandPayload, Envelope, PositionUpdatePayload, SetTrackDataPayload, SetTrackPayload,
    TrackMetadata, TransportEvent, WaitPoint,
};

use crate::error::TransportError;

/// Typed publish side of the broadcast transport. Every outgoing event is
/// stamped with the local sender id and reference time at send time.
pub struct EventChannel {
    outbound: mpsc::Sender<Envelope>,
    clock: Arc<dyn ReferenceClock>,
    local_id: String,
}

impl EventChannel {
    pub fn new(
        outbound: mpsc::Sender<Envelope>,
        clock: Arc<dyn ReferenceClock>,
        local_id: String,
    ) -> Self {
        Self {
            outbound,
            clock,
            local_id,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Stamp and send one event. The envelope that went out is returned so
    /// the caller can ingest its own event with the exact same stamp.
    pub async fn send(&self, event: TransportEvent) -> Result<Envelope, TransportError> {
        let now = self.clock.now_ms();
        let kind = event.kind();
        let envelope = event
            .into_envelope(self.local_id.clone(), now)
            .map_err(TransportError::Encode)?;
        self.outbound
            .send(envelope.clone())
            .await
            .map_err(|_| TransportError::ChannelClosed)?;
        debug!(correlation = %correlation_id(now), kind = %kind, timestamp = now, "event sent");
        Ok(envelope)
    }

    pub async fn send_play(
        &self,
        track: TrackMetadata,
        position: f64,
    ) -> Result<Envelope, TransportError> {
        self.send(TransportEvent::Play(CommandPayload { track, position }))
            .await
    }

    pub async fn send_pause(
        &self,
        track: TrackMetadata,
        position: f64,
    ) -> Result<Envelope, TransportError> {
        self.send(TransportEvent::Pause(CommandPayload { track, position }))
            .await
    }

    pub async fn send_seek_to(
        &self,
        track: TrackMetadata,
        position: f64,
    ) -> Result<Envelope, TransportError> {
        self.send(TransportEvent::SeekTo(CommandPayload { track, position }))
            .await
    }

    pub async fn send_set_track(
        &self,
        metadata: Option<TrackMetadata>,
        wait_points: Vec<WaitPoint>,
    ) -> Result<Envelope, TransportError> {
        self.send(TransportEvent::SetTrack(SetTrackPayload {
            metadata,
            wait_points,
        }))
        .await
    }

    pub async fn send_set_track_data(
        &self,
        data: Option<Value>,
    ) -> Result<Envelope, TransportError> {
        self.send(TransportEvent::SetTrackData(SetTrackDataPayload { data }))
            .await
    }

    pub async fn send_position_update(
        &self,
        payload: PositionUpdatePayload,
    ) -> Result<Envelope, TransportError> {
        self.send(TransportEvent::PositionUpdate(payload)).await
    }

    pub async fn send_joined(&self) -> Result<Envelope, TransportError> {
        self.send(TransportEvent::Joined).await
    }
}
