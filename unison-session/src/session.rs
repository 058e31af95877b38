use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use unison_core::clock::ReferenceClock;
use unison_core::events::{Envelope, PlayerState, TrackMetadata, TransportEvent, WaitPoint};
use unison_core::order::EventStamp;
use unison_core::position;

use crate::channel::EventChannel;
use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::group::{Effects, GroupSnapshot, GroupState, PlayerAction};
use crate::roles::{RoleGate, RoleProvider};
use crate::suspension::Suspension;

/// Local media element driven by the coordinator. Actions flow the other way
/// through [`Session::actions`].
pub trait MediaPlayer: Send + Sync {
    fn state(&self) -> PlayerState;
}

/// Channel endpoints the embedding application wires between the coordinator
/// and its broadcast transport.
pub struct TransportLink {
    /// Events to put on the wire.
    pub outbound: mpsc::Sender<Envelope>,
    /// Events received from the wire. Echoes of our own events are tolerated.
    pub inbound: mpsc::Receiver<Envelope>,
    /// The local connection id, once the transport is connected.
    pub connection: watch::Receiver<Option<String>>,
    /// Ids of peers whose connection went away.
    pub departures: mpsc::Receiver<String>,
}

/// Public entry point: one coordinator instance per participant. Created
/// detached; [`Session::initialize`] binds it to a transport and starts the
/// event pump and the position-update ticker.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    player: Arc<dyn MediaPlayer>,
    clock: Arc<dyn ReferenceClock>,
    gate: Arc<RoleGate>,
    config: SessionConfig,
    actions: broadcast::Sender<PlayerAction>,
    runtime: Mutex<Option<SessionRuntime>>,
}

struct SessionRuntime {
    state: Arc<Mutex<GroupState>>,
    channel: Arc<EventChannel>,
    pump: JoinHandle<()>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.runtime.lock() {
            if let Some(runtime) = guard.take() {
                runtime.pump.abort();
            }
        }
    }
}

impl Session {
    pub fn new(
        player: Arc<dyn MediaPlayer>,
        clock: Arc<dyn ReferenceClock>,
        roles: Arc<dyn RoleProvider>,
        config: SessionConfig,
    ) -> Self {
        let (actions, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(SessionInner {
                player,
                clock,
                gate: Arc::new(RoleGate::new(roles)),
                config,
                actions,
                runtime: Mutex::new(None),
            }),
        }
    }

    /// Bind the coordinator to the transport: wait for the first connection
    /// id, announce ourselves with a `joined` ping, and start the pump.
    pub async fn initialize(&self, link: TransportLink) -> Result<(), SessionError> {
        self.inner.config.validate()?;
        if self.is_initialized() {
            return Err(SessionError::AlreadyInitialized);
        }

        let TransportLink {
            outbound,
            inbound,
            mut connection,
            departures,
        } = link;

        let local_id = wait_until_connected(&mut connection).await?;
        info!(connection_id = %local_id, "session connected");

        let channel = Arc::new(EventChannel::new(
            outbound,
            self.inner.clock.clone(),
            local_id.clone(),
        ));
        let state = Arc::new(Mutex::new(GroupState::new(
            local_id,
            self.inner.config.clone(),
        )));

        channel.send_joined().await?;

        let pump = tokio::spawn(pump(
            self.inner.clone(),
            state.clone(),
            channel.clone(),
            inbound,
            departures,
        ));

        let mut guard = self.inner.runtime.lock().unwrap();
        if guard.is_some() {
            pump.abort();
            return Err(SessionError::AlreadyInitialized);
        }
        *guard = Some(SessionRuntime {
            state,
            channel,
            pump,
        });
        Ok(())
    }

    /// Subscribe to the actions the local player binding should perform.
    pub fn actions(&self) -> broadcast::Receiver<PlayerAction> {
        self.inner.actions.subscribe()
    }

    pub async fn play(&self) -> Result<(), SessionError> {
        let (state, channel) = self.runtime()?;
        if !self.inner.config.policy.can_play_pause {
            return Err(SessionError::Blocked { operation: "play" });
        }
        let track = current_track(&state)?;
        self.check_local_role(&channel).await?;

        let position = self.projected_player_position();
        let envelope = channel.send_play(track, position).await?;
        self.apply_own(&state, &envelope);
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        let (state, channel) = self.runtime()?;
        if !self.inner.config.policy.can_play_pause {
            return Err(SessionError::Blocked { operation: "pause" });
        }
        let track = current_track(&state)?;
        self.check_local_role(&channel).await?;

        let position = self.projected_player_position();
        let envelope = channel.send_pause(track, position).await?;
        self.apply_own(&state, &envelope);
        Ok(())
    }

    pub async fn seek_to(&self, position: f64) -> Result<(), SessionError> {
        let (state, channel) = self.runtime()?;
        if !self.inner.config.policy.can_seek {
            return Err(SessionError::Blocked {
                operation: "seek_to",
            });
        }
        let track = current_track(&state)?;
        self.check_local_role(&channel).await?;

        match channel.send_seek_to(track, position).await {
            Ok(envelope) => {
                self.apply_own(&state, &envelope);
                Ok(())
            }
            Err(err) => {
                // Re-align the player before surfacing the failure so a
                // rejected seek cannot leave it drifted from the group.
                let sync = state
                    .lock()
                    .unwrap()
                    .sync_local_action(self.inner.clock.now_ms());
                let _ = self.inner.actions.send(sync);
                Err(err.into())
            }
        }
    }

    pub async fn set_track(
        &self,
        metadata: Option<TrackMetadata>,
        wait_points: Vec<WaitPoint>,
    ) -> Result<(), SessionError> {
        let (state, channel) = self.runtime()?;
        if !self.inner.config.policy.can_set_track {
            return Err(SessionError::Blocked {
                operation: "set_track",
            });
        }
        self.check_local_role(&channel).await?;

        let envelope = channel.send_set_track(metadata, wait_points).await?;
        self.apply_own(&state, &envelope);
        Ok(())
    }

    pub async fn set_track_data(&self, data: Option<Value>) -> Result<(), SessionError> {
        let (state, channel) = self.runtime()?;
        if !self.inner.config.policy.can_set_track_data {
            return Err(SessionError::Blocked {
                operation: "set_track_data",
            });
        }
        current_track(&state)?;
        self.check_local_role(&channel).await?;

        let envelope = channel.send_set_track_data(data).await?;
        self.apply_own(&state, &envelope);
        Ok(())
    }

    /// Detach the local player from group synchronization. An optional wait
    /// point is announced to the group so peers hold until we are back.
    pub async fn begin_suspension(
        &self,
        wait_point: Option<WaitPoint>,
    ) -> Result<Suspension, SessionError> {
        let (state, channel) = self.runtime()?;

        let refresh = {
            let mut group = state.lock().unwrap();
            if group.is_suspended() {
                return Err(SessionError::AlreadySuspended);
            }
            if wait_point.is_some() && !group.has_track() {
                return Err(SessionError::NoTrack);
            }
            group.set_suspended(true);
            wait_point.map(|wp| {
                let mut points = group.wait_points();
                points.push(wp);
                (group.current_track().cloned(), points)
            })
        };

        if let Some((metadata, points)) = refresh {
            match channel.send_set_track(metadata, points).await {
                Ok(envelope) => self.apply_own(&state, &envelope),
                Err(err) => {
                    state.lock().unwrap().set_suspended(false);
                    return Err(err.into());
                }
            }
        }

        info!("suspension began");
        Ok(Suspension::new(self.clone()))
    }

    pub(crate) async fn end_suspension(
        &self,
        resume_position: Option<f64>,
    ) -> Result<(), SessionError> {
        let (state, _channel) = self.runtime()?;
        let (effects, resume_now) = {
            let mut group = state.lock().unwrap();
            if !group.is_suspended() {
                return Ok(());
            }
            group.end_suspension(resume_position, self.inner.clock.now_ms())
        };
        for action in effects.actions {
            let _ = self.inner.actions.send(action);
        }
        info!("suspension ended");
        if let Some(target) = resume_now {
            self.seek_to(target).await?;
        }
        Ok(())
    }

    /// Best-effort synchronous cleanup for a dropped [`Suspension`] handle.
    pub(crate) fn abort_suspension(&self) {
        let Ok((state, _)) = self.runtime() else {
            return;
        };
        let mut group = state.lock().unwrap();
        if group.is_suspended() {
            let (effects, _) = group.end_suspension(None, self.inner.clock.now_ms());
            drop(group);
            for action in effects.actions {
                let _ = self.inner.actions.send(action);
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.runtime.lock().unwrap().is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.with_state(|g| g.is_suspended()).unwrap_or(false)
    }

    pub fn is_waiting(&self) -> bool {
        self.with_state(|g| g.is_waiting()).unwrap_or(false)
    }

    /// The local participant's playback state, including the local-only
    /// `suspended` and `waiting` flavors.
    pub fn playback_state(&self) -> unison_core::events::PlaybackState {
        self.with_state(|g| g.local_playback_state())
            .unwrap_or_default()
    }

    pub fn max_playback_drift(&self) -> f64 {
        self.inner.config.max_playback_drift
    }

    pub fn position_update_interval(&self) -> Duration {
        self.inner.config.position_update_interval
    }

    pub fn can_play_pause(&self) -> bool {
        self.inner.config.policy.can_play_pause
    }

    pub fn can_seek(&self) -> bool {
        self.inner.config.policy.can_seek
    }

    pub fn can_set_track(&self) -> bool {
        self.inner.config.policy.can_set_track
    }

    pub fn can_set_track_data(&self) -> bool {
        self.inner.config.policy.can_set_track_data
    }

    /// Inbound events silently dropped by the role gate.
    pub fn dropped_events(&self) -> u64 {
        self.inner.gate.dropped_events()
    }

    pub fn local_id(&self) -> Option<String> {
        let guard = self.inner.runtime.lock().unwrap();
        guard
            .as_ref()
            .map(|rt| rt.channel.local_id().to_string())
    }

    /// Authoritative group view, for introspection and tests.
    pub fn group_snapshot(&self) -> Option<GroupSnapshot> {
        self.with_state(|g| g.snapshot())
    }

    /// Stop the pump and detach from the transport. In-flight sends are
    /// allowed to complete on the transport side.
    pub fn dispose(&self) {
        if let Some(runtime) = self.inner.runtime.lock().unwrap().take() {
            runtime.pump.abort();
            info!("session disposed");
        }
    }

    // --- internals -------------------------------------------------------

    fn runtime(&self) -> Result<(Arc<Mutex<GroupState>>, Arc<EventChannel>), SessionError> {
        let guard = self.inner.runtime.lock().unwrap();
        match guard.as_ref() {
            Some(rt) => Ok((rt.state.clone(), rt.channel.clone())),
            None => Err(SessionError::NotInitialized),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&GroupState) -> T) -> Option<T> {
        let guard = self.inner.runtime.lock().unwrap();
        guard.as_ref().map(|rt| f(&rt.state.lock().unwrap()))
    }

    async fn check_local_role(&self, channel: &EventChannel) -> Result<(), SessionError> {
        let allowed = &self.inner.config.allowed_transport_roles;
        if allowed.is_empty() {
            return Ok(());
        }
        if self.inner.gate.holds_any(channel.local_id(), allowed).await {
            Ok(())
        } else {
            Err(SessionError::RoleDenied {
                connection_id: channel.local_id().to_string(),
            })
        }
    }

    /// Ingest our own just-sent envelope, so local and remote copies of this
    /// event carry the identical stamp. Only runs after the send succeeded
    /// (a cancelled send leaves local state untouched).
    fn apply_own(&self, state: &Arc<Mutex<GroupState>>, envelope: &Envelope) {
        let event = match TransportEvent::from_envelope(envelope) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "could not re-ingest own event");
                return;
            }
        };
        let effects = state.lock().unwrap().apply_event(
            event,
            EventStamp::from(envelope),
            self.inner.clock.now_ms(),
        );
        for action in effects.actions {
            let _ = self.inner.actions.send(action);
        }
    }

    fn projected_player_position(&self) -> f64 {
        let player_state = self.inner.player.state();
        match player_state.position_state {
            Some(ps) => position::project(
                ps.position,
                ps.playback_rate,
                player_state.playback_state,
                ps.timestamp,
                self.inner.clock.now_ms(),
            ),
            None => 0.0,
        }
    }
}

fn current_track(state: &Arc<Mutex<GroupState>>) -> Result<TrackMetadata, SessionError> {
    state
        .lock()
        .unwrap()
        .current_track()
        .cloned()
        .ok_or(SessionError::NoTrack)
}

async fn wait_until_connected(
    connection: &mut watch::Receiver<Option<String>>,
) -> Result<String, SessionError> {
    loop {
        if let Some(id) = connection.borrow().clone() {
            return Ok(id);
        }
        connection
            .changed()
            .await
            .map_err(|_| SessionError::Transport(TransportError::ChannelClosed))?;
    }
}

/// The coordinator's event loop: inbound events, departure signals and the
/// position-update ticker, serialized over the group state.
async fn pump(
    inner: Arc<SessionInner>,
    state: Arc<Mutex<GroupState>>,
    channel: Arc<EventChannel>,
    mut inbound: mpsc::Receiver<Envelope>,
    mut departures: mpsc::Receiver<String>,
) {
    let mut ticker = tokio::time::interval(inner.config.position_update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut departures_open = true;

    loop {
        tokio::select! {
            maybe_envelope = inbound.recv() => match maybe_envelope {
                Some(envelope) => handle_inbound(&inner, &state, &channel, envelope).await,
                None => {
                    info!("transport inbound closed, stopping coordinator pump");
                    break;
                }
            },
            maybe_peer = departures.recv(), if departures_open => match maybe_peer {
                Some(peer) => {
                    inner.gate.forget(&peer);
                    let effects = state
                        .lock()
                        .unwrap()
                        .peer_departed(&peer, inner.clock.now_ms());
                    dispatch(&inner, &channel, effects).await;
                }
                None => departures_open = false,
            },
            _ = ticker.tick() => {
                let has_track = state.lock().unwrap().has_track();
                if has_track {
                    let player_state = inner.player.state();
                    let effects = state
                        .lock()
                        .unwrap()
                        .tick(&player_state, inner.clock.now_ms());
                    dispatch(&inner, &channel, effects).await;
                }
            }
        }
    }
}

async fn handle_inbound(
    inner: &Arc<SessionInner>,
    state: &Arc<Mutex<GroupState>>,
    channel: &Arc<EventChannel>,
    envelope: Envelope,
) {
    if envelope.client_id == channel.local_id() {
        // Already ingested when we sent it.
        return;
    }

    let event = match TransportEvent::from_envelope(&envelope) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, sender = %envelope.client_id, "dropping malformed inbound event");
            return;
        }
    };

    let allowed = &inner.config.allowed_transport_roles;
    if envelope.name.is_restricted() && !allowed.is_empty() {
        if !inner.gate.holds_any(&envelope.client_id, allowed).await {
            inner.gate.note_dropped();
            warn!(sender = %envelope.client_id, kind = %envelope.name, "dropping event from unauthorized sender");
            return;
        }
    }

    let effects = state.lock().unwrap().apply_event(
        event,
        EventStamp::from(&envelope),
        inner.clock.now_ms(),
    );
    dispatch(inner, channel, effects).await;
}

async fn dispatch(inner: &Arc<SessionInner>, channel: &Arc<EventChannel>, effects: Effects) {
    for action in effects.actions {
        let _ = inner.actions.send(action);
    }
    for event in effects.outbound {
        // Pump-originated sends honor the same role gate as the facade;
        // denial suppresses the send but local state stays consistent.
        let allowed = &inner.config.allowed_transport_roles;
        if event.kind().is_restricted() && !allowed.is_empty() {
            if !inner.gate.holds_any(channel.local_id(), allowed).await {
                debug!(kind = %event.kind(), "suppressed outbound event, local sender lacks a role");
                continue;
            }
        }
        if let Err(err) = channel.send(event).await {
            warn!(error = %err, "failed to broadcast event");
        }
    }
}
