use std::collections::BTreeMap;
use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use unison_core::events::{
    CommandPayload, EventKind, PlaybackState, PlayerState, PositionUpdatePayload,
    SetTrackDataPayload, SetTrackPayload, TrackMetadata, TransportEvent, WaitPoint,
};
use unison_core::order::EventStamp;
use unison_core::position;

use crate::config::SessionConfig;
use crate::track::{PlaybackTrack, TrackChange};

const POSITION_EPS: f64 = 1e-6;

/// Action the local media player should perform. Consumed by the player
/// binding through the session's action broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerAction {
    Play { position: f64 },
    Pause { position: f64 },
    Seek { position: f64 },
    /// Corrective re-alignment with the group-projected position after the
    /// drift bound was exceeded. Treated as a precise seek.
    Catchup { position: f64 },
    LoadTrack { metadata: Option<TrackMetadata> },
    TrackData { data: Option<Value> },
    /// One-shot reconciliation after a suspension ends: set the track if it
    /// changed, set the position, then play or pause.
    SyncLocal {
        metadata: Option<TrackMetadata>,
        position: f64,
        playing: bool,
    },
}

/// Last observed state of one live peer (the local one included).
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPositionRecord {
    pub playback_state: PlaybackState,
    pub track: Option<TrackMetadata>,
    /// Position in seconds, valid at `timestamp`.
    pub position: f64,
    pub timestamp: u64,
    pub waiting: bool,
    pub wait_point: Option<WaitPoint>,
    pub playback_rate: f64,
}

impl GroupPositionRecord {
    pub fn project(&self, now_ms: u64) -> f64 {
        position::project(
            self.position,
            self.playback_rate,
            self.playback_state,
            self.timestamp,
            now_ms,
        )
    }

    fn stamp(&self, peer_id: &str) -> EventStamp {
        EventStamp::new(self.timestamp, peer_id)
    }
}

/// What an ingest pass asks the session to do: actions for the local player
/// and events to broadcast.
#[derive(Debug, Default)]
pub struct Effects {
    pub actions: Vec<PlayerAction>,
    pub outbound: Vec<TransportEvent>,
}

/// Authoritative view of the group, computed locally. Two coordinators that
/// saw the same set of events hold identical group state regardless of
/// delivery order; every conflict resolves through [`EventStamp`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSnapshot {
    pub track: Option<TrackMetadata>,
    pub playback_state: PlaybackState,
    pub peers: BTreeMap<String, GroupPositionRecord>,
}

/// The coordinator state machine. All mutation happens through the ingest
/// methods, called from the session's event loop.
pub struct GroupState {
    local_id: String,
    records: HashMap<String, GroupPositionRecord>,
    track: PlaybackTrack,
    track_data: Option<Value>,
    track_data_stamp: Option<EventStamp>,
    suspended: bool,
    /// Wait point index the local participant is holding at.
    waiting_at: Option<usize>,
    /// Stamp and kind of the last applied transport command, for command
    /// arbitration and for keeping an explicit pause authoritative over
    /// stale "playing" records.
    last_command: Option<(EventStamp, EventKind)>,
    last_catchup_ms: Option<u64>,
    last_follow_ms: Option<u64>,
    pending_resume_seek: Option<f64>,
    config: SessionConfig,
}

impl GroupState {
    pub fn new(local_id: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            local_id: local_id.into(),
            records: HashMap::new(),
            track: PlaybackTrack::default(),
            track_data: None,
            track_data_stamp: None,
            suspended: false,
            waiting_at: None,
            last_command: None,
            last_catchup_ms: None,
            last_follow_ms: None,
            pending_resume_seek: None,
            config,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn has_track(&self) -> bool {
        self.track.has_track()
    }

    pub fn current_track(&self) -> Option<&TrackMetadata> {
        self.track.metadata()
    }

    pub fn track_data(&self) -> Option<&Value> {
        self.track_data.as_ref()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting_at.is_some()
    }

    pub fn record(&self, peer_id: &str) -> Option<&GroupPositionRecord> {
        self.records.get(peer_id)
    }

    /// Effective group playback state: paused while any peer holds at a wait
    /// point, otherwise the majority vote.
    pub fn group_playback_state(&self) -> PlaybackState {
        if self.any_waiting() {
            PlaybackState::Paused
        } else if self.group_playing() {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    /// Local participant's state, including the local-only flavors.
    pub fn local_playback_state(&self) -> PlaybackState {
        if self.suspended {
            PlaybackState::Suspended
        } else if self.waiting_at.is_some() {
            PlaybackState::Waiting
        } else {
            self.records
                .get(&self.local_id)
                .map(|r| r.playback_state)
                .unwrap_or(PlaybackState::None)
        }
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            track: self.track.metadata().cloned(),
            playback_state: self.group_playback_state(),
            peers: self
                .records
                .iter()
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect(),
        }
    }

    /// Ingest one decoded transport event. The caller has already passed the
    /// role gate; `stamp` is the envelope's `(timestamp, sender)`.
    pub fn apply_event(
        &mut self,
        event: TransportEvent,
        stamp: EventStamp,
        now_ms: u64,
    ) -> Effects {
        let effects = match event {
            TransportEvent::Play(cmd) => self.apply_command(EventKind::Play, cmd, stamp, now_ms),
            TransportEvent::Pause(cmd) => self.apply_command(EventKind::Pause, cmd, stamp, now_ms),
            TransportEvent::SeekTo(cmd) => {
                self.apply_command(EventKind::SeekTo, cmd, stamp, now_ms)
            }
            TransportEvent::SetTrack(payload) => self.apply_set_track(payload, stamp, now_ms),
            TransportEvent::SetTrackData(payload) => self.apply_set_track_data(payload, stamp),
            TransportEvent::PositionUpdate(payload) => {
                self.apply_position_update(payload, stamp, now_ms)
            }
            TransportEvent::Joined => self.apply_joined(now_ms),
        };
        self.gate(effects)
    }

    /// Periodic local sample: refresh the own record from the player, detect
    /// wait-point crossings, and produce the outbound position update.
    pub fn tick(&mut self, player: &PlayerState, now_ms: u64) -> Effects {
        let mut effects = Effects::default();

        let (position, rate) = match player.position_state {
            Some(ps) => (
                position::project(
                    ps.position,
                    ps.playback_rate,
                    player.playback_state,
                    ps.timestamp,
                    now_ms,
                ),
                ps.playback_rate,
            ),
            None => self
                .records
                .get(&self.local_id)
                .map(|r| (r.position, r.playback_rate))
                .unwrap_or((0.0, 1.0)),
        };

        if self.holding_locally() {
            // The player is parked at the wait point; don't let a slightly
            // stale sample overwrite the hold bookkeeping.
            if let Some(wp) = self.waiting_at.and_then(|idx| self.track.point(idx)) {
                self.set_own(PlaybackState::Paused, wp.position, rate, true, Some(wp), now_ms);
            }
        } else {
            self.waiting_at = None;
            self.set_own(
                player.playback_state.wire(),
                position,
                rate,
                false,
                None,
                now_ms,
            );
        }

        self.reconcile(now_ms, &mut effects);
        effects
            .outbound
            .push(TransportEvent::PositionUpdate(self.position_update_payload(now_ms)));
        self.gate(effects)
    }

    /// The transport told us a peer is gone; reap its record. A departed
    /// waiter can release a wait point for everyone else.
    pub fn peer_departed(&mut self, peer_id: &str, now_ms: u64) -> Effects {
        let mut effects = Effects::default();
        if self.records.remove(peer_id).is_some() {
            debug!(peer_id, "peer departed, record reaped");
            self.reconcile(now_ms, &mut effects);
        }
        self.gate(effects)
    }

    /// Clear the suspension and build the one-shot reconciliation action.
    /// Returns the resume position when the seek can go out right away; when
    /// the group is still waiting it is parked until the wait releases.
    pub fn end_suspension(
        &mut self,
        resume_position: Option<f64>,
        now_ms: u64,
    ) -> (Effects, Option<f64>) {
        self.suspended = false;

        let mut effects = Effects::default();
        effects.actions.push(self.sync_local_action(now_ms));

        let resume_now = match resume_position {
            Some(target) if self.any_waiting() => {
                self.pending_resume_seek = Some(target);
                None
            }
            other => other,
        };
        (effects, resume_now)
    }

    /// One-shot reconciliation of the local player with the authoritative
    /// group state. Also used to re-align after a rejected seek.
    pub fn sync_local_action(&self, now_ms: u64) -> PlayerAction {
        let waiting = self.any_waiting();
        PlayerAction::SyncLocal {
            metadata: self.track.metadata().cloned(),
            position: self
                .group_target_position(now_ms)
                .or_else(|| self.records.get(&self.local_id).map(|r| r.project(now_ms)))
                .unwrap_or(0.0),
            playing: !waiting && self.group_playing(),
        }
    }

    // --- ingest handlers -------------------------------------------------

    fn apply_command(
        &mut self,
        kind: EventKind,
        cmd: CommandPayload,
        stamp: EventStamp,
        now_ms: u64,
    ) -> Effects {
        let mut effects = Effects::default();

        if !self.track.matches(Some(&cmd.track)) {
            debug!(kind = %kind, "dropping command for a stale track");
            return effects;
        }
        if self.suspended {
            debug!(kind = %kind, "suspended, ignoring transport command");
            return effects;
        }
        if let Some((last, _)) = &self.last_command {
            if !stamp.supersedes(last) {
                debug!(kind = %kind, "command lost arbitration, ignoring");
                return effects;
            }
        }
        self.last_command = Some((stamp.clone(), kind));

        if self.holding_locally() {
            // The player is parked at a wait point; commands keep their place
            // in the arbitration order but cannot move a held player.
            return effects;
        }

        let local_projection = self
            .records
            .get(&self.local_id)
            .map(|r| r.project(now_ms));
        let remote = stamp.sender_id != self.local_id;

        match kind {
            EventKind::Play => {
                if self.any_waiting() {
                    // A wait point holds the group; nobody plays until it
                    // releases. The own record must not claim playing either,
                    // or the release tally would count a player that never
                    // moved.
                    return effects;
                }
                self.set_own(
                    PlaybackState::Playing,
                    cmd.position,
                    self.own_rate(),
                    false,
                    None,
                    stamp.timestamp,
                );
                let behind = local_projection
                    .map(|p| cmd.position - p > self.config.max_playback_drift)
                    .unwrap_or(false);
                if remote && behind {
                    effects.actions.push(PlayerAction::Catchup {
                        position: cmd.position,
                    });
                    self.last_catchup_ms = Some(now_ms);
                } else {
                    effects.actions.push(PlayerAction::Play {
                        position: cmd.position,
                    });
                }
            }
            EventKind::Pause => {
                self.set_own(
                    PlaybackState::Paused,
                    cmd.position,
                    self.own_rate(),
                    false,
                    None,
                    stamp.timestamp,
                );
                effects.actions.push(PlayerAction::Pause {
                    position: cmd.position,
                });
            }
            EventKind::SeekTo => {
                let state = self
                    .records
                    .get(&self.local_id)
                    .map(|r| r.playback_state)
                    .unwrap_or(PlaybackState::Paused);
                self.set_own(
                    state,
                    cmd.position,
                    self.own_rate(),
                    false,
                    None,
                    stamp.timestamp,
                );
                effects.actions.push(PlayerAction::Seek {
                    position: cmd.position,
                });
            }
            _ => unreachable!("not a transport command"),
        }
        effects
    }

    fn apply_set_track(
        &mut self,
        payload: SetTrackPayload,
        stamp: EventStamp,
        now_ms: u64,
    ) -> Effects {
        let mut effects = Effects::default();
        let held_position = self.waiting_at.and_then(|idx| self.track.point(idx)).map(|p| p.position);

        match self
            .track
            .set_current(payload.metadata.clone(), payload.wait_points, stamp.clone())
        {
            TrackChange::Ignored => {}
            TrackChange::PointsReplaced => {
                // Indices may have shifted; re-anchor the local hold by
                // position, then see whether a freshly announced point sits
                // behind us.
                self.waiting_at =
                    held_position.and_then(|pos| self.track.point_at(pos)).map(|(idx, _)| idx);
                self.reconcile(now_ms, &mut effects);
            }
            TrackChange::TrackChanged => {
                // Track data belongs to the track; only data stamped after
                // this change survives it (it may simply have been delivered
                // ahead of us).
                let keep_data = self
                    .track_data_stamp
                    .as_ref()
                    .map(|ds| ds.supersedes(&stamp))
                    .unwrap_or(false);
                if !keep_data {
                    self.track_data = None;
                    self.track_data_stamp = None;
                }
                self.last_command = None;
                self.last_catchup_ms = None;
                self.last_follow_ms = None;
                self.waiting_at = None;
                self.pending_resume_seek = None;
                self.set_own(PlaybackState::Paused, 0.0, 1.0, false, None, stamp.timestamp);
                effects.actions.push(PlayerAction::LoadTrack {
                    metadata: payload.metadata,
                });
                effects.actions.push(PlayerAction::Pause { position: 0.0 });
            }
        }
        effects
    }

    fn apply_set_track_data(&mut self, payload: SetTrackDataPayload, stamp: EventStamp) -> Effects {
        let mut effects = Effects::default();
        if let Some(current) = &self.track_data_stamp {
            if !stamp.supersedes(current) {
                return effects;
            }
        }
        let changed = self.track_data != payload.data;
        self.track_data = payload.data.clone();
        self.track_data_stamp = Some(stamp);
        if changed {
            effects.actions.push(PlayerAction::TrackData {
                data: payload.data,
            });
        }
        effects
    }

    fn apply_position_update(
        &mut self,
        payload: PositionUpdatePayload,
        stamp: EventStamp,
        now_ms: u64,
    ) -> Effects {
        let mut effects = Effects::default();
        let sender = stamp.sender_id.clone();

        if sender == self.local_id {
            return effects;
        }

        if !self.track.matches(payload.track.as_ref()) {
            if !self.track.has_track() {
                if let Some(metadata) = payload.track.clone() {
                    // A coordinator without a track adopts the group's; this
                    // is how a newcomer learns what the session is playing.
                    // The provisional stamp defers to any explicit setTrack,
                    // whose wait points the update does not carry.
                    self.track.set_current(
                        Some(metadata.clone()),
                        Vec::new(),
                        EventStamp::new(0, stamp.sender_id.clone()),
                    );
                    self.set_own(PlaybackState::Paused, 0.0, 1.0, false, None, stamp.timestamp);
                    effects.actions.push(PlayerAction::LoadTrack {
                        metadata: Some(metadata),
                    });
                    effects.actions.push(PlayerAction::Pause { position: 0.0 });
                }
            } else {
                debug!(peer = %sender, "dropping position update for a foreign track");
                return effects;
            }
        }

        // Last writer wins; replaying an update is a no-op.
        if let Some(existing) = self.records.get(&sender) {
            if !stamp.supersedes(&existing.stamp(&sender)) {
                return effects;
            }
        }

        self.records.insert(
            sender,
            GroupPositionRecord {
                playback_state: payload.playback_state.wire(),
                track: payload.track.clone(),
                position: payload.position,
                timestamp: stamp.timestamp,
                waiting: payload.wait_point.is_some(),
                wait_point: payload.wait_point,
                playback_rate: payload.playback_rate,
            },
        );

        if let Some(data) = payload.track_data {
            let newer = self
                .track_data_stamp
                .as_ref()
                .map(|current| stamp.supersedes(current))
                .unwrap_or(true);
            if newer {
                if self.track_data.as_ref() != Some(&data) {
                    self.track_data = Some(data.clone());
                    effects.actions.push(PlayerAction::TrackData { data: Some(data) });
                }
                self.track_data_stamp = Some(stamp);
            }
        }

        self.reconcile(now_ms, &mut effects);
        effects
    }

    fn apply_joined(&mut self, now_ms: u64) -> Effects {
        // Answer with our current state so the newcomer can converge.
        let mut effects = Effects::default();
        effects
            .outbound
            .push(TransportEvent::PositionUpdate(self.position_update_payload(now_ms)));
        effects
    }

    // --- reconciliation --------------------------------------------------

    /// Recompute the authoritative group state: local wait-point crossing,
    /// wait release, majority playback state, drift correction.
    fn reconcile(&mut self, now_ms: u64, effects: &mut Effects) {
        self.check_local_hold(now_ms, effects);
        self.check_wait_release(now_ms, effects);

        if self.any_waiting() {
            return;
        }

        // Majority says play and we are not: fall in line.
        let local_playing = self
            .records
            .get(&self.local_id)
            .map(|r| r.playback_state.is_playing())
            .unwrap_or(false);

        if self.group_playing() && !local_playing && !self.suspended {
            // The own record is left to the ticker: it reflects what the
            // player actually did, not what we asked of it.
            if self.config.policy.can_play_pause && self.follow_due(now_ms) {
                if let Some(target) = self.group_target_position(now_ms) {
                    effects.actions.push(PlayerAction::Play { position: target });
                    self.last_follow_ms = Some(now_ms);
                }
            }
            return;
        }

        // Drift check against the median of the playing remotes.
        if local_playing {
            if let Some(target) = self.group_target_position(now_ms) {
                let local = self
                    .records
                    .get(&self.local_id)
                    .map(|r| r.project(now_ms))
                    .unwrap_or(0.0);
                if position::drift_exceeded(local, target, self.config.max_playback_drift)
                    && self.catchup_due(now_ms)
                {
                    effects.actions.push(PlayerAction::Catchup { position: target });
                    self.last_catchup_ms = Some(now_ms);
                    self.set_own(
                        PlaybackState::Playing,
                        target,
                        self.own_rate(),
                        false,
                        None,
                        now_ms,
                    );
                }
            }
        }
    }

    /// Hold the local player at the lowest unconsumed wait point it has
    /// reached, seeking back when it overshot.
    fn check_local_hold(&mut self, now_ms: u64, effects: &mut Effects) {
        let Some(own) = self.records.get(&self.local_id) else {
            return;
        };
        let at = own.project(now_ms);
        let Some((idx, wp)) = self.track.active_wait_point(at) else {
            return;
        };
        if self.waiting_at == Some(idx) {
            return;
        }
        self.waiting_at = Some(idx);
        effects.actions.push(PlayerAction::Pause {
            position: wp.position,
        });
        if at > wp.position + POSITION_EPS {
            effects.actions.push(PlayerAction::Seek {
                position: wp.position,
            });
        }
        self.set_own(PlaybackState::Paused, wp.position, self.own_rate(), true, Some(wp), now_ms);
    }

    /// Release the active wait point once everyone (or `max_clients`) has
    /// reached it, and resume from the held position.
    fn check_wait_release(&mut self, now_ms: u64, effects: &mut Effects) {
        let Some(idx) = self.active_hold() else {
            return;
        };
        let Some(wp) = self.track.point(idx) else {
            return;
        };

        let online = self.current_track_records().count();
        if online == 0 {
            return;
        }
        let reached = self
            .current_track_records()
            .filter(|(_, r)| r.project(now_ms) + POSITION_EPS >= wp.position)
            .count();
        let required = wp
            .max_clients
            .map(|m| (m as usize).min(online))
            .unwrap_or(online)
            .max(1);

        if reached < required {
            return;
        }

        debug!(position = wp.position, reached, required, "wait point released");
        self.track.consume(idx);
        if self.waiting_at == Some(idx) {
            self.waiting_at = None;
        }
        self.set_own(
            PlaybackState::Playing,
            wp.position,
            self.own_rate(),
            false,
            None,
            now_ms,
        );
        effects.actions.push(PlayerAction::Play {
            position: wp.position,
        });

        if let Some(target) = self.pending_resume_seek.take() {
            effects.actions.push(PlayerAction::Seek { position: target });
            if let Some(track) = self.track.metadata().cloned() {
                effects.outbound.push(TransportEvent::SeekTo(CommandPayload {
                    track,
                    position: target,
                }));
            }
        }
    }

    // --- helpers ---------------------------------------------------------

    fn gate(&self, mut effects: Effects) -> Effects {
        if self.suspended {
            effects.actions.clear();
        }
        effects
    }

    fn holding_locally(&self) -> bool {
        self.waiting_at
            .map(|idx| !self.track.is_consumed(idx))
            .unwrap_or(false)
    }

    /// Lowest-position unconsumed wait point that anyone is holding at.
    fn active_hold(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;

        if let Some(idx) = self.waiting_at {
            if !self.track.is_consumed(idx) {
                if let Some(p) = self.track.point(idx) {
                    best = Some((idx, p.position));
                }
            }
        }

        for (id, record) in self.records.iter() {
            if *id == self.local_id || !record.waiting {
                continue;
            }
            if !self.track.matches(record.track.as_ref()) {
                continue;
            }
            let Some(wp) = record.wait_point else {
                continue;
            };
            if let Some((idx, p)) = self.track.point_at(wp.position) {
                if best.map(|(_, pos)| p.position < pos).unwrap_or(true) {
                    best = Some((idx, p.position));
                }
            }
        }

        best.map(|(idx, _)| idx)
    }

    fn any_waiting(&self) -> bool {
        self.active_hold().is_some()
    }

    fn current_track_records(&self) -> impl Iterator<Item = (&String, &GroupPositionRecord)> {
        self.records
            .iter()
            .filter(|(_, r)| self.track.matches(r.track.as_ref()))
    }

    /// Majority vote over the live records, ties resolved by the most recent
    /// one. An explicit pause newer than every playing record overrides the
    /// vote so stale records cannot restart a freshly paused group.
    fn group_playing(&self) -> bool {
        let mut playing = 0usize;
        let mut others = 0usize;
        let mut latest: Option<(EventStamp, bool)> = None;
        let mut newest_playing: Option<EventStamp> = None;

        for (id, record) in self.current_track_records() {
            let stamp = record.stamp(id);
            let is_playing = record.playback_state.is_playing();
            if is_playing {
                playing += 1;
                if newest_playing
                    .as_ref()
                    .map(|s| stamp.supersedes(s))
                    .unwrap_or(true)
                {
                    newest_playing = Some(stamp.clone());
                }
            } else {
                others += 1;
            }
            if latest
                .as_ref()
                .map(|(s, _)| stamp.supersedes(s))
                .unwrap_or(true)
            {
                latest = Some((stamp, is_playing));
            }
        }

        let mut verdict = if playing == 0 {
            false
        } else if playing > others {
            true
        } else if playing < others {
            false
        } else {
            latest.map(|(_, is_playing)| is_playing).unwrap_or(false)
        };

        if verdict {
            if let (Some((cmd_stamp, EventKind::Pause)), Some(newest)) =
                (&self.last_command, &newest_playing)
            {
                if cmd_stamp.supersedes(newest) {
                    verdict = false;
                }
            }
        }
        verdict
    }

    /// Median of the playing remotes' projections, the position the group
    /// is at right now as far as we can tell.
    fn group_target_position(&self, now_ms: u64) -> Option<f64> {
        let samples: Vec<f64> = self
            .current_track_records()
            .filter(|(id, r)| **id != self.local_id && r.playback_state.is_playing())
            .map(|(_, r)| r.project(now_ms))
            .collect();
        position::median(samples)
    }

    fn catchup_due(&self, now_ms: u64) -> bool {
        let interval_ms = self.config.position_update_interval.as_millis() as u64;
        self.last_catchup_ms
            .map(|last| now_ms.saturating_sub(last) >= interval_ms)
            .unwrap_or(true)
    }

    fn follow_due(&self, now_ms: u64) -> bool {
        let interval_ms = self.config.position_update_interval.as_millis() as u64;
        self.last_follow_ms
            .map(|last| now_ms.saturating_sub(last) >= interval_ms)
            .unwrap_or(true)
    }

    fn own_rate(&self) -> f64 {
        self.records
            .get(&self.local_id)
            .map(|r| r.playback_rate)
            .unwrap_or(1.0)
    }

    fn set_own(
        &mut self,
        playback_state: PlaybackState,
        position: f64,
        playback_rate: f64,
        waiting: bool,
        wait_point: Option<WaitPoint>,
        timestamp: u64,
    ) {
        self.records.insert(
            self.local_id.clone(),
            GroupPositionRecord {
                playback_state,
                track: self.track.metadata().cloned(),
                position,
                timestamp,
                waiting,
                wait_point,
                playback_rate,
            },
        );
    }

    /// Build the outbound position update from the own record. Local-only
    /// states read as `paused` on the wire.
    pub fn position_update_payload(&self, now_ms: u64) -> PositionUpdatePayload {
        let own = self.records.get(&self.local_id);
        PositionUpdatePayload {
            playback_state: own
                .map(|r| r.playback_state.wire())
                .unwrap_or(PlaybackState::None),
            position: own.map(|r| r.project(now_ms)).unwrap_or(0.0),
            playback_rate: own.map(|r| r.playback_rate).unwrap_or(1.0),
            track_data: self.track_data.clone(),
            wait_point: own.and_then(|r| r.wait_point),
            track: self.track.metadata().cloned(),
        }
    }

    /// Wait-point list to rebroadcast when announcing a dynamic point.
    pub fn wait_points(&self) -> Vec<WaitPoint> {
        self.track.wait_points()
    }
}
