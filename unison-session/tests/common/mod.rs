#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};

use unison_core::clock::ReferenceClock;
use unison_core::events::{
    Envelope, PlaybackState, PlayerState, PositionState, TrackMetadata,
};
use unison_session::{
    MediaPlayer, PlayerAction, Session, SessionConfig, StaticRoles, TransportLink,
};

/// Test clock advanced explicitly, shared by every participant the way the
/// reference-clock service would be.
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(start_ms)))
    }

    pub fn set(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.0.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl ReferenceClock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Media element stand-in whose reported state the test scripts directly.
pub struct ScriptedPlayer {
    state: Mutex<PlayerState>,
}

impl ScriptedPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PlayerState::default()),
        })
    }

    pub fn set_state(&self, state: PlayerState) {
        *self.state.lock().unwrap() = state;
    }

    /// Convenience: report `playback_state` at `position` as of `timestamp`.
    pub fn report(
        &self,
        metadata: Option<TrackMetadata>,
        playback_state: PlaybackState,
        position: f64,
        timestamp: u64,
    ) {
        self.set_state(PlayerState {
            metadata,
            track_data: None,
            playback_state,
            position_state: Some(PositionState {
                position,
                playback_rate: 1.0,
                timestamp,
            }),
        });
    }
}

impl MediaPlayer for ScriptedPlayer {
    fn state(&self) -> PlayerState {
        self.state.lock().unwrap().clone()
    }
}

struct PeerEndpoints {
    inbound: mpsc::Sender<Envelope>,
    departures: mpsc::Sender<String>,
    // Kept so the session's watch receiver stays connected.
    _connection: watch::Sender<Option<String>>,
}

/// In-process broadcast transport: every envelope a peer sends is delivered
/// to all other connected peers, in order.
#[derive(Clone)]
pub struct LoopbackHub {
    peers: Arc<Mutex<HashMap<String, PeerEndpoints>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn connect(&self, id: &str) -> TransportLink {
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let (dep_tx, dep_rx) = mpsc::channel(64);
        let (conn_tx, conn_rx) = watch::channel(Some(id.to_string()));

        self.peers.lock().unwrap().insert(
            id.to_string(),
            PeerEndpoints {
                inbound: in_tx,
                departures: dep_tx,
                _connection: conn_tx,
            },
        );

        let peers = self.peers.clone();
        let sender_id = id.to_string();
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let targets: Vec<mpsc::Sender<Envelope>> = peers
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(peer_id, _)| **peer_id != sender_id)
                    .map(|(_, endpoints)| endpoints.inbound.clone())
                    .collect();
                for target in targets {
                    let _ = target.send(envelope.clone()).await;
                }
            }
        });

        TransportLink {
            outbound: out_tx,
            inbound: in_rx,
            connection: conn_rx,
            departures: dep_rx,
        }
    }

    /// Drop a peer and signal its departure to everyone still connected.
    pub fn disconnect(&self, id: &str) {
        let mut peers = self.peers.lock().unwrap();
        if peers.remove(id).is_none() {
            return;
        }
        for endpoints in peers.values() {
            let _ = endpoints.departures.try_send(id.to_string());
        }
    }
}

/// Build and initialize a session against the hub. The action receiver is
/// subscribed before initialization so nothing is missed.
pub async fn spawn_session(
    hub: &LoopbackHub,
    id: &str,
    player: Arc<ScriptedPlayer>,
    clock: Arc<ManualClock>,
    roles: Arc<StaticRoles>,
    config: SessionConfig,
) -> (Session, broadcast::Receiver<PlayerAction>) {
    let session = Session::new(player, clock, roles, config);
    let actions = session.actions();
    session.initialize(hub.connect(id)).await.unwrap();
    (session, actions)
}

/// Let the pumps drain their queues. Under paused time this returns as soon
/// as every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

/// Sleep past one position-update interval so every ticker fires.
pub async fn next_ticks() {
    tokio::time::sleep(Duration::from_millis(2_050)).await;
}

/// Drain everything currently buffered on an action receiver.
pub fn drain_actions(rx: &mut broadcast::Receiver<PlayerAction>) -> Vec<PlayerAction> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(action) => out.push(action),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

pub fn meta(id: &str) -> TrackMetadata {
    TrackMetadata::new(id)
}
