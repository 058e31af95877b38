use std::collections::HashSet;
use std::time::Duration;

use crate::error::SessionError;

/// Advisory capability flags for the local participant. These mirror what a
/// UI should offer; the authoritative check is the role gate on the wire.
#[derive(Debug, Clone)]
pub struct ControlPolicy {
    pub can_play_pause: bool,
    pub can_seek: bool,
    pub can_set_track: bool,
    pub can_set_track_data: bool,
}

impl Default for ControlPolicy {
    fn default() -> Self {
        Self {
            can_play_pause: true,
            can_seek: true,
            can_set_track: true,
            can_set_track_data: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest tolerated gap, in seconds, between the local position and the
    /// group projection before a catchup is issued.
    pub max_playback_drift: f64,
    /// How often the local position is sampled and broadcast while a track
    /// is loaded.
    pub position_update_interval: Duration,
    /// Senders of transport commands must hold one of these roles. Empty
    /// means unrestricted.
    pub allowed_transport_roles: HashSet<String>,
    pub policy: ControlPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_playback_drift: 1.0,
            position_update_interval: Duration::from_secs(2),
            allowed_transport_roles: HashSet::new(),
            policy: ControlPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if !(self.max_playback_drift > 0.0) {
            return Err(SessionError::InvalidConfig {
                reason: "max_playback_drift must be greater than zero",
            });
        }
        if self.position_update_interval.is_zero() {
            return Err(SessionError::InvalidConfig {
                reason: "position_update_interval must be greater than zero",
            });
        }
        Ok(())
    }
}
