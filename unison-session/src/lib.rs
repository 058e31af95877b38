pub mod channel;
pub mod config;
pub mod error;
pub mod group;
pub mod roles;
pub mod session;
pub mod suspension;
pub mod track;

pub use config::{ControlPolicy, SessionConfig};
pub use error::{ProtocolError, SessionError, TransportError};
pub use group::{GroupPositionRecord, GroupSnapshot, PlayerAction};
pub use roles::{RoleGate, RoleProvider, StaticRoles};
pub use session::{MediaPlayer, Session, TransportLink};
pub use suspension::Suspension;

// The shared protocol and clock types live in `unison_core`.
pub use unison_core as core;
