pub mod clock;
pub mod events;
pub mod order;
pub mod position;

pub use events::ProtocolError;
