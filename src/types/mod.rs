mod protocol;

pub use protocol::{Phase, Protocol};

/// Connection identifier, unique per engine.
pub type ConnectionId = uuid::Uuid;
