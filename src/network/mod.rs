//! Network subsystem: WebSocket transport, control commands, link health

pub mod control;
pub mod health;
pub mod transport;

pub use control::{CommandSink, ControlChannel, ControlIntentTracker};
pub use health::{ConnectionHealthRegistry, ConnectionStatus, HealthSnapshot};
pub use transport::{
    LinkState, TransportChannel, TransportConfig, TransportEvent, TransportHandle,
};
