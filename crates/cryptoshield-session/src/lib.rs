//! Session wiring: discover the authorized drive, open its store, keep it
//! monitored, and announce liveness to the local companion service.

pub mod controller;
pub mod heartbeat;

pub use controller::{Discovery, Session, SessionController, SessionSettings};
pub use heartbeat::{
    Heartbeat, HeartbeatHandle, HeartbeatSettings, DEFAULT_HEARTBEAT_URL, MIN_HEARTBEAT_INTERVAL,
};
