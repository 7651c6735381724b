pub mod client;
pub(crate) mod events;
pub mod listener;
pub mod message;
pub mod registry;
pub mod router;
pub mod session;

pub use client::{ClientError, RelayConnection};
pub use listener::{serve, start_listener};
pub use message::{Command, CommandReply, ControlReply, Envelope, PairingCode};
pub use registry::{ConnHandle, LinkError, PairingRegistry, Resolution};
pub use router::RelayRouter;
pub use session::{SessionContext, SessionState};
