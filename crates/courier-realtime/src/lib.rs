//! Real-time topic broadcast for Courier.
//!
//! Live connections are tracked by the [`ConnectionRegistry`], which owns
//! both the connection set and the topic index. The [`Broadcaster`] fans
//! envelopes out to a topic's subscribers, and the [`NotificationBridge`]
//! turns job lifecycle events into broadcasts.

pub mod bridge;
pub mod dispatch;
pub mod heartbeat;
pub mod message;
pub mod registry;
pub mod session;

pub use bridge::NotificationBridge;
pub use dispatch::Broadcaster;
pub use heartbeat::start_heartbeat;
pub use message::{ClientCommand, Envelope, EnvelopeKind};
pub use registry::{ConnectionRegistry, Frame, RegistryStats};
pub use session::Session;
