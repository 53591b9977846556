//! Synchronization engine: device registry, poll/publish cycle and inbound
//! command routing.

#[allow(clippy::module_inception)]
mod engine;
mod registry;

pub use engine::{Engine, Phase, SetupError};
pub use registry::{device_id_from_mac, Device, Poll, PollError, Registry};
