//! Palazzetti connection box: HTTP command transport and status normalization.

mod fetch;
mod state;
pub mod status;
mod transport;

#[cfg(test)]
pub use fetch::MockHttpFetch;
pub use fetch::{HttpFetch, HttpResponse, ReqwestFetch, TransportError};
pub use state::{Mode, StateError, StoveState};
pub use transport::{command_url, Transport};
