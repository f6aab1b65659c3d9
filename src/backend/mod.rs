//! Connection to the single backend processing service

pub mod link;

pub use link::{BackendLink, LinkState, DEFAULT_RECONNECT_DELAY};

use crate::error::Result;
use crate::protocol::BackendMessage;

/// Anything that can carry a command to the backend.
///
/// [`BackendLink`] is the production implementation; the router only
/// depends on this seam.
pub trait BackendSender: Send + Sync {
    /// Transmit immediately or fail with `BackendUnavailable`.
    fn send(&self, message: &BackendMessage) -> Result<()>;
}
