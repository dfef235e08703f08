//! Per-attempt transport sessions
//!
//! A proxy cannot be swapped inside a live browser context or connection, so
//! flows like login open a fresh session bound to each attempt's proxy and
//! release it before the next attempt.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ProxyEndpoint;

/// Opens and releases transport sessions bound to one proxy
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Handle to an open session. Cloning must not open a second session.
    type Session: Clone + Send + Sync;

    /// Open a session routed through `proxy` (`None` means a direct connection)
    async fn open(&self, proxy: Option<&ProxyEndpoint>) -> Result<Self::Session>;

    /// Release a session. Must not fail; errors are logged by the implementation.
    async fn close(&self, session: Self::Session);
}
