//! daxpanel-test-harness: Test doubles for daxpanel.
//!
//! - [`MockRadioSession`] -- scripted [`RadioSession`](daxpanel_core::RadioSession)
//!   that records every request and release, can fail or hold requests
//! - [`MockEndpointFactory`] -- records binds, live updates and stops
//! - [`MemorySettingsStore`] -- in-memory [`SettingsStore`](daxpanel_core::SettingsStore)
//! - [`MockSmartSdrServer`] -- a TCP server speaking enough SmartSDR to test
//!   the session client

pub mod mock_endpoint;
pub mod mock_session;
pub mod mock_settings;
pub mod mock_smartsdr;

pub use mock_endpoint::{EndpointLog, MockEndpointFactory};
pub use mock_session::MockRadioSession;
pub use mock_settings::MemorySettingsStore;
pub use mock_smartsdr::MockSmartSdrServer;

use std::time::Duration;

/// Default time the `wait_for_*` helpers poll before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns whether the condition was met.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
