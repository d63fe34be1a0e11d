//! Waiting on audio threads from async code.

use tokio::runtime::{Handle, RuntimeFlavor};

/// Run `f`, which blocks until an audio thread answers.
///
/// On a multi-threaded runtime the worker hands its other tasks off first
/// through [`tokio::task::block_in_place`], so a slow device open does not
/// stall them. Anywhere else `f` runs in place.
#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
pub(crate) fn wait_for<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
