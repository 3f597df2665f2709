//! Retry timing for failed starts.
//!
//! - [`BackoffPolicy`] how the delay grows with consecutive failures (first / factor / max)
//! - [`JitterPolicy`]  how the delay is randomized to spread retries apart
//!
//! ```text
//! EngineConfig { backoff: BackoffPolicy, .. }
//!      └─► core::registry on a failed start:
//!           failures += 1; sleep(backoff.delay(failures - 1)); start again
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
