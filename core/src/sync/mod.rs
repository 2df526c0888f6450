//! Coalesced, throttled propagation of profile changes to the remote store.

pub mod coalescer;
pub mod remote;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use coalescer::{SyncCoalescer, SyncConfig, SyncEvent, SyncPhase};
pub use remote::{ErrorClass, ErrorCode, RemoteError, RemoteStore};
pub use writer::{RemoteWriter, RetryPolicy, WriteOutcome};
