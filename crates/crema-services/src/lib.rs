//! crema-services: the moving parts behind the daemon.
//!
//! `notifier` fans cache changes out to subscribers, `probe` decides whether
//! an advertised address answers, and `cache` is the actor tying both to the
//! set of live games.

pub mod cache;
pub mod netpuncher;
pub mod notifier;
pub mod probe;

pub use cache::{CacheEntry, CacheUpdate, SessionCache, Snapshot};
pub use notifier::{Notifier, Subscription, NOTIFIER_BUF_SIZE};
pub use probe::{ConnectStatus, Probe, ProbeError, Prober};
