//! Live-reload watch engine.
//!
//! Converts a noisy stream of filesystem events into best-effort reload
//! pulses for connected browser tabs.
//!
//! # Architecture
//!
//! ```text
//! ReloadManager
//!   - project id -> ProjectWatchState under one lock
//!   - one watch loop task per enabled project
//!         |
//!   notify events -> ignore filter -> debounce -> broadcast
//!         |
//!   one channel per subscribed tab, drained by the /events endpoint
//! ```
//!
//! Delivery is lossy by design: a subscriber over capacity loses a pulse,
//! never stalls the broadcaster.

mod error;
mod events;
mod ignore;
mod manager;

pub use error::WatchError;
pub use events::ChangeKind;
pub use ignore::is_ignored_path;
pub use manager::{ReloadManager, Subscription};
