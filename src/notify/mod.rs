//! Change notification and shutdown.
//!
//! [`ChangeWatcher`] keeps one-shot watches armed on the three layer paths
//! and turns fired watches, session re-establishment and an idle timer into
//! reconcile passes on the [`ApplyCoordinator`](crate::core::ApplyCoordinator).
//! [`shutdown_signal`] installs the process signal handlers that end the loop.

mod shutdown;
mod watcher;

pub use shutdown::shutdown_signal;
pub use watcher::{ChangeWatcher, Trigger};
