//! The single-threaded event loop and its collaborators.
//!
//! ## Cycle
//!
//! 1. **Wait** - `poll(2)` on the listener and every open connection, bounded
//!    by the remaining idle budget
//! 2. **Accept** - a ready listener yields one client, upgraded immediately
//! 3. **Service** - each ready connection is read and decoded once
//! 4. **Idle** - an exhausted budget notifies every open connection and refills
//!
//! Notifications are queued in the [`Registry`] and delivered to the
//! [`Handler`] between steps.

mod event_loop;
mod handler;
mod idle;
mod registry;
mod signal;

pub use event_loop::{EventLoop, LoopState};
pub use handler::Handler;
pub use idle::IdleBudget;
pub use registry::{Registry, SocketEntry};
pub use signal::ShutdownHandle;
