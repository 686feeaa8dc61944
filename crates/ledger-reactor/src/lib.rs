//! # Ledger Reactor
//!
//! The cooperative scheduling primitives shared by every state machine in
//! this core: the periodic action gate (C7), the reactor poll loop (C8),
//! and the injectable [`Clock`] both the reactor's timers and the
//! consensus contract's deadlines are built on.

#![warn(missing_docs)]

mod clock;
mod periodic;
mod reactor;

pub use clock::{Clock, ManualClock, SystemClock};
pub use periodic::PeriodicAction;
pub use reactor::{Reactor, Runnable};
