//! Discrete-event scheduling kernel for the Girder simulation.
//!
//! [`Kernel`] owns the simulated clock and a priority queue of pending
//! wakeups. It is generic over the wake token `T`: the kernel never
//! calls into simulation code, it hands tokens back from
//! [`Kernel::advance`] and the caller drives whatever the token names.
//! This keeps the event layer free of callbacks and borrow entanglement
//! with the domain state.
//!
//! # Determinism
//!
//! Queue order is total: entries sort by (time, urgency class, insertion
//! sequence). Two wakeups at the same instant and class fire in the
//! order they were scheduled, on every run.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod event;
pub mod kernel;

pub use event::{EventId, Outcome};
pub use kernel::{Fired, Kernel, KernelError, Wakeup};
