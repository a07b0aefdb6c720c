//! Cooperative task runtime for tidelog
//!
//! This crate runs actors on a small worker pool:
//! - ActorScheduler: worker threads and the shared run queue
//! - Actor / ActorControl: single-threaded units of work and their handles
//! - ActorState / CompletionSignal: lifecycle and close/start signals
//! - ActorClock: the scheduler clock, visible only inside a turn
//!
//! Turns of one actor never overlap and are never preempted. Foreign threads
//! (storage callbacks, producers) reach an actor only through its
//! [`ActorControl`], which enqueues work for the actor's next turn.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actor;
pub mod clock;
pub mod lifecycle;
pub mod scheduler;

pub use actor::{Actor, ActorContext, ActorControl};
pub use clock::ActorClock;
pub use lifecycle::{ActorState, CompletionSignal};
pub use scheduler::{ActorScheduler, SchedulerConfig, SchedulerStats};
