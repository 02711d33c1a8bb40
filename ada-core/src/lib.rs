//! Shared building blocks for the ada machine portal.
//!
//! Everything here is backend-agnostic: bounded polling, CLI invocation,
//! share tokens, machine naming and input validation.

pub mod command;
pub mod dns;
pub mod error;
pub mod naming;
pub mod poll;
pub mod token;
pub mod validation;

pub use error::{CoreError, Result};
pub use poll::{poll_until, Clock, ManualClock, PollPolicy, PollTimeout, TokioClock};
