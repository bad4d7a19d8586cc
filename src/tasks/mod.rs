//! Background Tasks Module
//!
//! Contains the tasks that run alongside the server.
//!
//! # Tasks
//! - Refresh scheduler: polls targets at a fixed interval and owns the
//!   subscriptions wired at startup

mod scheduler;

pub use scheduler::{RefreshTarget, Scheduler};
