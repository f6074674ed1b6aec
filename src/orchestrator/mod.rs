//! Worker orchestration: the session manager, per-process state, and the
//! output markers that drive status changes.

pub mod manager;
pub mod markers;
pub(crate) mod process;
