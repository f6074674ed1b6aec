//! Discovery of recorded sessions and already-running worker processes.
//!
//! Nothing in this module spawns or controls processes; see
//! [`orchestrator`](crate::orchestrator) for that.

pub mod mapper;
pub mod process_detector;
pub mod session_detector;
pub mod session_log;
