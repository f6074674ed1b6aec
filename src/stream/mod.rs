//! Worker stdio plumbing: line framing, process launch, and the per-worker
//! drain and writer tasks.

pub mod codec;
pub mod reader;
pub mod spawner;
pub mod writer;
