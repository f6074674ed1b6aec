//! Domain model module declarations.

pub mod payload;
pub mod process;
pub mod session;
