//! Core types for Alarmcast

mod event;
mod payload;
mod presigned;

pub use event::*;
pub use payload::*;
pub use presigned::*;
