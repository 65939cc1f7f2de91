//! Alarmcast upload handling
//!
//! `UploadHandler` turns one storage-finalization event into one device
//! notification. `NotifierServer` exposes it to HTTP storage triggers.

pub mod handler;
pub mod metrics;
pub mod server;

pub use handler::{HandleOutcome, UploadHandler};
pub use server::{AppState, NotifierServer};
