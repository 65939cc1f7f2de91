//! CLI commands

mod check;
mod handle;
mod presign;
mod serve;

pub use check::check_config;
pub use handle::{handle, EventSource};
pub use presign::presign;
pub use serve::serve;
