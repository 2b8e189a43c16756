//! Runtime pieces shared by the drivers.
//!
//! - `ExecutableRunner` - stages and runs executable migrations
//! - `scripts` - server-side Lua used by the Redis backend

pub mod runner;
pub mod scripts;

pub use runner::ExecutableRunner;
