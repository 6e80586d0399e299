//! Command implementations for the tripwire CLI

mod engine;
mod logs;
mod misc;
mod notify;
mod rule;
mod target;

pub use engine::*;
pub use logs::*;
pub use misc::*;
pub use notify::*;
pub use rule::*;
pub use target::*;
