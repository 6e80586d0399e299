pub mod browser;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod registry;
pub mod scheduler;
pub mod sweep;

pub use error::{Result, TripwireError};
