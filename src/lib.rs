pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod queue;

#[cfg(test)]
mod integration_tests;

pub use error::*;
pub use models::*;
