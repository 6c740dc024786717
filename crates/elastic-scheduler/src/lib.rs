//! Periodic trigger and CLI for the elastic scaling engine.
//!
//! The scheduler loads a [`config::SchedulerConfig`], rebuilds the engine's
//! repository and device inventory from JSON files under the state directory,
//! runs one evaluation pass per tick and writes the repository back.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]

pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod runner;
pub mod state;

pub use config::{LogFormat, SchedulerConfig};
pub use error::{Result, SchedulerError};
pub use runner::{Scheduler, SchedulerEngine};
pub use state::StateFiles;
