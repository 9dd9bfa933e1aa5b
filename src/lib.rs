//! Client for the Kärcher Home Robots cloud: signed REST calls, the MQTT property channel and map decoding.

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;

pub use config::ClientConfig;
pub use error::{KarcherError, Result};
pub use infra::KarcherHome;
