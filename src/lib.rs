//! `deckrun`: run liquid-handling protocols against a simulated deck.
//!
//! - [`config`]: layered TOML and environment configuration
//! - [`logging`]: tracing subscriber setup
//! - [`runner`]: protocol documents and the run driver

pub mod config;
pub mod logging;
pub mod runner;

pub use config::DeckrunConfig;
pub use runner::{run_protocol, Protocol};
