//! Tellar - story characters that meet on the local network
//!
//! A node advertises itself over UDP broadcast, discovers other nodes, serves
//! its character over a WebSocket conversation channel and can start talking
//! to the first other character it finds.

pub mod agent;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod initiator;
pub mod logging;
pub mod net;
pub mod protocol;
pub mod server;

pub use error::{Error, Result};
