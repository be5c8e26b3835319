//! pagewatch: observe a live browser page over the DevTools protocol.
//!
//! - [`connect`]: discover, launch, diagnose and remediate the browser connection
//! - [`session`]: tab listing and switching, shutdown
//! - [`capture`]: turn page events into ordered, correlated log entries
//! - [`buffer`]: in-memory buffers, live sink and dumps
//! - [`control`]: keyboard and socket commands
//! - [`monitor`]: the session loop tying them together

pub mod app;
pub mod buffer;
pub mod capture;
pub mod cli;
pub mod config;
pub mod connect;
pub mod control;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod platform;
pub mod session;

pub use error::{Result, WatchError};
