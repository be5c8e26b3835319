//! Control-channel runtime for pagewatch.
//!
//! - **Transport**: DevTools WebSocket, or an in-memory pair for tests
//! - **Connection**: command id correlation and session-scoped event fan-out
//! - **ControlChannel**: browser-level operations (targets, attach, close)
//! - **PageHandle**: operations on one attached tab
//!
//! ```text
//! ControlChannel ──owns──▶ Connection ──▶ transport tasks
//!       │                      ▲
//!       └─attach─▶ PageHandle ─┘ (weak)
//! ```

pub mod channel;
pub mod connection;
pub mod error;
pub mod events;
pub mod page;
pub mod transport;

pub use channel::ControlChannel;
pub use connection::{Connection, DEFAULT_COMMAND_TIMEOUT};
pub use error::{Error, Result};
pub use events::{EventFilter, EventStream};
pub use page::PageHandle;
pub use transport::{MemoryPeer, TransportParts, connect_websocket, memory_pair};
