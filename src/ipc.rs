//! Stream bridge: carries raw invoke messages over a byte stream.
//!
//! The endpoint core is transport-agnostic. This module supplies one
//! concrete bridge for processes connected by a Unix socket (or any tokio
//! byte stream), which is also what the loopback binary and the integration
//! tests use.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        byte stream         ┌──────────────────────┐
//! │  host endpoint   │  ◄───────────────────────► │  embedded endpoint   │
//! │  (SocketBridge)  │  Content-Length framing    │  (BridgeHook + pump) │
//! └──────────────────┘                            └──────────────────────┘
//! ```
//!
//! # Protocol
//!
//! Each raw message is one frame, same framing as LSP:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"command":"ping","id":1,"data":[],"isReply":false}
//! ```

mod framing;
mod socket;

pub use framing::{read_message, write_message};
pub use socket::{connect_with_retry, peer_handle, pump, Inbound, SocketBridge};
