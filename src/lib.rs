//! Invoke Bridge Library
//!
//! Bidirectional command invocation between two peers that share nothing but
//! an opaque string bridge (for example a host application and an embedded
//! web view). Each side can define commands the other may call, and call
//! commands the other side defined, with replies correlated by id.
//!
//! - `message` - Wire message record and JSON codec
//! - `registry` - Reply key derivation, pending-reply and command registries
//! - `transport` - Host/embedded send primitives and the bootstrap hook
//! - `endpoint` - The `InvokeEndpoint` façade: `define`, `bind`, `listener`
//! - `ipc` - Content-Length framed stream bridge on tokio
//! - `config` - Endpoint settings and socket path resolution
//!
//! # Example
//!
//! ```ignore
//! use invoke_bridge::{BridgeHook, InvokeEndpoint};
//! use serde_json::json;
//!
//! let host = InvokeEndpoint::host(bridge);
//! host.define("add", |args, reply| {
//!     let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
//!     reply.send(vec![json!(sum)]);
//! })?;
//!
//! let hook = BridgeHook::new();
//! let view = InvokeEndpoint::embedded(&hook)?;
//! view.bind("add")?.call_with(vec![json!(2), json!(3)], |results| {
//!     assert_eq!(results, vec![json!(5)]);
//! });
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod ipc;
pub mod message;
pub mod registry;
pub mod transport;

pub use config::{default_socket_path, EndpointConfig};
pub use endpoint::{Delivery, InvokeEndpoint, Proxy, Reply, ScopedProxy};
pub use error::{CodecError, InvokeError};
pub use message::{CallId, Message};
pub use registry::reply_key;
pub use transport::{BridgeHook, EmbeddedBridge, HostBridge, PeerHandle, Role};
