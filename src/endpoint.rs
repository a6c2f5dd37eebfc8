//! The invoke endpoint: define commands, call the peer's commands, and
//! process whatever the bridge delivers.
//!
//! # Dispatch
//!
//! ```text
//! raw ──► Message::decode ──┬─ invalid ─────────────► dropped
//!                           ├─ isReply ─► reply_key ─► ReplyRegistry::resolve
//!                           └─ call ────────────────► CommandRegistry::dispatch(.., Reply)
//! ```
//!
//! Everything runs synchronously on the thread that delivers inbound
//! messages. Handlers and completions may call back into the endpoint.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::error::InvokeError;
use crate::message::{CallId, Message};
use crate::registry::{reply_key, validate_command, CommandRegistry, Completion, ReplyRegistry};
use crate::transport::{BridgeHook, HostBridge, PeerHandle, PeerLink, Role};

/// Outcome of handing a message to the transport.
///
/// `send` never fails outward; this only reports what happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the bridge.
    Sent,
    /// No peer handle yet; the message was discarded.
    NotConnected,
    /// The message could not be encoded (or exceeded the size bound).
    EncodeFailed,
    /// The bridge rejected the message.
    TransportFailed,
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

struct EndpointInner {
    role: Role,
    config: EndpointConfig,
    peer: RefCell<Option<PeerLink>>,
    commands: CommandRegistry<Reply>,
    replies: ReplyRegistry,
}

/// One side of a bidirectional invoke channel.
///
/// Cloning is cheap and yields another handle to the same endpoint.
/// Endpoints are single-threaded (`!Send`).
#[derive(Clone)]
pub struct InvokeEndpoint {
    inner: Rc<EndpointInner>,
}

impl InvokeEndpoint {
    fn with_parts(role: Role, config: EndpointConfig, peer: Option<PeerLink>) -> Self {
        Self {
            inner: Rc::new(EndpointInner {
                role,
                config,
                peer: RefCell::new(peer),
                commands: CommandRegistry::new(),
                replies: ReplyRegistry::new(),
            }),
        }
    }

    /// Create a host endpoint. Hosts are connected from the start.
    pub fn host(bridge: Rc<dyn HostBridge>) -> Self {
        Self::host_with_config(bridge, EndpointConfig::default())
    }

    pub fn host_with_config(bridge: Rc<dyn HostBridge>, config: EndpointConfig) -> Self {
        Self::with_parts(Role::Host, config, Some(PeerLink::Host(bridge)))
    }

    /// Create an embedded endpoint and install it on `hook`.
    ///
    /// The endpoint starts disconnected and connects on the first delivery
    /// through `hook` that carries a peer handle.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError::HookAlreadyInstalled` if `hook` already serves
    /// another endpoint.
    pub fn embedded(hook: &BridgeHook) -> Result<Self, InvokeError> {
        Self::embedded_with_config(hook, EndpointConfig::default())
    }

    pub fn embedded_with_config(
        hook: &BridgeHook,
        config: EndpointConfig,
    ) -> Result<Self, InvokeError> {
        let endpoint = Self::with_parts(Role::Embedded, config, None);
        hook.install(endpoint.clone())?;
        Ok(endpoint)
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    /// Whether a peer is available for outbound messages.
    pub fn is_connected(&self) -> bool {
        self.inner.peer.borrow().is_some()
    }

    /// Capture the peer handle handed over during bootstrap.
    pub(crate) fn attach_peer(&self, peer: PeerHandle) {
        let mut slot = self.inner.peer.borrow_mut();
        if slot.is_none() {
            *slot = Some(PeerLink::Embedded(peer));
            info!(role = %self.inner.role, "Endpoint connected to peer");
        }
    }

    /// Number of calls sent by this endpoint still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.replies.len()
    }

    pub fn has_command(&self, command: &str) -> bool {
        self.inner.commands.contains(command)
    }

    /// Expose `command` to the peer.
    ///
    /// The handler receives the call arguments and a [`Reply`] used to
    /// answer. A later definition for the same name replaces this one.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError::InvalidCommand` if `command` is empty.
    ///
    /// # Example
    ///
    /// ```ignore
    /// endpoint.define("add", |args, reply| {
    ///     let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
    ///     reply.send(vec![json!(sum)]);
    /// })?;
    /// ```
    pub fn define<F>(&self, command: &str, handler: F) -> Result<(), InvokeError>
    where
        F: Fn(Vec<Value>, Reply) + 'static,
    {
        self.inner.commands.define(command, Rc::new(handler))
    }

    /// Obtain a proxy for the peer's `command`.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError::InvalidCommand` if `command` is empty. The
    /// check happens here, not when the proxy is called.
    pub fn bind(&self, command: &str) -> Result<Proxy, InvokeError> {
        validate_command(command)?;
        Ok(Proxy {
            endpoint: Rc::downgrade(&self.inner),
            command: command.to_string(),
        })
    }

    /// Like [`bind`](Self::bind), with completions running against `scope`.
    pub fn bind_scoped<S: 'static>(
        &self,
        command: &str,
        scope: Rc<S>,
    ) -> Result<ScopedProxy<S>, InvokeError> {
        Ok(self.bind(command)?.with_scope(scope))
    }

    /// Process one raw inbound message.
    ///
    /// Malformed messages and replies nobody is waiting for are dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError::UnknownCommand` when a call names a command
    /// with no handler. No reply is sent to the peer in that case.
    pub fn listener(&self, raw: &str) -> Result<(), InvokeError> {
        let message = match Message::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                debug!("Dropping malformed message: {}", err);
                return Ok(());
            }
        };

        if message.is_reply {
            let Some(key) = reply_key(&message.command, &message.id) else {
                debug!(command = %message.command, "Dropping reply without a usable id");
                return Ok(());
            };
            if !self.inner.replies.resolve(&key, message.data) {
                debug!(key = %key, "Dropping unroutable reply");
            }
            return Ok(());
        }

        let reply = Reply {
            endpoint: self.clone(),
            command: message.command.clone(),
            id: message.id,
        };
        let result = self
            .inner
            .commands
            .dispatch(&message.command, message.data, reply);
        if let Err(err) = &result {
            warn!("{}", err);
        }
        result
    }

    /// Encode `message` and hand it to the peer.
    ///
    /// Nothing is queued: without a peer the message is discarded.
    pub fn send(&self, message: &Message) -> Delivery {
        let raw = match message.encode_within(self.inner.config.max_message_size) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(command = %message.command, "Invoke send error: {}", err);
                return Delivery::EncodeFailed;
            }
        };

        // Clone the link out: the bridge may deliver synchronously and
        // re-enter this endpoint.
        let peer = self.inner.peer.borrow().clone();
        let Some(peer) = peer else {
            debug!(command = %message.command, "No peer connected, dropping message");
            return Delivery::NotConnected;
        };

        match peer.deliver(&raw) {
            Ok(()) => Delivery::Sent,
            Err(err) => {
                warn!(command = %message.command, "Bridge rejected message: {:#}", err);
                Delivery::TransportFailed
            }
        }
    }

    /// Send a call and register its completion.
    ///
    /// The completion is registered before the message goes out, so a bridge
    /// that answers synchronously still finds it. If the send fails the entry
    /// stays pending.
    fn call(&self, command: &str, args: Vec<Value>, completion: Completion) -> CallId {
        let message = Message::call(command, args);
        if let Some(key) = reply_key(command, &message.id) {
            self.inner.replies.register(key, completion);
        }
        self.send(&message);
        message.id
    }
}

impl fmt::Debug for InvokeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeEndpoint")
            .field("role", &self.inner.role)
            .field("connected", &self.is_connected())
            .field("pending_calls", &self.pending_calls())
            .field("commands", &self.inner.commands)
            .finish()
    }
}

/// Callable stand-in for one of the peer's commands.
///
/// Each call sends a fresh message with its own id. Calls made with
/// [`call_with`](Self::call_with) run the callback once, when the first
/// matching reply arrives; calls made with [`call`](Self::call) register a
/// no-op completion.
///
/// A proxy does not keep its endpoint alive, so a handler may capture a
/// proxy bound on its own endpoint without forming a cycle. Once the
/// endpoint is dropped, calls are discarded.
#[derive(Debug, Clone)]
pub struct Proxy {
    endpoint: Weak<EndpointInner>,
    command: String,
}

impl Proxy {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Call without waiting for results.
    pub fn call(&self, args: Vec<Value>) -> CallId {
        self.send_call(args, Completion::noop())
    }

    /// Call and run `on_reply` with the reply's results.
    pub fn call_with<F>(&self, args: Vec<Value>, on_reply: F) -> CallId
    where
        F: FnOnce(Vec<Value>) + 'static,
    {
        self.send_call(args, Completion::new(on_reply))
    }

    pub fn with_scope<S: 'static>(self, scope: Rc<S>) -> ScopedProxy<S> {
        ScopedProxy { proxy: self, scope }
    }

    fn send_call(&self, args: Vec<Value>, completion: Completion) -> CallId {
        match self.endpoint.upgrade() {
            Some(inner) => InvokeEndpoint { inner }.call(&self.command, args, completion),
            None => {
                debug!(command = %self.command, "Endpoint dropped, discarding call");
                CallId::next()
            }
        }
    }
}

/// A [`Proxy`] whose completions receive a bound scope.
pub struct ScopedProxy<S> {
    proxy: Proxy,
    scope: Rc<S>,
}

impl<S: 'static> ScopedProxy<S> {
    pub fn command(&self) -> &str {
        self.proxy.command()
    }

    pub fn scope(&self) -> &Rc<S> {
        &self.scope
    }

    pub fn call(&self, args: Vec<Value>) -> CallId {
        self.proxy.call(args)
    }

    pub fn call_with<F>(&self, args: Vec<Value>, on_reply: F) -> CallId
    where
        F: FnOnce(&S, Vec<Value>) + 'static,
    {
        self.proxy
            .send_call(args, Completion::scoped(self.scope.clone(), on_reply))
    }
}

/// Continuation handed to a command handler to answer its caller.
///
/// Consumed by [`send`](Self::send), so each call is answered at most once.
/// Dropping it unanswered leaves the caller's entry pending.
#[derive(Debug)]
pub struct Reply {
    endpoint: InvokeEndpoint,
    command: String,
    id: CallId,
}

impl Reply {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    /// Send `results` back, echoing the call's command and id.
    pub fn send(self, results: Vec<Value>) -> Delivery {
        let message = Message::reply(self.command, self.id, results);
        self.endpoint.send(&message)
    }
}
