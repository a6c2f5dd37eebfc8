//! Transport seam between an endpoint and the physical bridge.
//!
//! The bridge itself is external: something that can move a raw string to
//! the other side and hand raw strings back. The two roles reach it
//! differently:
//!
//! - **Host** owns its side of the bridge from construction and pushes
//!   messages through [`HostBridge::send_to_peer`].
//! - **Embedded** only learns its peer when the bridge first calls the
//!   inbound [`BridgeHook`], passing a [`PeerHandle`] along with the raw
//!   message. Outbound messages go through [`EmbeddedBridge::send`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use anyhow::Result;
use tracing::{debug, info};

use crate::endpoint::InvokeEndpoint;
use crate::error::InvokeError;

/// Which side of the bridge an endpoint sits on. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Embedded,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Embedded => "embedded",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Send primitive available to the host role.
pub trait HostBridge {
    /// Hand a serialized message to the embedded side.
    fn send_to_peer(&self, raw: &str) -> Result<()>;
}

/// Send primitive exposed by the bridge object to the embedded role.
pub trait EmbeddedBridge {
    /// Hand a serialized message to the host side.
    fn send(&self, raw: &str) -> Result<()>;
}

impl<F> HostBridge for F
where
    F: Fn(&str) -> Result<()>,
{
    fn send_to_peer(&self, raw: &str) -> Result<()> {
        self(raw)
    }
}

impl<F> EmbeddedBridge for F
where
    F: Fn(&str) -> Result<()>,
{
    fn send(&self, raw: &str) -> Result<()> {
        self(raw)
    }
}

/// Peer reference the bridge passes to the embedded role during bootstrap.
pub type PeerHandle = Rc<dyn EmbeddedBridge>;

/// The endpoint's route to its peer, tagged by role.
#[derive(Clone)]
pub(crate) enum PeerLink {
    Host(Rc<dyn HostBridge>),
    Embedded(PeerHandle),
}

impl PeerLink {
    pub(crate) fn deliver(&self, raw: &str) -> Result<()> {
        match self {
            PeerLink::Host(bridge) => bridge.send_to_peer(raw),
            PeerLink::Embedded(bridge) => bridge.send(raw),
        }
    }
}

/// Inbound entry point the bridge calls on the embedded side.
///
/// One hook exists per bridge and accepts exactly one endpoint. The first
/// delivery that carries a peer handle connects that endpoint; every
/// delivery is forwarded to the endpoint's `listener`.
#[derive(Default)]
pub struct BridgeHook {
    endpoint: RefCell<Option<InvokeEndpoint>>,
}

impl BridgeHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `endpoint` to this hook.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError::HookAlreadyInstalled` if an endpoint is
    /// already attached; the existing one stays in place.
    pub(crate) fn install(&self, endpoint: InvokeEndpoint) -> Result<(), InvokeError> {
        let mut slot = self.endpoint.borrow_mut();
        if slot.is_some() {
            return Err(InvokeError::HookAlreadyInstalled);
        }
        *slot = Some(endpoint);
        info!("Installed inbound bridge hook");
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.endpoint.borrow().is_some()
    }

    /// Deliver one raw message from the bridge.
    ///
    /// Deliveries before any endpoint is installed are dropped. A peer handle
    /// is only taken while the endpoint is still disconnected; later handles
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Propagates `InvokeError::UnknownCommand` from the endpoint's listener.
    pub fn deliver(&self, raw: &str, peer: Option<PeerHandle>) -> Result<(), InvokeError> {
        let endpoint = self.endpoint.borrow().clone();
        let Some(endpoint) = endpoint else {
            debug!("Dropping inbound message: no endpoint installed");
            return Ok(());
        };

        if let Some(peer) = peer {
            if !endpoint.is_connected() {
                endpoint.attach_peer(peer);
            }
        }

        endpoint.listener(raw)
    }
}

impl fmt::Debug for BridgeHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeHook")
            .field("installed", &self.is_installed())
            .finish()
    }
}
