//! invoke-loopback - exercise both roles of the invoke bridge in one process.
//!
//! Binds the bridge socket, connects a host endpoint and an embedded endpoint
//! through it, and runs a short exchange:
//!
//! 1. The host calls the view's `hello`, which also hands the view its peer.
//! 2. The view answers, then calls the host's `add` with `[2, 3]`.
//! 3. The host answers `[5]` and the loopback exits.
//!
//! Set `RUST_LOG=invoke_bridge=debug` to see every message decision.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invoke_bridge::ipc::{connect_with_retry, peer_handle, pump, Inbound, SocketBridge};
use invoke_bridge::{default_socket_path, BridgeHook, EndpointConfig, InvokeEndpoint};

/// How long the loopback waits for the round trip before giving up.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "invoke_bridge=info,invoke_loopback=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("Starting invoke-loopback v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    let socket_path = default_socket_path();
    let result = LocalSet::new().block_on(&runtime, run(&socket_path));
    let _ = std::fs::remove_file(&socket_path);

    let results = result?;
    println!("add(2, 3) -> {}", Value::Array(results));
    Ok(())
}

async fn run(socket_path: &Path) -> Result<Vec<Value>> {
    // A stale socket file from an earlier run would make bind fail.
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    info!("Bridge socket at {}", socket_path.display());

    let host_task = tokio::task::spawn_local(run_host(listener));

    let stream = connect_with_retry(socket_path, 5).await?;
    let (read_half, write_half) = stream.into_split();
    let (bridge, _writer) = SocketBridge::spawn(write_half);

    let hook = BridgeHook::new();
    let view = InvokeEndpoint::embedded_with_config(&hook, EndpointConfig::from_env())?;

    let (done_tx, done_rx) = oneshot::channel();
    let done_tx = RefCell::new(Some(done_tx));
    let add = view.bind("add")?;
    view.define("hello", move |args, reply| {
        let name = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("stranger")
            .to_string();
        reply.send(vec![json!(format!("hello, {}", name))]);

        if let Some(done) = done_tx.borrow_mut().take() {
            add.call_with(vec![json!(2), json!(3)], move |results| {
                let _ = done.send(results);
            });
        }
    })?;

    let peer = peer_handle(&bridge);
    let view_task = tokio::task::spawn_local(async move {
        let mut reader = BufReader::new(read_half);
        pump(&mut reader, Inbound::Hook { hook: &hook, peer }).await
    });

    let results = tokio::time::timeout(EXCHANGE_TIMEOUT, done_rx)
        .await
        .map_err(|_| anyhow!("No reply within {:?}", EXCHANGE_TIMEOUT))?
        .context("View dropped the pending call")?;

    info!(pending = view.pending_calls(), "Round trip complete");
    host_task.abort();
    view_task.abort();
    Ok(results)
}

async fn run_host(listener: UnixListener) -> Result<usize> {
    let (stream, _) = listener.accept().await.context("Accept failed")?;
    let (read_half, write_half) = stream.into_split();
    let (bridge, _writer) = SocketBridge::spawn(write_half);

    let host = InvokeEndpoint::host_with_config(Rc::new(bridge), EndpointConfig::from_env());
    host.define("add", |args, reply| {
        let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
        reply.send(vec![json!(sum)]);
    })?;

    host.bind("hello")?.call_with(vec![json!("host")], |results| {
        info!("View answered hello: {:?}", results);
    });

    let mut reader = BufReader::new(read_half);
    pump(&mut reader, Inbound::Endpoint(&host)).await
}
