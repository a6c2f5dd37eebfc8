//! Endpoint and bridge configuration.
//!
//! Configuration is deliberately small: the only tunable on the endpoint
//! itself is the encoded message bound. The stream bridge additionally
//! needs a socket path, resolved from the environment.

use std::path::PathBuf;

/// Maximum message size (100MB), shared by the codec and the stream framing.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Environment variable overriding [`EndpointConfig::max_message_size`].
pub const MAX_MESSAGE_SIZE_ENV: &str = "INVOKE_MAX_MESSAGE_SIZE";

/// Environment variable overriding [`default_socket_path`].
pub const SOCKET_PATH_ENV: &str = "INVOKE_BRIDGE_SOCKET";

/// Per-endpoint settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Largest encoded message `send` will hand to the transport.
    pub max_message_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl EndpointConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Unparseable or zero values are ignored with a warning. Values above
    /// `MAX_MESSAGE_SIZE` are clamped to it, since the peer's framing would
    /// reject anything larger.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(MAX_MESSAGE_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > MAX_MESSAGE_SIZE => {
                    tracing::warn!(
                        "{}={} exceeds the framing limit, clamping to {} bytes",
                        MAX_MESSAGE_SIZE_ENV,
                        size,
                        MAX_MESSAGE_SIZE
                    );
                    config.max_message_size = MAX_MESSAGE_SIZE;
                }
                Ok(size) if size > 0 => config.max_message_size = size,
                _ => tracing::warn!(
                    "Ignoring invalid {}={:?}, using {} bytes",
                    MAX_MESSAGE_SIZE_ENV,
                    raw,
                    config.max_message_size
                ),
            }
        }

        config
    }

    /// Override the message bound.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

/// Resolve the default socket path for the stream bridge.
///
/// Resolution order:
/// 1. `$INVOKE_BRIDGE_SOCKET`
/// 2. `$XDG_RUNTIME_DIR/invoke-bridge.sock` (Linux standard)
/// 3. `~/Library/Caches/invoke-bridge.sock` (macOS)
/// 4. `/tmp/invoke-bridge.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(SOCKET_PATH_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("invoke-bridge.sock");
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join("invoke-bridge.sock");
    }

    PathBuf::from("/tmp/invoke-bridge.sock")
}
