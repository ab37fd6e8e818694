//! Client configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial
//! file (or none at all) is fine.
//!
//! ```toml
//! [connection]
//! socket_path = ""            # empty: resolve from the environment
//! client_name = "pwire"
//! request_timeout_ms = 5000
//!
//! [limits]
//! max_frame_size = 262144
//!
//! [dispatch]
//! workers = 1
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::{DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::PwError;
use crate::frame::HEADER_SIZE;

/// Socket name used when `PIPEWIRE_REMOTE` is unset.
pub const DEFAULT_SOCKET_NAME: &str = "pipewire-0";

/// Directory used when no runtime directory is known.
pub const FALLBACK_RUNTIME_DIR: &str = "/run";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub limits: LimitsConfig,
    pub dispatch: DispatchConfig,
}

/// Socket location, identity and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Explicit socket path. Empty means resolve from the environment.
    pub socket_path: String,
    /// Name announced in the hello request.
    pub client_name: String,
    /// Deadline for an ordinary request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Deadline for each handshake step, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Upper bound of one blocking socket read, in milliseconds.
    pub read_timeout_ms: u64,
}

/// Buffer and frame caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Cap on buffered, unparsed inbound bytes.
    pub max_buffer_size: usize,
    /// Cap on a single frame, inbound and outbound.
    pub max_frame_size: usize,
}

/// Handler fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Events that may wait for a worker.
    pub queue_capacity: usize,
    /// Number of worker tasks. One worker keeps events in arrival order.
    pub workers: usize,
    /// How long the reader waits for queue space before dropping an event.
    pub send_timeout_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            limits: LimitsConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            socket_path: String::new(),
            client_name: "pwire".into(),
            request_timeout_ms: 5000,
            handshake_timeout_ms: 5000,
            read_timeout_ms: 250,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            workers: 1,
            send_timeout_ms: 100,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Parse and validate; unlike [`load`](Self::load) this never falls back.
    pub fn from_toml_str(text: &str) -> Result<Self, PwError> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<(), PwError> {
        let text = toml::to_string_pretty(&Self::default())
            .map_err(|e| PwError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), PwError> {
        let min_frame = HEADER_SIZE;
        if self.limits.max_frame_size < min_frame {
            return Err(PwError::Config(format!(
                "limits.max_frame_size must be at least {min_frame}"
            )));
        }
        if self.limits.max_buffer_size < self.limits.max_frame_size + LENGTH_PREFIX_SIZE {
            return Err(PwError::Config(
                "limits.max_buffer_size must hold one maximal frame".into(),
            ));
        }
        if self.dispatch.workers == 0 {
            return Err(PwError::Config("dispatch.workers must be at least 1".into()));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(PwError::Config(
                "dispatch.queue_capacity must be at least 1".into(),
            ));
        }
        for (name, ms) in [
            ("request_timeout_ms", self.connection.request_timeout_ms),
            ("handshake_timeout_ms", self.connection.handshake_timeout_ms),
            ("read_timeout_ms", self.connection.read_timeout_ms),
        ] {
            if ms == 0 {
                return Err(PwError::Config(format!("connection.{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Use an explicit socket path.
    pub fn with_socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.connection.socket_path = path.as_ref().display().to_string();
        self
    }

    /// The socket to connect to: the configured path, else the
    /// environment (see [`resolve_socket_path`]).
    pub fn socket_path(&self) -> PathBuf {
        if self.connection.socket_path.is_empty() {
            resolve_socket_path(|key| std::env::var(key).ok())
        } else {
            PathBuf::from(&self.connection.socket_path)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.handshake_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.read_timeout_ms)
    }

    pub fn dispatch_send_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.send_timeout_ms)
    }
}

/// Locate the server socket from environment lookups.
///
/// Directory: `PIPEWIRE_RUNTIME_DIR`, else `XDG_RUNTIME_DIR`, else
/// `/run`. Name: `PIPEWIRE_REMOTE`, else `pipewire-0`. An absolute
/// `PIPEWIRE_REMOTE` is used as is.
pub fn resolve_socket_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    let non_empty = |key: &str| env(key).filter(|v| !v.is_empty());

    let name = non_empty("PIPEWIRE_REMOTE").unwrap_or_else(|| DEFAULT_SOCKET_NAME.into());
    if Path::new(&name).is_absolute() {
        return PathBuf::from(name);
    }
    let dir = non_empty("PIPEWIRE_RUNTIME_DIR")
        .or_else(|| non_empty("XDG_RUNTIME_DIR"))
        .unwrap_or_else(|| FALLBACK_RUNTIME_DIR.into());
    PathBuf::from(dir).join(name)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid_and_serializes() {
        let cfg = ClientConfig::default();
        cfg.validate().unwrap();
        // events reach handlers in arrival order unless asked otherwise
        assert_eq!(cfg.dispatch.workers, 1);
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("request_timeout_ms"));
        assert_eq!(ClientConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = ClientConfig::from_toml_str(
            r#"
            [connection]
            client_name = "mixer"

            [dispatch]
            workers = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.connection.client_name, "mixer");
        assert_eq!(cfg.dispatch.workers, 3);
        assert_eq!(cfg.connection.request_timeout_ms, 5000);
        assert_eq!(cfg.limits.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn strict_parse_rejects_bad_values() {
        assert!(matches!(
            ClientConfig::from_toml_str("[dispatch]\nworkers = 0"),
            Err(PwError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("[limits]\nmax_frame_size = 4"),
            Err(PwError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("[connection]\nread_timeout_ms = \"soon\""),
            Err(PwError::Config(_))
        ));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(ClientConfig::load(&missing), ClientConfig::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[[[").unwrap();
        assert_eq!(ClientConfig::load(&broken), ClientConfig::default());

        let written = dir.path().join("pwire.toml");
        ClientConfig::write_default(&written).unwrap();
        assert_eq!(ClientConfig::load(&written), ClientConfig::default());
    }

    #[test]
    fn socket_path_resolution_order() {
        assert_eq!(
            resolve_socket_path(env(&[])),
            PathBuf::from("/run/pipewire-0")
        );
        assert_eq!(
            resolve_socket_path(env(&[("XDG_RUNTIME_DIR", "/run/user/1000")])),
            PathBuf::from("/run/user/1000/pipewire-0")
        );
        assert_eq!(
            resolve_socket_path(env(&[
                ("XDG_RUNTIME_DIR", "/run/user/1000"),
                ("PIPEWIRE_RUNTIME_DIR", "/tmp/pw"),
            ])),
            PathBuf::from("/tmp/pw/pipewire-0")
        );
        assert_eq!(
            resolve_socket_path(env(&[
                ("PIPEWIRE_RUNTIME_DIR", "/tmp/pw"),
                ("PIPEWIRE_REMOTE", "pipewire-1"),
            ])),
            PathBuf::from("/tmp/pw/pipewire-1")
        );
        assert_eq!(
            resolve_socket_path(env(&[("PIPEWIRE_REMOTE", "/abs/sock")])),
            PathBuf::from("/abs/sock")
        );
    }

    #[test]
    fn explicit_socket_path_wins() {
        let cfg = ClientConfig::default().with_socket_path("/tmp/x.sock");
        assert_eq!(cfg.socket_path(), PathBuf::from("/tmp/x.sock"));
    }
}
