//! Helper RPC wire format and socket locations
//!
//! One JSON object per line in each direction over a Unix stream socket:
//!
//! ```text
//! -> {"method":"stop","disable":true,"restart":false}
//! <- {"ok":true}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Request sent to the helper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum HelperRequest {
    /// Liveness check
    Ping,
    /// Start the fileshare subsystem
    StartFileshare,
    /// Stop the fileshare subsystem
    StopFileshare,
    /// Stop the helper
    Stop {
        /// Also keep it from autostarting
        disable: bool,
        /// Re-exec after stopping
        restart: bool,
    },
}

/// Helper reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperResponse {
    /// Whether the request succeeded
    pub ok: bool,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HelperResponse {
    /// Successful reply
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    /// Failed reply
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
        }
    }
}

/// Where the helper of a given uid listens
#[derive(Debug, Clone)]
pub struct SocketLayout {
    socket_name: String,
    fallback_dir: PathBuf,
    runtime_dir_root: PathBuf,
    snap_dir_root: PathBuf,
    sandboxed: bool,
}

impl SocketLayout {
    /// Layout from configuration
    pub fn from_config(config: &Config, sandboxed: bool) -> Self {
        Self {
            socket_name: config.rpc.socket_name.clone(),
            fallback_dir: config.rpc.fallback_dir.clone(),
            runtime_dir_root: config.systemd.runtime_dir_root.clone(),
            snap_dir_root: config.rpc.snap_dir_root.clone(),
            sandboxed,
        }
    }

    /// Socket path of the helper for `uid`
    ///
    /// Root and users without a runtime directory share the fallback
    /// directory.
    pub fn socket_path(&self, uid: u32) -> PathBuf {
        let file = format!("{}.sock", self.socket_name);

        if self.sandboxed {
            return self
                .snap_dir_root
                .join(uid.to_string())
                .join("snap.nordvpn")
                .join(file);
        }

        let runtime_dir = self.runtime_dir_root.join(uid.to_string());
        if uid == 0 || !runtime_dir.is_dir() {
            return self.fallback_dir.join(file);
        }
        runtime_dir.join(&self.socket_name).join(file)
    }
}
