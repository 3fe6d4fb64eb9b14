//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Privileged group configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Name of the group whose members get a helper process
    pub name: String,

    /// Path to the group database file
    pub file: PathBuf,
}

/// Login session accounting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Session accounting file watched for login/logout
    pub utmp_file: PathBuf,

    /// procfs mount point used to inspect login process environments
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Environment variables whose presence marks a graphical session
    #[serde(default = "default_gui_env_vars")]
    pub gui_env_vars: Vec<String>,
}

/// Per-user helper process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Helper binary executed by the fork backend
    pub binary_path: PathBuf,

    /// Process name used to detect running instances
    pub process_name: String,

    /// Argument passed to the helper when spawned directly
    #[serde(default = "default_fork_arg")]
    pub fork_arg: String,

    /// Service manager unit name
    pub unit_name: String,

    /// Group owning the VPN control socket (supplementary group of the helper)
    pub control_group: String,

    /// Seconds to wait for a helper to exit after SIGTERM
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Seconds to wait for all helpers during shutdown
    #[serde(default = "default_stop_all_timeout")]
    pub stop_all_timeout_secs: u64,
}

/// Service manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemdConfig {
    /// systemctl executable
    pub systemctl_path: PathBuf,

    /// Parent of per-user runtime directories (`<root>/<uid>`)
    pub runtime_dir_root: PathBuf,
}

/// Helper RPC socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Socket and directory base name
    pub socket_name: String,

    /// Directory used when the user has no runtime directory
    pub fallback_dir: PathBuf,

    /// Parent of per-user runtime directories under the sandboxed packaging
    pub snap_dir_root: PathBuf,

    /// Seconds a waiting ping keeps retrying
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Seconds to wait for a freshly spawned helper to answer
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Directory for log files (None = console only)
    pub log_dir: Option<PathBuf>,
}

/// File name used inside [`LoggingConfig::log_dir`]
pub const LOG_FILE_NAME: &str = "norduser-monitor.log";

impl LoggingConfig {
    /// Tracing filter for this crate; each `-v` raises the configured level
    pub fn filter_directive(&self, verbose: u8) -> String {
        let level = match verbose {
            0 => self.level.as_str(),
            1 => "debug",
            _ => "trace",
        };
        format!("norduser_monitor={},warn", level)
    }

    /// Log file inside `log_dir`, if one is configured
    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(LOG_FILE_NAME))
    }
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_gui_env_vars() -> Vec<String> {
    vec!["DISPLAY".to_string(), "WAYLAND_DISPLAY".to_string()]
}

fn default_fork_arg() -> String {
    "fork".to_string()
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_stop_all_timeout() -> u64 {
    10
}

fn default_ping_timeout() -> u64 {
    3
}

fn default_startup_timeout() -> u64 {
    10
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            utmp_file: PathBuf::from("/var/run/utmp"),
            proc_root: default_proc_root(),
            gui_env_vars: default_gui_env_vars(),
        }
    }
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("/usr/lib/nordvpn/norduserd"),
            process_name: "norduserd".to_string(),
            fork_arg: default_fork_arg(),
            unit_name: "norduserd.service".to_string(),
            control_group: "nordvpn".to_string(),
            stop_timeout_secs: default_stop_timeout(),
            stop_all_timeout_secs: default_stop_all_timeout(),
        }
    }
}

impl Default for SystemdConfig {
    fn default() -> Self {
        Self {
            systemctl_path: PathBuf::from("systemctl"),
            runtime_dir_root: PathBuf::from("/run/user"),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            socket_name: "norduserd".to_string(),
            fallback_dir: PathBuf::from("/run/norduserd"),
            snap_dir_root: PathBuf::from("/run/user"),
            ping_timeout_secs: default_ping_timeout(),
            startup_timeout_secs: default_startup_timeout(),
        }
    }
}
