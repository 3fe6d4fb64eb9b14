//! Startup Diagnostics and Error Reporting
//!
//! System information for the startup log, and a framed error message for
//! fatal failures printed to stderr.

use std::fmt::Write;

use sysinfo::System;
use tracing::info;

use crate::config::Config;
use crate::deployment::DeploymentContext;

/// System information for diagnostics
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// Operating system name (e.g., "Ubuntu")
    pub os_name: String,
    /// Operating system version string
    pub os_version: String,

    /// Kernel version string
    pub kernel_version: String,

    /// System hostname
    pub hostname: String,

    /// Effective uid of this process
    pub euid: u32,
}

impl SystemInfo {
    /// Gather system information
    pub fn gather() -> Self {
        Self {
            os_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version().unwrap_or_else(|| "Unknown".to_string()),
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
            euid: nix::unistd::geteuid().as_raw(),
        }
    }

    /// Log system information
    pub fn log(&self) {
        info!("=== System Information ===");
        info!("  OS: {} {}", self.os_name, self.os_version);
        info!("  Kernel: {}", self.kernel_version);
        info!("  Hostname: {}", self.hostname);
        info!("  Effective uid: {}", self.euid);
    }
}

/// Build identification stamped in at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// UTC build date
    pub date: &'static str,
    /// Cargo profile ("debug" or "release")
    pub profile: &'static str,
    /// Short commit hash
    pub commit: &'static str,
}

impl BuildInfo {
    /// Values for this binary
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            date: env!("BUILD_DATE"),
            profile: env!("BUILD_PROFILE"),
            commit: env!("GIT_HASH"),
        }
    }

    /// Log the startup banner
    pub fn log_banner(&self) {
        info!("════════════════════════════════════════════════════════");
        info!("  norduser-monitor v{}", self.version);
        info!("  Built: {} ({})", self.date, self.profile);
        info!("  Commit: {}", self.commit);
        info!("════════════════════════════════════════════════════════");
    }
}

/// Log complete diagnostics on startup
pub fn log_startup_diagnostics(config: &Config, context: DeploymentContext) {
    SystemInfo::gather().log();

    info!("=== Monitor Configuration ===");
    info!("  Deployment: {}", context);
    info!("  Group: {} ({})", config.group.name, config.group.file.display());
    info!("  Sessions: {}", config.sessions.utmp_file.display());
    info!("  Helper: {}", config.helper.binary_path.display());
}

/// Format error for user consumption
///
/// Adds the likely cause and what to check to the technical error chain.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();
    let error_msg = format!("{:#}", error);

    writeln!(&mut output).ok();
    writeln!(&mut output, "norduser-monitor failed to start").ok();
    writeln!(&mut output, "--------------------------------").ok();
    writeln!(&mut output).ok();

    if error_msg.contains("watcher") || error_msg.contains("File watcher") {
        writeln!(output, "Could not watch the group or session files.").ok();
        writeln!(output).ok();
        writeln!(output, "  - Check that /etc and /var/run/utmp exist").ok();
        writeln!(output, "  - Raise fs.inotify.max_user_watches if it is exhausted").ok();
    } else if error_msg.contains("config") {
        writeln!(output, "Problem with the configuration file.").ok();
        writeln!(output).ok();
        writeln!(output, "  - Default location: /etc/nordvpn/norduser-monitor.toml").ok();
        writeln!(output, "  - Or specify: norduser-monitor -c /path/to/config.toml").ok();
    } else if error_msg.contains("Group not found") {
        writeln!(output, "The privileged group does not exist.").ok();
        writeln!(output).ok();
        writeln!(output, "  - Create it with: groupadd nordvpn").ok();
    } else {
        writeln!(output, "Unexpected error.").ok();
    }

    writeln!(&mut output).ok();
    writeln!(&mut output, "Technical Details:").ok();
    writeln!(&mut output, "  {}", error_msg).ok();
    writeln!(&mut output).ok();
    writeln!(&mut output, "Run with -vv for detailed logs.").ok();

    output
}
