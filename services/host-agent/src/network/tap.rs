//! TAP and macvtap device management.
//!
//! Devices are created and removed with `ip` commands. Existence and
//! details are read from sysfs:
//! - `/sys/class/net/<dev>` exists for every device
//! - `/sys/class/net/<dev>/ifindex` holds the kernel index
//! - `/sys/class/net/<dev>/address` holds the MAC
//! - `/sys/class/net/<dev>/tun_flags` only exists for tun/tap devices

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::models::IfaceType;
use crate::ports::{DeleteIfaceInput, IfaceCreateInput, IfaceDetails, NetworkService};

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Errors from TAP device operations.
#[derive(Debug, Error)]
pub enum TapError {
    #[error("failed to create device {device}: {reason}")]
    CreateFailed { device: String, reason: String },

    #[error("failed to configure device {device}: {reason}")]
    ConfigFailed { device: String, reason: String },

    #[error("failed to delete device {device}: {reason}")]
    DeleteFailed { device: String, reason: String },

    #[error("device {0} not found")]
    NotFound(String),

    #[error("invalid {field} for device {device}: {value}")]
    InvalidDetails {
        device: String,
        field: &'static str,
        value: String,
    },

    #[error("command execution failed: {0}")]
    CommandFailed(#[from] std::io::Error),
}

/// [`NetworkService`] backed by the host's network stack.
#[derive(Debug, Clone)]
pub struct TapNetworkService {
    sysfs: PathBuf,
}

impl Default for TapNetworkService {
    fn default() -> Self {
        Self::new()
    }
}

impl TapNetworkService {
    pub fn new() -> Self {
        Self {
            sysfs: PathBuf::from(SYS_CLASS_NET),
        }
    }

    /// Reads device information from `sysfs` instead of `/sys/class/net`.
    pub fn with_sysfs(sysfs: impl Into<PathBuf>) -> Self {
        Self {
            sysfs: sysfs.into(),
        }
    }

    async fn read_attr(&self, device: &str, attr: &str) -> Result<String, TapError> {
        let path = self.sysfs.join(device).join(attr);
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(value.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TapError::NotFound(device.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_tap(&self, input: &IfaceCreateInput) -> Result<(), TapError> {
        let device = input.device_name.as_str();

        run_ip(&["tuntap", "add", "dev", device, "mode", "tap"])
            .await
            .map_err(|e| TapError::CreateFailed {
                device: device.to_string(),
                reason: e.to_string(),
            })?;

        if input.attach {
            if let Some(bridge) = input.bridge_name.as_deref() {
                configure(device, &["link", "set", "dev", device, "master", bridge], "attach").await?;
            }
        }

        Ok(())
    }

    async fn create_macvtap(&self, input: &IfaceCreateInput) -> Result<(), TapError> {
        let device = input.device_name.as_str();
        let parent = input
            .bridge_name
            .as_deref()
            .ok_or_else(|| TapError::CreateFailed {
                device: device.to_string(),
                reason: "macvtap requires a parent device".to_string(),
            })?;

        run_ip(&[
            "link", "add", "link", parent, "name", device, "type", "macvtap", "mode", "bridge",
        ])
        .await
        .map_err(|e| TapError::CreateFailed {
            device: device.to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }
}

#[async_trait]
impl NetworkService for TapNetworkService {
    async fn iface_exists(&self, name: &str) -> Result<bool> {
        let path = self.sysfs.join(name);
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))
    }

    async fn iface_create(&self, input: IfaceCreateInput) -> Result<IfaceDetails> {
        let device = input.device_name.as_str();
        info!(
            device = %device,
            iface_type = %input.iface_type,
            attach = input.attach,
            bridge = ?input.bridge_name,
            "Creating network device"
        );

        match input.iface_type {
            IfaceType::Tap => self.create_tap(&input).await?,
            IfaceType::Macvtap => self.create_macvtap(&input).await?,
        }

        if let Some(mac) = input.mac.as_deref() {
            configure(device, &["link", "set", "dev", device, "address", mac], "mac address")
                .await?;
        }

        configure(device, &["link", "set", "dev", device, "up"], "bring up").await?;

        debug!(device = %device, "Network device created and configured");
        self.iface_details(device).await
    }

    async fn iface_delete(&self, input: DeleteIfaceInput) -> Result<()> {
        info!(device = %input.device_name, "Deleting network device");

        run_ip(&["link", "delete", input.device_name.as_str()])
            .await
            .map_err(|e| TapError::DeleteFailed {
                device: input.device_name.clone(),
                reason: e.to_string(),
            })?;

        debug!(device = %input.device_name, "Network device deleted");
        Ok(())
    }

    async fn iface_details(&self, name: &str) -> Result<IfaceDetails> {
        let index_raw = self.read_attr(name, "ifindex").await?;
        let index = index_raw
            .parse::<u32>()
            .map_err(|_| TapError::InvalidDetails {
                device: name.to_string(),
                field: "ifindex",
                value: index_raw.clone(),
            })?;

        let mac = self.read_attr(name, "address").await?;

        let iface_type = if tokio::fs::try_exists(self.sysfs.join(name).join("tun_flags"))
            .await
            .unwrap_or(false)
        {
            IfaceType::Tap
        } else {
            IfaceType::Macvtap
        };

        Ok(IfaceDetails {
            device_name: name.to_string(),
            iface_type,
            mac,
            index,
        })
    }
}

/// Runs a configuration command, removing the device if it fails.
async fn configure(device: &str, args: &[&str], what: &str) -> Result<(), TapError> {
    if let Err(e) = run_ip(args).await {
        if let Err(cleanup) = run_ip(&["link", "delete", device]).await {
            warn!(device = %device, error = %cleanup, "Failed to clean up device after error");
        }
        return Err(TapError::ConfigFailed {
            device: device.to_string(),
            reason: format!("{what}: {e}"),
        });
    }
    Ok(())
}

/// Run an `ip` command and return result.
async fn run_ip(args: &[&str]) -> Result<()> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .context("failed to execute ip command")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ip {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(())
}
