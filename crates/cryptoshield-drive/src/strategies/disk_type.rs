use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use cryptoshield_core::{DriveStrategy, StrategyError, StrategyKind};
use serde::Deserialize;
use tracing::instrument;

/// Asks the OS which disks are removable: `lsblk` on Linux, `wmic` on Windows.
pub struct DiskTypeQuery {
    timeout: Duration,
}

impl DiskTypeQuery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DriveStrategy for DiskTypeQuery {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DiskTypeQuery
    }

    #[instrument(skip_all, fields(strategy = "disk-type"))]
    async fn enumerate(&self) -> Result<Vec<PathBuf>, StrategyError> {
        query(self.timeout).await
    }
}

#[cfg(target_os = "linux")]
async fn query(limit: Duration) -> Result<Vec<PathBuf>, StrategyError> {
    let out =
        super::run_command("lsblk", &["--json", "-o", "RM,HOTPLUG,MOUNTPOINT"], limit).await?;
    parse_lsblk(&out)
}

#[cfg(windows)]
async fn query(limit: Duration) -> Result<Vec<PathBuf>, StrategyError> {
    let out = super::run_command(
        "cmd.exe",
        &["/c", "wmic logicaldisk where drivetype=2 get deviceid"],
        limit,
    )
    .await?;
    Ok(parse_wmic(&out))
}

#[cfg(not(any(target_os = "linux", windows)))]
async fn query(_limit: Duration) -> Result<Vec<PathBuf>, StrategyError> {
    Err(StrategyError::Unsupported {
        platform: std::env::consts::OS,
    })
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    #[serde(default)]
    rm: Option<Flag>,
    #[serde(default)]
    hotplug: Option<Flag>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// Older util-linux prints flags as `"0"`/`"1"`, newer as booleans.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Text(s) => s.trim() == "1",
        }
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_lsblk(json: &str) -> Result<Vec<PathBuf>, StrategyError> {
    let parsed: LsblkOutput =
        serde_json::from_str(json).map_err(|e| StrategyError::Parse(e.to_string()))?;
    let mut out = Vec::new();
    for device in &parsed.blockdevices {
        collect_removable(device, false, &mut out);
    }
    Ok(out)
}

fn collect_removable(device: &LsblkDevice, parent_removable: bool, out: &mut Vec<PathBuf>) {
    let removable = parent_removable
        || device.rm.as_ref().is_some_and(Flag::is_set)
        || device.hotplug.as_ref().is_some_and(Flag::is_set);

    if removable {
        if let Some(mount) = device.mountpoint.as_deref() {
            if mount.starts_with('/') {
                out.push(PathBuf::from(mount));
            }
        }
    }
    for child in &device.children {
        collect_removable(child, removable, out);
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn parse_wmic(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            let bytes = line.as_bytes();
            bytes.len() == 2 && bytes[0].is_ascii_uppercase() && bytes[1] == b':'
        })
        .map(|letter| PathBuf::from(format!("{letter}\\")))
        .collect()
}
