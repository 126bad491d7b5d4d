use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use cryptoshield_core::{DriveStrategy, StrategyError, StrategyKind};
use tracing::instrument;

/// Classifies mounted filesystem roots.
///
/// Unix: walks the mount table and keeps roots whose block device is flagged
/// removable in sysfs, or which are mounted under a desktop media directory.
/// Windows: asks `fsutil` for the type of every existing drive root.
#[cfg_attr(windows, allow(dead_code))]
pub struct MountTableScan {
    #[cfg_attr(not(windows), allow(dead_code))]
    timeout: Duration,
    mounts_path: PathBuf,
    sys_block: PathBuf,
}

impl MountTableScan {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            mounts_path: PathBuf::from("/proc/mounts"),
            sys_block: PathBuf::from("/sys/block"),
        }
    }

    /// Read the mount table and sysfs from alternate locations.
    pub fn with_sources(
        timeout: Duration,
        mounts_path: impl Into<PathBuf>,
        sys_block: impl Into<PathBuf>,
    ) -> Self {
        Self {
            timeout,
            mounts_path: mounts_path.into(),
            sys_block: sys_block.into(),
        }
    }
}

#[async_trait]
impl DriveStrategy for MountTableScan {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MountTable
    }

    #[instrument(skip_all, fields(strategy = "mount-table"))]
    async fn enumerate(&self) -> Result<Vec<PathBuf>, StrategyError> {
        #[cfg(windows)]
        {
            classify_drive_letters(self.timeout).await
        }

        #[cfg(not(windows))]
        {
            let mounts_path = self.mounts_path.clone();
            let sys_block = self.sys_block.clone();
            // sysfs reads can stall on a dying device; keep them off the runtime.
            tokio::task::spawn_blocking(move || scan_mount_table(&mounts_path, &sys_block))
                .await
                .map_err(|e| StrategyError::Parse(format!("mount scan task failed: {e}")))?
        }
    }
}

#[cfg(windows)]
async fn classify_drive_letters(limit: Duration) -> Result<Vec<PathBuf>, StrategyError> {
    let mut out = Vec::new();
    for letter in b'A'..=b'Z' {
        let letter = letter as char;
        let root = format!("{letter}:\\");
        if !Path::new(&root).exists() {
            continue;
        }
        let designator = format!("{letter}:");
        match super::run_command("fsutil", &["fsinfo", "drivetype", &designator], limit).await {
            Ok(text) if text.contains("Removable") => out.push(PathBuf::from(root)),
            Ok(_) => {}
            Err(err) => tracing::debug!(%designator, error = %err, "fsutil query failed"),
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountRecord {
    device: String,
    mount_point: String,
}

#[cfg_attr(windows, allow(dead_code))]
fn scan_mount_table(mounts_path: &Path, sys_block: &Path) -> Result<Vec<PathBuf>, StrategyError> {
    let text = fs::read_to_string(mounts_path)?;
    Ok(parse_mounts(&text)
        .into_iter()
        .filter(|record| is_removable_mount(record, sys_block))
        .map(|record| PathBuf::from(record.mount_point))
        .collect())
}

fn parse_mounts(text: &str) -> Vec<MountRecord> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            Some(MountRecord {
                device: decode_octal_escapes(device),
                mount_point: decode_octal_escapes(mount_point),
            })
        })
        .collect()
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`.
fn decode_octal_escapes(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_removable_mount(record: &MountRecord, sys_block: &Path) -> bool {
    if record.mount_point.starts_with("/media/") || record.mount_point.starts_with("/run/media/")
    {
        return true;
    }
    let Some(name) = record.device.strip_prefix("/dev/") else {
        return false;
    };
    for disk in [name, parent_disk(name)] {
        if let Ok(flag) = fs::read_to_string(sys_block.join(disk).join("removable")) {
            return flag.trim() == "1";
        }
    }
    false
}

/// `sdb1` → `sdb`, `mmcblk0p1` → `mmcblk0`, `nvme0n1p2` → `nvme0n1`.
fn parent_disk(name: &str) -> &str {
    let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.len() == name.len() {
        return name;
    }
    match trimmed.strip_suffix('p') {
        Some(base) if base.ends_with(|c: char| c.is_ascii_digit()) => base,
        _ => trimmed,
    }
}
