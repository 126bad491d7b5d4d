use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use cryptoshield_core::{CredentialEntry, EntryCodec, SessionContext, ShieldError};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Credential log at the drive root.
pub const LOG_FILENAME: &str = "passwords.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Replaced,
}

/// Counts from a legacy migration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Legacy lines re-encoded with the active codec.
    pub migrated: usize,
    /// Lines the active codec already reads.
    pub kept: usize,
    /// Lines neither codec reads; left verbatim.
    pub unreadable: usize,
}

/// Line-per-entry credential log scoped to one authorized drive.
///
/// Every call checks the session first: reads share its guard, mutations take
/// it exclusively, and once the session is revoked everything fails with
/// `ShieldError::SessionRevoked`.
pub struct CredentialStore {
    context: Arc<SessionContext>,
    codec: Arc<dyn EntryCodec>,
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(context: Arc<SessionContext>, codec: Arc<dyn EntryCodec>) -> Self {
        let path = context.root().join(LOG_FILENAME);
        Self {
            context,
            codec,
            path,
        }
    }

    pub fn root(&self) -> &Path {
        self.context.root()
    }

    pub fn log_path(&self) -> &Path {
        &self.path
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// All decodable entries in file order. A missing log is empty.
    #[instrument(skip_all, fields(session = %self.context.id()))]
    pub fn load(&self) -> Result<Vec<CredentialEntry>, ShieldError> {
        let _guard = self.context.read()?;
        self.load_unlocked()
    }

    #[instrument(skip_all, fields(website = %entry.website))]
    pub fn append(&self, entry: &CredentialEntry) -> Result<(), ShieldError> {
        let _guard = self.context.write()?;
        self.append_unlocked(entry)
    }

    pub fn exists(&self, website: &str, username: &str) -> Result<bool, ShieldError> {
        let _guard = self.context.read()?;
        Ok(self
            .load_unlocked()?
            .iter()
            .any(|e| e.has_key(website, username)))
    }

    /// Replace any entry with the same key, then append. Holds the exclusive
    /// guard for both steps; a crash between them loses the old entry.
    #[instrument(skip_all, fields(website = %entry.website))]
    pub fn upsert(&self, entry: &CredentialEntry) -> Result<UpsertOutcome, ShieldError> {
        let _guard = self.context.write()?;
        let present = self
            .load_unlocked()?
            .iter()
            .any(|e| e.has_key(&entry.website, &entry.username));
        if present {
            self.delete_unlocked(&entry.website, &entry.username)?;
        }
        self.append_unlocked(entry)?;
        Ok(if present {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Added
        })
    }

    /// Rewrite the log without lines decoding to `(website, username)`.
    /// Undecodable lines survive verbatim. Returns how many lines were dropped.
    #[instrument(skip_all, fields(website = %website))]
    pub fn delete_by_key(&self, website: &str, username: &str) -> Result<usize, ShieldError> {
        let _guard = self.context.write()?;
        self.delete_unlocked(website, username)
    }

    /// Case-insensitive substring match on website or username. A blank query
    /// returns everything.
    pub fn search(&self, query: &str) -> Result<Vec<CredentialEntry>, ShieldError> {
        let entries = self.load()?;
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(entries);
        }
        Ok(entries
            .into_iter()
            .filter(|e| e.matches_lowercase(&needle))
            .collect())
    }

    /// Whether the log holds any non-blank line, readable or not.
    pub fn has_lines(&self) -> Result<bool, ShieldError> {
        let _guard = self.context.read()?;
        Ok(self.read_lines()?.iter().any(|line| !line.is_blank()))
    }

    /// Re-encode lines only `legacy` can read with the active codec.
    #[instrument(skip_all, fields(from = legacy.name(), to = self.codec.name()))]
    pub fn migrate(&self, legacy: &dyn EntryCodec) -> Result<MigrationReport, ShieldError> {
        let _guard = self.context.write()?;
        let mut report = MigrationReport::default();
        let mut out = Vec::new();
        for line in self.read_lines()? {
            if line.is_blank() {
                continue;
            }
            if line.decode_with(self.codec.as_ref()).is_ok() {
                report.kept += 1;
                out.push(line);
                continue;
            }
            match line.decode_with(legacy) {
                Ok(entry) => {
                    out.push(RawLine::from(self.codec.encode(&entry)?));
                    report.migrated += 1;
                }
                Err(_) => {
                    report.unreadable += 1;
                    out.push(line);
                }
            }
        }
        if report.migrated > 0 {
            self.rewrite(&out)?;
        }
        info!(
            migrated = report.migrated,
            kept = report.kept,
            unreadable = report.unreadable,
            "credential log migration finished"
        );
        Ok(report)
    }

    fn load_unlocked(&self) -> Result<Vec<CredentialEntry>, ShieldError> {
        let mut skipped = 0usize;
        let entries: Vec<CredentialEntry> = self
            .read_lines()?
            .iter()
            .filter(|line| !line.is_blank())
            .filter_map(|line| match line.decode_with(self.codec.as_ref()) {
                Ok(entry) => Some(entry),
                Err(_) => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            debug!(skipped, "skipped undecodable credential lines");
        }
        Ok(entries)
    }

    fn append_unlocked(&self, entry: &CredentialEntry) -> Result<(), ShieldError> {
        let line = self.codec.encode(entry)?;
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(ShieldError::store_io)?;

        let mut buf = Vec::with_capacity(line.len() + 2);
        if needs_separator(&mut file).map_err(ShieldError::store_io)? {
            buf.push(b'\n');
        }
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf).map_err(ShieldError::store_io)?;
        file.sync_data().map_err(ShieldError::store_io)
    }

    fn delete_unlocked(&self, website: &str, username: &str) -> Result<usize, ShieldError> {
        let lines = self.read_lines()?;
        let before = lines.iter().filter(|l| !l.is_blank()).count();
        let kept: Vec<RawLine> = lines
            .into_iter()
            .filter(|line| !line.is_blank())
            .filter(|line| match line.decode_with(self.codec.as_ref()) {
                Ok(entry) => !entry.has_key(website, username),
                Err(_) => true,
            })
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.rewrite(&kept)?;
        }
        debug!(removed, "delete by key");
        Ok(removed)
    }

    fn read_lines(&self) -> Result<Vec<RawLine>, ShieldError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(RawLine::split(&bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(ShieldError::store_io(err)),
        }
    }

    /// Replace the whole log via a sibling temp file and rename.
    fn rewrite(&self, lines: &[RawLine]) -> Result<(), ShieldError> {
        let parent = self.context.root();
        let mut tmp = NamedTempFile::new_in(parent).map_err(ShieldError::store_io)?;
        for line in lines {
            tmp.write_all(&line.bytes).map_err(ShieldError::store_io)?;
            tmp.write_all(b"\n").map_err(ShieldError::store_io)?;
        }
        tmp.flush().map_err(ShieldError::store_io)?;
        tmp.as_file().sync_all().map_err(ShieldError::store_io)?;
        tmp.persist(&self.path)
            .map_err(|e| ShieldError::store_io(e.error))?;
        Ok(())
    }
}

/// One log line exactly as stored, without its `\n`. Kept as bytes so lines
/// that are not UTF-8, or end in `\r`, are written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawLine {
    bytes: Vec<u8>,
}

impl RawLine {
    fn split(bytes: &[u8]) -> Vec<Self> {
        let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        if body.is_empty() {
            return Vec::new();
        }
        body.split(|b| *b == b'\n')
            .map(|line| Self {
                bytes: line.to_vec(),
            })
            .collect()
    }

    fn content(&self) -> &[u8] {
        self.bytes.strip_suffix(b"\r").unwrap_or(&self.bytes[..])
    }

    fn is_blank(&self) -> bool {
        self.content().iter().all(u8::is_ascii_whitespace)
    }

    fn decode_with(&self, codec: &dyn EntryCodec) -> Result<CredentialEntry, ShieldError> {
        let text = std::str::from_utf8(self.content()).map_err(ShieldError::corrupt)?;
        codec.decode(text)
    }
}

impl From<String> for RawLine {
    fn from(line: String) -> Self {
        Self {
            bytes: line.into_bytes(),
        }
    }
}

/// True when the file is non-empty and does not end in a newline.
fn needs_separator(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
