//! Document saver
//!
//! Saving a local file goes through these steps, one per [`DocumentSaver::step`]:
//!
//! 1. Re-validate the content as UTF-8, append a line terminator and encode it
//! 2. Stat the target: it must be a writable regular file whose mtime matches
//!    the last known one (unless told to ignore it)
//! 3. Write a temp sibling (`.quill-save-XXXXXX`, owner-only permissions) in
//!    8 KiB chunks, reporting progress
//! 4. Rename the old file to `<path><backup extension>`, persist the temp file
//!    over the target and restore the old owner and permission bits
//!
//! The temp file is deleted on every failure path. If the backup cannot be
//! made the original is left alone. If the final rename fails after a backup
//! was made, the backup is moved back.
//!
//! Locations on other schemes are written in one call to the scheme's
//! [`BlockingVfs::replace`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::SystemTime;

use tempfile::NamedTempFile;

use crate::encoding::{from_utf8, Encoding};
use crate::error::{ErrorKind, ErrorRecord, RawError, RequestError, VfsCode};
use crate::transport::{BlockingVfs, FileInfo, VfsRegistry, READ_CHUNK_SIZE};
use crate::uri::DocumentUri;
use crate::util::content_type::{guess_content_type, MAX_SNIFF_SIZE};
use crate::util::text::LineTerminator;

/// Prefix of the temp file written next to the target
pub const TEMP_FILE_PREFIX: &str = ".quill-save-";

/// Adjustments for a single save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveFlags {
    /// Do not make a backup even if backups are enabled
    pub ignore_backup: bool,
    /// Skip the check against the last known modification time
    pub ignore_mtime: bool,
    /// Keep an existing backup instead of replacing it
    pub preserve_backup: bool,
}

impl SaveFlags {
    pub fn ignoring_mtime(mut self) -> Self {
        self.ignore_mtime = true;
        self
    }

    pub fn ignoring_backup(mut self) -> Self {
        self.ignore_backup = true;
        self
    }

    pub fn preserving_backup(mut self) -> Self {
        self.preserve_backup = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub uri: DocumentUri,
    pub encoding: Encoding,
    pub flags: SaveFlags,
}

/// Settings for a save that come from configuration and document state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    pub create_backup: bool,
    pub backup_extension: String,
    /// Modification time recorded at the last load or save
    pub known_mtime: Option<SystemTime>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            backup_extension: "~".to_string(),
            known_mtime: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveResult {
    pub bytes_written: u64,
    pub encoding: Encoding,
    pub mtime: Option<SystemTime>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaverState {
    Idle,
    Encoding,
    Checking,
    Writing,
    Committing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaverEvent {
    Progress { bytes: u64, total: Option<u64> },
    Finished(Result<SaveResult, ErrorRecord>),
}

/// Where the bytes go
pub enum SaveTarget {
    Local(PathBuf),
    Vfs(Rc<dyn BlockingVfs>),
}

impl SaveTarget {
    pub fn resolve(uri: &DocumentUri, registry: &VfsRegistry) -> Result<Self, ErrorRecord> {
        if let Some(path) = uri.local_path() {
            return Ok(Self::Local(path));
        }
        registry.writer(uri.scheme()).map(Self::Vfs).ok_or_else(|| {
            ErrorRecord::new(
                ErrorKind::NotSupportedScheme,
                format!("cannot save to '{}' locations", uri.scheme()),
            )
        })
    }
}

pub struct DocumentSaver {
    request: SaveRequest,
    options: SaveOptions,
    target: SaveTarget,
    content: Option<Vec<u8>>,
    encoded: Vec<u8>,
    written: usize,
    temp: Option<NamedTempFile>,
    original: Option<fs::Metadata>,
    vfs_info: Option<FileInfo>,
    cancelled: bool,
    state: SaverState,
}

impl DocumentSaver {
    /// `content` is the document text as raw bytes; it is checked to be UTF-8
    pub fn new(
        request: SaveRequest,
        content: Vec<u8>,
        options: SaveOptions,
        target: SaveTarget,
    ) -> Self {
        Self {
            request,
            options,
            target,
            content: Some(content),
            encoded: Vec::new(),
            written: 0,
            temp: None,
            original: None,
            vfs_info: None,
            cancelled: false,
            state: SaverState::Idle,
        }
    }

    pub fn request(&self) -> &SaveRequest {
        &self.request
    }

    pub fn state(&self) -> SaverState {
        self.state
    }

    /// Start saving. Fails if this saver has been started before.
    pub fn save(&mut self) -> Result<(), RequestError> {
        if self.state != SaverState::Idle {
            return Err(RequestError::AlreadyUsed);
        }
        tracing::info!(
            "Saving {} as {}",
            self.request.uri,
            self.request.encoding.charset()
        );
        self.state = SaverState::Encoding;
        Ok(())
    }

    /// Abort before commit; the next step reports `Cancelled`
    pub fn cancel(&mut self) -> bool {
        match self.state {
            SaverState::Encoding | SaverState::Checking | SaverState::Writing => {
                tracing::debug!("Cancelling save of {}", self.request.uri);
                self.temp = None;
                self.cancelled = true;
                true
            }
            _ => false,
        }
    }

    pub fn step(&mut self) -> Option<SaverEvent> {
        match self.state {
            SaverState::Idle | SaverState::Done | SaverState::Failed => return None,
            _ if self.cancelled => {
                return Some(self.finish(Err(ErrorRecord::cancelled())));
            }
            _ => {}
        }

        let outcome = match self.state {
            SaverState::Encoding => self.encode().map(|()| None),
            SaverState::Checking => self.check().map(|()| None),
            SaverState::Writing => self.write_chunk().map(Some),
            SaverState::Committing => {
                let result = self.commit();
                return Some(self.finish(result));
            }
            SaverState::Idle | SaverState::Done | SaverState::Failed => Ok(None),
        };

        match outcome {
            Ok(event) => event,
            Err(err) => Some(self.finish(Err(err))),
        }
    }

    fn finish(&mut self, result: Result<SaveResult, ErrorRecord>) -> SaverEvent {
        self.temp = None;
        self.encoded = Vec::new();
        match &result {
            Ok(saved) => {
                tracing::info!(
                    "Saved {} ({} bytes)",
                    self.request.uri,
                    saved.bytes_written
                );
                self.state = SaverState::Done;
            }
            Err(err) if err.is_cancelled() => {
                tracing::debug!("Save of {} cancelled", self.request.uri);
                self.state = SaverState::Failed;
            }
            Err(err) => {
                tracing::warn!("Save of {} failed: {}", self.request.uri, err);
                self.state = SaverState::Failed;
            }
        }
        SaverEvent::Finished(result)
    }

    fn encode(&mut self) -> Result<(), ErrorRecord> {
        let content = self.content.take().unwrap_or_default();
        let mut text = String::from_utf8(content).map_err(|e| {
            ErrorRecord::new(
                ErrorKind::IllegalSequence,
                format!("document is not valid UTF-8: {}", e.utf8_error()),
            )
        })?;
        if !text.is_empty() && !text.ends_with(['\n', '\r']) {
            text.push_str(LineTerminator::detect(&text).as_str());
        }

        self.encoded = from_utf8(&text, self.request.encoding).map_err(ErrorRecord::from)?;
        tracing::debug!(
            "Encoded {} bytes as {}",
            self.encoded.len(),
            self.request.encoding.charset()
        );
        self.state = SaverState::Checking;
        Ok(())
    }

    fn check_mtime(&self, on_disk: Option<SystemTime>) -> Result<(), ErrorRecord> {
        if self.request.flags.ignore_mtime {
            return Ok(());
        }
        match (self.options.known_mtime, on_disk) {
            (Some(known), Some(current)) if known != current => {
                tracing::info!("{} changed on disk since it was read", self.request.uri);
                Err(ErrorRecord::new(
                    ErrorKind::ExternallyModified,
                    "the file has been modified since reading it",
                ))
            }
            _ => Ok(()),
        }
    }

    fn check(&mut self) -> Result<(), ErrorRecord> {
        match &self.target {
            SaveTarget::Local(path) => {
                let path = path.clone();
                self.check_local(&path)
            }
            SaveTarget::Vfs(vfs) => {
                let vfs = Rc::clone(vfs);
                match vfs.query_info(&self.request.uri) {
                    Ok(info) => {
                        info.ensure_regular().map_err(ErrorRecord::from)?;
                        if info.can_write == Some(false) {
                            return Err(read_only_error());
                        }
                        self.check_mtime(info.mtime)?;
                    }
                    Err(err) if err.classify() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                self.state = SaverState::Writing;
                Ok(())
            }
        }
    }

    fn check_local(&mut self, path: &Path) -> Result<(), ErrorRecord> {
        match fs::metadata(path) {
            Ok(metadata) => {
                if metadata.is_dir() {
                    return Err(RawError::IsDirectory.into());
                }
                if !metadata.is_file() {
                    return Err(RawError::NotRegularFile.into());
                }
                if metadata.permissions().readonly() {
                    return Err(read_only_error());
                }
                self.check_mtime(metadata.modified().ok())?;
                self.original = Some(metadata);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{} does not exist yet", path.display());
            }
            Err(e) => return Err(RawError::Io(e).into()),
        }

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| ErrorRecord::from(RawError::Io(e)))?;
        tracing::debug!("Writing to temp file {}", temp.path().display());
        self.temp = Some(temp);
        self.state = SaverState::Writing;
        Ok(())
    }

    fn write_chunk(&mut self) -> Result<SaverEvent, ErrorRecord> {
        let total = self.encoded.len() as u64;

        if let SaveTarget::Vfs(vfs) = &self.target {
            let info = vfs
                .replace(&self.request.uri, &self.encoded)
                .map_err(ErrorRecord::from)?;
            self.vfs_info = Some(info);
            self.written = self.encoded.len();
            self.state = SaverState::Committing;
            return Ok(SaverEvent::Progress {
                bytes: total,
                total: Some(total),
            });
        }

        let Some(temp) = self.temp.as_mut() else {
            return Err(ErrorRecord::cancelled());
        };
        let end = (self.written + READ_CHUNK_SIZE).min(self.encoded.len());
        temp.write_all(&self.encoded[self.written..end])
            .map_err(|e| ErrorRecord::from(RawError::Io(e)))?;
        self.written = end;

        if self.written == self.encoded.len() {
            temp.flush()
                .and_then(|()| temp.as_file().sync_all())
                .map_err(|e| ErrorRecord::from(RawError::Io(e)))?;
            self.state = SaverState::Committing;
        }
        Ok(SaverEvent::Progress {
            bytes: self.written as u64,
            total: Some(total),
        })
    }

    fn commit(&mut self) -> Result<SaveResult, ErrorRecord> {
        let (mtime, size) = match &self.target {
            SaveTarget::Vfs(_) => {
                let info = self.vfs_info.take().unwrap_or_default();
                (info.mtime, info.size)
            }
            SaveTarget::Local(path) => {
                let path = path.clone();
                self.commit_local(&path)?
            }
        };

        let head = &self.encoded[..self.encoded.len().min(MAX_SNIFF_SIZE)];
        Ok(SaveResult {
            bytes_written: self.written as u64,
            encoding: self.request.encoding,
            mtime,
            size,
            content_type: guess_content_type(self.request.uri.file_name().as_deref(), head),
        })
    }

    fn should_backup(&self, backup: &Path) -> bool {
        if self.original.is_none() || !self.options.create_backup {
            return false;
        }
        if self.request.flags.ignore_backup {
            return false;
        }
        if self.request.flags.preserve_backup && backup.exists() {
            tracing::debug!("Keeping existing backup {}", backup.display());
            return false;
        }
        true
    }

    fn commit_local(
        &mut self,
        path: &Path,
    ) -> Result<(Option<SystemTime>, Option<u64>), ErrorRecord> {
        let temp = self.temp.take().ok_or_else(ErrorRecord::cancelled)?;
        let backup = backup_path(path, &self.options.backup_extension);

        let made_backup = if self.should_backup(&backup) {
            if let Err(e) = fs::rename(path, &backup) {
                tracing::warn!("Could not create backup {}: {}", backup.display(), e);
                return Err(ErrorRecord {
                    raw_code: e.raw_os_error(),
                    ..ErrorRecord::new(
                        ErrorKind::CantCreateBackup,
                        format!("could not create backup file {}: {}", backup.display(), e),
                    )
                });
            }
            if let Err(e) = strip_exec_bits(&backup) {
                tracing::warn!("Could not clear exec bits on {}: {}", backup.display(), e);
            }
            tracing::debug!("Backed up {} to {}", path.display(), backup.display());
            true
        } else {
            false
        };

        if let Err(err) = temp.persist(path) {
            tracing::warn!("Could not replace {}: {}", path.display(), err.error);
            if made_backup {
                if let Err(e) = fs::rename(&backup, path) {
                    tracing::error!(
                        "Could not restore {} from backup {}: {}",
                        path.display(),
                        backup.display(),
                        e
                    );
                }
            }
            return Err(RawError::Io(err.error).into());
        }

        restore_attributes(path, self.original.as_ref());

        let metadata = fs::metadata(path).map_err(|e| ErrorRecord::from(RawError::Io(e)))?;
        Ok((metadata.modified().ok(), Some(metadata.len())))
    }
}

/// `<path><extension>`
pub fn backup_path(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(extension);
    PathBuf::from(name)
}

fn read_only_error() -> ErrorRecord {
    ErrorRecord {
        raw_code: Some(VfsCode::PermissionDenied as i32),
        ..ErrorRecord::new(ErrorKind::AccessDenied, "the file is read-only")
    }
}

#[cfg(unix)]
fn strip_exec_bits(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o111 != 0 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & !0o111))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn strip_exec_bits(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Put back the permission bits and owner the file had before the save.
/// New files get the usual `0644`.
#[cfg(unix)]
fn restore_attributes(path: &Path, original: Option<&fs::Metadata>) {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    match original {
        Some(original) => {
            if let Err(e) = fs::set_permissions(path, original.permissions()) {
                tracing::warn!("Could not restore permissions on {}: {}", path.display(), e);
            }
            // Only root can give a file away; failing here is expected otherwise
            if let Err(e) = std::os::unix::fs::chown(path, Some(original.uid()), Some(original.gid()))
            {
                tracing::debug!("Could not restore owner of {}: {}", path.display(), e);
            }
        }
        None => {
            if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o644)) {
                tracing::warn!("Could not set permissions on {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(not(unix))]
fn restore_attributes(path: &Path, original: Option<&fs::Metadata>) {
    if let Some(original) = original {
        if let Err(e) = fs::set_permissions(path, original.permissions()) {
            tracing::warn!("Could not restore permissions on {}: {}", path.display(), e);
        }
    }
}
