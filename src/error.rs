//! Error taxonomy for document I/O
//!
//! Transports report [`RawError`]s exactly as they got them. The loader and
//! saver classify those into an [`ErrorRecord`], which is what the document
//! state machine and its callers see.
//!
//! | Kind | Recoverable | Retry with |
//! |------|-------------|------------|
//! | `ExternallyModified` | yes | `ignore_mtime` |
//! | `CantCreateBackup` | yes | `ignore_backup` |
//! | `AutoDetectFailed`, `IllegalSequence` | yes | an explicit encoding |
//! | network class | yes | the same parameters |
//! | everything else | no | - |

use std::fmt;
use std::io;

use thiserror::Error;

use crate::model::TabState;

/// Classified failure kinds surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    IsDirectory,
    NotRegularFile,
    TooBig,
    /// Wrong format or corrupted data
    CorruptedData,
    HostNotFound,
    HostHasNoAddress,
    LoginFailed,
    Timeout,
    NotSupportedScheme,
    InvalidUri,
    TooManyOpenFiles,
    NoMemory,
    Cancelled,
    AutoDetectFailed,
    IllegalSequence,
    ExternallyModified,
    CantCreateBackup,
    Generic,
}

/// How a failed operation may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Save again ignoring the modification time check
    IgnoreMtime,
    /// Save again without creating a backup
    IgnoreBackup,
    /// Load or save again with a different, explicit encoding
    ChooseEncoding,
    /// Transient failure; the same request may succeed
    SameParameters,
    /// Not retryable
    None,
}

impl ErrorKind {
    /// Network-class failures are generically retryable
    pub fn is_network(self) -> bool {
        matches!(
            self,
            Self::HostNotFound | Self::HostHasNoAddress | Self::LoginFailed | Self::Timeout
        )
    }

    pub fn retry_hint(self) -> RetryHint {
        match self {
            Self::ExternallyModified => RetryHint::IgnoreMtime,
            Self::CantCreateBackup => RetryHint::IgnoreBackup,
            Self::AutoDetectFailed | Self::IllegalSequence => RetryHint::ChooseEncoding,
            kind if kind.is_network() => RetryHint::SameParameters,
            _ => RetryHint::None,
        }
    }

    pub fn is_recoverable(self) -> bool {
        self.retry_hint() != RetryHint::None
    }

    /// Get a user-friendly error message
    pub fn user_message(self, name: &str) -> String {
        match self {
            Self::NotFound => format!("Could not find the file {}", name),
            Self::AccessDenied => format!("You do not have the permissions necessary to open {}", name),
            Self::IsDirectory => format!("{} is a directory", name),
            Self::NotRegularFile => format!("{} is not a regular file", name),
            Self::TooBig => format!("{} is too big", name),
            Self::CorruptedData => format!("{} contains corrupted data", name),
            Self::HostNotFound => format!("Host for {} could not be found", name),
            Self::HostHasNoAddress => format!("Host for {} has no address", name),
            Self::LoginFailed => format!("Login failed while accessing {}", name),
            Self::Timeout => format!("Timed out while accessing {}", name),
            Self::NotSupportedScheme => format!("Cannot handle the location of {}", name),
            Self::InvalidUri => format!("{} is not a valid location", name),
            Self::TooManyOpenFiles => format!("Too many open files to open {}", name),
            Self::NoMemory => format!("Not enough memory to open {}", name),
            Self::Cancelled => format!("Operation on {} was cancelled", name),
            Self::AutoDetectFailed => {
                format!("Could not determine the character encoding of {}", name)
            }
            Self::IllegalSequence => format!("{} contains invalid characters for the encoding", name),
            Self::ExternallyModified => format!("{} has been modified since reading it", name),
            Self::CantCreateBackup => format!("Could not create a backup file for {}", name),
            Self::Generic => format!("Unexpected error with {}", name),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::AccessDenied => "access denied",
            Self::IsDirectory => "is a directory",
            Self::NotRegularFile => "not a regular file",
            Self::TooBig => "file too big",
            Self::CorruptedData => "corrupted data",
            Self::HostNotFound => "host not found",
            Self::HostHasNoAddress => "host has no address",
            Self::LoginFailed => "login failed",
            Self::Timeout => "timed out",
            Self::NotSupportedScheme => "unsupported location scheme",
            Self::InvalidUri => "invalid location",
            Self::TooManyOpenFiles => "too many open files",
            Self::NoMemory => "out of memory",
            Self::Cancelled => "cancelled",
            Self::AutoDetectFailed => "encoding auto-detection failed",
            Self::IllegalSequence => "illegal byte sequence",
            Self::ExternallyModified => "externally modified",
            Self::CantCreateBackup => "cannot create backup",
            Self::Generic => "unexpected error",
        };
        f.write_str(s)
    }
}

/// Error codes reported by a virtual filesystem implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VfsCode {
    NotFound = 1,
    PermissionDenied = 2,
    IsDirectory = 3,
    NotRegularFile = 4,
    NotMounted = 5,
    NotSupported = 6,
    HostNotFound = 7,
    HostHasNoAddress = 8,
    LoginFailed = 9,
    Timeout = 10,
    InvalidUri = 11,
    TooManyOpenFiles = 12,
    NoMemory = 13,
    Corrupted = 14,
    Generic = 15,
}

/// A failure as reported by a transport, before classification
#[derive(Debug, Error)]
pub enum RawError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{message}")]
    Vfs { code: VfsCode, message: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("file too big")]
    TooBig,
    #[error("not enough memory to hold the file contents")]
    NoMemory,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a regular file")]
    NotRegularFile,
    #[error("I/O error while reading the file")]
    ReadFault(#[source] io::Error),
}

impl RawError {
    pub fn vfs(code: VfsCode, message: impl Into<String>) -> Self {
        Self::Vfs {
            code,
            message: message.into(),
        }
    }

    pub fn vfs_code(&self) -> Option<VfsCode> {
        match self {
            Self::Vfs { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Classify into the public taxonomy
    pub fn classify(&self) -> ErrorKind {
        match self {
            Self::Io(e) | Self::ReadFault(e) => classify_io(e),
            Self::Vfs { code, .. } => match code {
                VfsCode::NotFound => ErrorKind::NotFound,
                VfsCode::PermissionDenied => ErrorKind::AccessDenied,
                VfsCode::IsDirectory => ErrorKind::IsDirectory,
                VfsCode::NotRegularFile => ErrorKind::NotRegularFile,
                VfsCode::NotSupported => ErrorKind::NotSupportedScheme,
                VfsCode::HostNotFound => ErrorKind::HostNotFound,
                VfsCode::HostHasNoAddress => ErrorKind::HostHasNoAddress,
                VfsCode::LoginFailed => ErrorKind::LoginFailed,
                VfsCode::Timeout => ErrorKind::Timeout,
                VfsCode::InvalidUri => ErrorKind::InvalidUri,
                VfsCode::TooManyOpenFiles => ErrorKind::TooManyOpenFiles,
                VfsCode::NoMemory => ErrorKind::NoMemory,
                VfsCode::Corrupted => ErrorKind::CorruptedData,
                VfsCode::NotMounted | VfsCode::Generic => ErrorKind::Generic,
            },
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TooBig => ErrorKind::TooBig,
            Self::NoMemory => ErrorKind::NoMemory,
            Self::IsDirectory => ErrorKind::IsDirectory,
            Self::NotRegularFile => ErrorKind::NotRegularFile,
        }
    }

    /// The transport's own code, if it has one
    pub fn raw_code(&self) -> Option<i32> {
        match self {
            Self::Io(e) | Self::ReadFault(e) => e.raw_os_error(),
            Self::Vfs { code, .. } => Some(*code as i32),
            _ => None,
        }
    }
}

const EMFILE: i32 = 24;

fn classify_io(e: &io::Error) -> ErrorKind {
    if e.raw_os_error() == Some(EMFILE) {
        return ErrorKind::TooManyOpenFiles;
    }
    match e.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            ErrorKind::AccessDenied
        }
        io::ErrorKind::IsADirectory => ErrorKind::IsDirectory,
        io::ErrorKind::FileTooLarge => ErrorKind::TooBig,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => ErrorKind::CorruptedData,
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        io::ErrorKind::OutOfMemory => ErrorKind::NoMemory,
        io::ErrorKind::HostUnreachable => ErrorKind::HostNotFound,
        io::ErrorKind::Unsupported => ErrorKind::NotSupportedScheme,
        _ => ErrorKind::Generic,
    }
}

/// A classified failure: kind, the transport's raw code and a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub raw_code: Option<i32>,
    pub recoverable: bool,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            raw_code: None,
            recoverable: kind.is_recoverable(),
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    pub fn is_network(&self) -> bool {
        self.kind.is_network()
    }

    pub fn retry_hint(&self) -> RetryHint {
        self.kind.retry_hint()
    }
}

impl From<&RawError> for ErrorRecord {
    fn from(raw: &RawError) -> Self {
        let kind = raw.classify();
        Self {
            kind,
            raw_code: raw.raw_code(),
            recoverable: kind.is_recoverable(),
            message: raw.to_string(),
        }
    }
}

impl From<RawError> for ErrorRecord {
    fn from(raw: RawError) -> Self {
        Self::from(&raw)
    }
}

/// A request the document state machine refused to start
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("cannot {request} while the document is {state:?}")]
    InvalidState {
        request: &'static str,
        state: TabState,
    },
    #[error("this operation has already been started once")]
    AlreadyUsed,
    #[error("the document has no location yet, use save-as")]
    Untitled,
    #[error("the document is read-only, use save-as")]
    ReadOnly,
    #[error("no document with id {0}")]
    UnknownDocument(u64),
    #[error("cannot close yet: the document is {0:?}")]
    CannotCloseYet(TabState),
    #[error("there is no failed operation to retry")]
    NothingToRetry,
}
