//! Document locations
//!
//! A [`DocumentUri`] is either `scheme://authority/path` or a bare filesystem
//! path, which is normalised to a `file://` uri. Paths are kept percent-encoded
//! in the uri text and decoded on the way out.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{ErrorKind, ErrorRecord};

/// Scheme used for local files
pub const FILE_SCHEME: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentUri {
    raw: String,
    scheme_len: usize,
}

impl DocumentUri {
    /// Parse a uri or a bare path
    pub fn parse(input: &str) -> Result<Self, ErrorRecord> {
        let input = input.trim();
        if input.is_empty() {
            return Err(invalid(input));
        }

        match split_scheme(input) {
            Some((scheme, rest)) => {
                if !rest.starts_with("//") {
                    return Err(invalid(input));
                }
                let scheme = scheme.to_ascii_lowercase();
                let raw = format!("{}:{}", scheme, rest);
                Ok(Self {
                    scheme_len: scheme.len(),
                    raw,
                })
            }
            None => Ok(Self::from_path(Path::new(input))),
        }
    }

    /// Build a `file://` uri from a filesystem path
    ///
    /// Relative paths are resolved against the current directory.
    pub fn from_path(path: &Path) -> Self {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        let encoded = percent_encode(&absolute.to_string_lossy());
        Self {
            raw: format!("{}://{}", FILE_SCHEME, encoded),
            scheme_len: FILE_SCHEME.len(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_len]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Everything after `scheme://`
    pub fn location(&self) -> &str {
        &self.raw[self.scheme_len + 3..]
    }

    pub fn host(&self) -> &str {
        let location = self.location();
        match location.find('/') {
            Some(idx) => &location[..idx],
            None => location,
        }
    }

    /// Decoded path component, starting with `/`
    pub fn path(&self) -> String {
        let location = self.location();
        match location.find('/') {
            Some(idx) => percent_decode(&location[idx..]),
            None => "/".to_string(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.scheme() == FILE_SCHEME
    }

    /// The filesystem path for `file://` uris
    pub fn local_path(&self) -> Option<PathBuf> {
        if !self.is_local() {
            return None;
        }
        let host = self.host();
        if !host.is_empty() && host != "localhost" {
            return None;
        }
        Some(PathBuf::from(self.path()))
    }

    /// Last path segment, decoded
    pub fn file_name(&self) -> Option<String> {
        let path = self.path();
        let name = path.trim_end_matches('/').rsplit('/').next()?;
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    /// Name to show in titles and messages
    pub fn display_name(&self) -> String {
        self.file_name().unwrap_or_else(|| self.raw.clone())
    }

    /// A sibling uri with `suffix` appended to the last segment
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            raw: format!("{}{}", self.raw, percent_encode(suffix)),
            scheme_len: self.scheme_len,
        }
    }
}

impl FromStr for DocumentUri {
    type Err = ErrorRecord;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&Path> for DocumentUri {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}

fn invalid(input: &str) -> ErrorRecord {
    ErrorRecord::new(ErrorKind::InvalidUri, format!("'{}' is not a valid location", input))
}

/// Split `scheme:rest` if `input` starts with a syntactically valid scheme.
///
/// Single letters are not treated as schemes so `C:\foo` stays a path.
fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let colon = input.find(':')?;
    let scheme = &input[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() || scheme.len() < 2 {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some((scheme, &input[colon + 1..]))
    } else {
        None
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
