//! Content-type sniffing
//!
//! Guesses a MIME type from the file name and the first bytes of content.

/// Number of leading bytes inspected when sniffing content
pub const MAX_SNIFF_SIZE: usize = 4096;

const OCTET_STREAM: &str = "application/octet-stream";
const PLAIN_TEXT: &str = "text/plain";

/// Extension to MIME type for the common text formats an editor opens
const EXTENSION_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("markdown", "text/markdown"),
    ("rs", "text/rust"),
    ("c", "text/x-csrc"),
    ("h", "text/x-chdr"),
    ("cpp", "text/x-c++src"),
    ("py", "text/x-python"),
    ("sh", "application/x-shellscript"),
    ("js", "application/javascript"),
    ("ts", "text/x-typescript"),
    ("json", "application/json"),
    ("yaml", "application/x-yaml"),
    ("yml", "application/x-yaml"),
    ("toml", "application/toml"),
    ("xml", "application/xml"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("ini", "text/plain"),
    ("log", "text/x-log"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("pdf", "application/pdf"),
];

/// Check if content is likely binary by scanning for null bytes
///
/// Only the first [`MAX_SNIFF_SIZE`] bytes are examined. UTF-16 text contains
/// NULs too, so a leading UTF-16 byte order mark counts as text.
pub fn is_likely_binary(content: &[u8]) -> bool {
    let head = &content[..content.len().min(MAX_SNIFF_SIZE)];
    if head.starts_with(&[0xFF, 0xFE]) || head.starts_with(&[0xFE, 0xFF]) {
        return false;
    }
    head.contains(&0)
}

/// Guess the content type from a file name and the leading content bytes
///
/// The extension wins when known. Otherwise the content decides between
/// `text/plain` and `application/octet-stream`. Returns `None` when there is
/// neither a known extension nor any content to look at.
pub fn guess_content_type(file_name: Option<&str>, content: &[u8]) -> Option<String> {
    let extension = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    if let Some(ext) = extension {
        if let Some((_, mime)) = EXTENSION_TYPES.iter().find(|(e, _)| *e == ext) {
            return Some((*mime).to_string());
        }
    }

    if content.is_empty() {
        return None;
    }
    if is_likely_binary(content) {
        Some(OCTET_STREAM.to_string())
    } else {
        Some(PLAIN_TEXT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_wins() {
        assert_eq!(
            guess_content_type(Some("notes.MD"), b"\x00\x01").as_deref(),
            Some("text/markdown")
        );
    }

    #[test]
    fn test_sniff_text_and_binary() {
        assert_eq!(
            guess_content_type(Some("README"), b"hello\n").as_deref(),
            Some("text/plain")
        );
        assert_eq!(
            guess_content_type(None, b"Hello\x00World").as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(guess_content_type(Some("empty"), b""), None);
    }

    #[test]
    fn test_only_head_is_sniffed() {
        let mut content = vec![b'a'; MAX_SNIFF_SIZE];
        content.push(0);
        assert!(!is_likely_binary(&content));
    }

    #[test]
    fn test_utf16_bom_is_text() {
        assert!(!is_likely_binary(b"\xff\xfeh\x00i\x00"));
    }
}
