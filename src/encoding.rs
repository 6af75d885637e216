//! Encoding catalog and UTF-8 conversion
//!
//! Documents are held as UTF-8. On load, bytes are converted with [`to_utf8`],
//! either from an explicit encoding or by walking a [`DetectionChain`]. On save,
//! [`from_utf8`] converts back. Both directions are strict: a byte sequence that
//! does not decode, or a character the target charset cannot represent, is an
//! error rather than a replacement character.

use std::fmt;

use thiserror::Error;

use crate::error::{ErrorKind, ErrorRecord};

/// Pseudo-charset in the configured list that expands to the locale charset
pub const CURRENT_CHARSET: &str = "CURRENT";

/// Default auto-detection list
pub const DEFAULT_AUTO_DETECTED: &[&str] = &["UTF-8", CURRENT_CHARSET, "ISO-8859-15"];

struct EncodingInfo {
    charset: &'static str,
    name: &'static str,
    /// WHATWG label understood by `encoding_rs`, empty for the Latin tables
    label: &'static str,
}

/// ISO-8859-9 is ISO-8859-1 with these six bytes swapped for Turkish letters
const LATIN5_SUBSTITUTIONS: &[(u8, char)] = &[
    (0xD0, '\u{11E}'),
    (0xDD, '\u{130}'),
    (0xDE, '\u{15E}'),
    (0xF0, '\u{11F}'),
    (0xFD, '\u{131}'),
    (0xFE, '\u{15F}'),
];

/// Labels that WHATWG folds into windows-1252/1254 but which name the ISO tables
const LATIN_ALIASES: &[(&str, &str)] = &[
    ("latin1", "ISO-8859-1"),
    ("l1", "ISO-8859-1"),
    ("iso8859-1", "ISO-8859-1"),
    ("iso88591", "ISO-8859-1"),
    ("iso_8859-1", "ISO-8859-1"),
    ("iso_8859-1:1987", "ISO-8859-1"),
    ("iso-ir-100", "ISO-8859-1"),
    ("csisolatin1", "ISO-8859-1"),
    ("cp819", "ISO-8859-1"),
    ("ibm819", "ISO-8859-1"),
    ("latin5", "ISO-8859-9"),
    ("l5", "ISO-8859-9"),
    ("iso8859-9", "ISO-8859-9"),
    ("iso88599", "ISO-8859-9"),
    ("iso_8859-9", "ISO-8859-9"),
    ("iso_8859-9:1989", "ISO-8859-9"),
    ("iso-ir-148", "ISO-8859-9"),
    ("csisolatin5", "ISO-8859-9"),
];

static CATALOG: &[EncodingInfo] = &[
    EncodingInfo { charset: "UTF-8", name: "Unicode", label: "utf-8" },
    EncodingInfo { charset: "UTF-16LE", name: "Unicode", label: "utf-16le" },
    EncodingInfo { charset: "UTF-16BE", name: "Unicode", label: "utf-16be" },
    EncodingInfo { charset: "ISO-8859-1", name: "Western", label: "" },
    EncodingInfo { charset: "ISO-8859-2", name: "Central European", label: "iso-8859-2" },
    EncodingInfo { charset: "ISO-8859-3", name: "South European", label: "iso-8859-3" },
    EncodingInfo { charset: "ISO-8859-4", name: "Baltic", label: "iso-8859-4" },
    EncodingInfo { charset: "ISO-8859-5", name: "Cyrillic", label: "iso-8859-5" },
    EncodingInfo { charset: "ISO-8859-6", name: "Arabic", label: "iso-8859-6" },
    EncodingInfo { charset: "ISO-8859-7", name: "Greek", label: "iso-8859-7" },
    EncodingInfo { charset: "ISO-8859-8", name: "Hebrew Visual", label: "iso-8859-8" },
    EncodingInfo { charset: "ISO-8859-8-I", name: "Hebrew", label: "iso-8859-8-i" },
    EncodingInfo { charset: "ISO-8859-9", name: "Turkish", label: "" },
    EncodingInfo { charset: "ISO-8859-10", name: "Nordic", label: "iso-8859-10" },
    EncodingInfo { charset: "ISO-8859-13", name: "Baltic", label: "iso-8859-13" },
    EncodingInfo { charset: "ISO-8859-14", name: "Celtic", label: "iso-8859-14" },
    EncodingInfo { charset: "ISO-8859-15", name: "Western", label: "iso-8859-15" },
    EncodingInfo { charset: "ISO-8859-16", name: "Romanian", label: "iso-8859-16" },
    EncodingInfo { charset: "BIG5", name: "Chinese Traditional", label: "big5" },
    EncodingInfo { charset: "CP866", name: "Cyrillic/Russian", label: "ibm866" },
    EncodingInfo { charset: "EUC-JP", name: "Japanese", label: "euc-jp" },
    EncodingInfo { charset: "EUC-KR", name: "Korean", label: "euc-kr" },
    EncodingInfo { charset: "GB18030", name: "Chinese Simplified", label: "gb18030" },
    EncodingInfo { charset: "GBK", name: "Chinese Simplified", label: "gbk" },
    EncodingInfo { charset: "ISO-2022-JP", name: "Japanese", label: "iso-2022-jp" },
    EncodingInfo { charset: "KOI8-R", name: "Cyrillic", label: "koi8-r" },
    EncodingInfo { charset: "KOI8-U", name: "Cyrillic/Ukrainian", label: "koi8-u" },
    EncodingInfo { charset: "MAC-CYRILLIC", name: "Cyrillic", label: "x-mac-cyrillic" },
    EncodingInfo { charset: "MAC-ROMAN", name: "Western", label: "macintosh" },
    EncodingInfo { charset: "SHIFT_JIS", name: "Japanese", label: "shift_jis" },
    EncodingInfo { charset: "TIS-620", name: "Thai", label: "windows-874" },
    EncodingInfo { charset: "WINDOWS-1250", name: "Central European", label: "windows-1250" },
    EncodingInfo { charset: "WINDOWS-1251", name: "Cyrillic", label: "windows-1251" },
    EncodingInfo { charset: "WINDOWS-1252", name: "Western", label: "windows-1252" },
    EncodingInfo { charset: "WINDOWS-1253", name: "Greek", label: "windows-1253" },
    EncodingInfo { charset: "WINDOWS-1254", name: "Turkish", label: "windows-1254" },
    EncodingInfo { charset: "WINDOWS-1255", name: "Hebrew", label: "windows-1255" },
    EncodingInfo { charset: "WINDOWS-1256", name: "Arabic", label: "windows-1256" },
    EncodingInfo { charset: "WINDOWS-1257", name: "Baltic", label: "windows-1257" },
    EncodingInfo { charset: "WINDOWS-1258", name: "Vietnamese", label: "windows-1258" },
];

#[derive(Clone, Copy, PartialEq)]
enum Codec {
    Whatwg(&'static encoding_rs::Encoding),
    /// Each byte is the code point of the same value, except for the listed substitutions
    Latin(&'static [(u8, char)]),
}

impl Codec {
    fn decode_latin(bytes: &[u8], substitutions: &[(u8, char)]) -> String {
        bytes
            .iter()
            .map(|&b| {
                substitutions
                    .iter()
                    .find(|&&(byte, _)| byte == b)
                    .map_or(char::from(b), |&(_, c)| c)
            })
            .collect()
    }

    fn encode_latin(text: &str, substitutions: &[(u8, char)]) -> Option<Vec<u8>> {
        text.chars()
            .map(|c| {
                if let Some(&(byte, _)) = substitutions.iter().find(|&&(_, sub)| sub == c) {
                    return Some(byte);
                }
                let byte = u8::try_from(u32::from(c)).ok()?;
                if substitutions.iter().any(|&(b, _)| b == byte) {
                    None
                } else {
                    Some(byte)
                }
            })
            .collect()
    }
}

/// A charset from the catalog
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Encoding {
    index: usize,
}

impl Encoding {
    pub const UTF_8: Encoding = Encoding { index: 0 };

    /// All catalog entries, in catalog order
    pub fn all() -> impl Iterator<Item = Encoding> {
        (0..CATALOG.len()).map(|index| Encoding { index })
    }

    /// Look up a charset by name or alias, case-insensitively
    pub fn from_charset(charset: &str) -> Option<Encoding> {
        let charset = charset.trim();
        if let Some(index) = CATALOG
            .iter()
            .position(|info| info.charset.eq_ignore_ascii_case(charset))
        {
            return Some(Encoding { index });
        }

        if let Some(&(_, name)) = LATIN_ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(charset))
        {
            return Self::from_charset(name);
        }

        // Other aliases ("utf8", "cp1252", ...) resolve through the WHATWG labels
        let target = encoding_rs::Encoding::for_label(charset.as_bytes())?;
        let mut matches = Self::all().filter(|enc| enc.codec() == Some(Codec::Whatwg(target)));
        let first = matches.next()?;
        Some(
            std::iter::once(first)
                .chain(matches)
                .find(|enc| enc.charset().eq_ignore_ascii_case(target.name()))
                .unwrap_or(first),
        )
    }

    /// The charset of the current locale
    ///
    /// Reads `LC_ALL`, `LC_CTYPE` then `LANG`. Locales without a codeset, and
    /// the `C`/`POSIX` locale, are treated as UTF-8.
    pub fn current() -> Encoding {
        let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty());

        let Some(locale) = locale else {
            return Self::UTF_8;
        };
        match charset_from_locale(&locale) {
            Some(codeset) => Self::from_charset(codeset).unwrap_or_else(|| {
                tracing::warn!("Unknown locale charset '{}', assuming UTF-8", codeset);
                Self::UTF_8
            }),
            None => Self::UTF_8,
        }
    }

    pub fn charset(self) -> &'static str {
        CATALOG[self.index].charset
    }

    /// Human-readable script or region name
    pub fn name(self) -> &'static str {
        CATALOG[self.index].name
    }

    pub fn is_utf8(self) -> bool {
        self == Self::UTF_8
    }

    fn codec(self) -> Option<Codec> {
        match CATALOG[self.index].charset {
            "ISO-8859-1" => Some(Codec::Latin(&[])),
            "ISO-8859-9" => Some(Codec::Latin(LATIN5_SUBSTITUTIONS)),
            _ => encoding_rs::Encoding::for_label(CATALOG[self.index].label.as_bytes())
                .map(Codec::Whatwg),
        }
    }

    /// Strictly decode `bytes`, returning `None` on any malformed sequence
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        if self.is_utf8() {
            return std::str::from_utf8(bytes).ok().map(str::to_owned);
        }
        match self.codec()? {
            Codec::Latin(substitutions) => Some(Codec::decode_latin(bytes, substitutions)),
            Codec::Whatwg(codec) => codec
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned()),
        }
    }

    /// Strictly encode `text`, returning `None` if a character is unmappable
    pub fn encode(self, text: &str) -> Option<Vec<u8>> {
        let codec = match self.codec()? {
            Codec::Latin(substitutions) => return Codec::encode_latin(text, substitutions),
            Codec::Whatwg(codec) => codec,
        };
        if codec == encoding_rs::UTF_8 {
            return Some(text.as_bytes().to_vec());
        }
        // encoding_rs only decodes UTF-16; its encoder emits UTF-8 instead
        if codec == encoding_rs::UTF_16LE {
            return Some(text.encode_utf16().flat_map(u16::to_le_bytes).collect());
        }
        if codec == encoding_rs::UTF_16BE {
            return Some(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
        }

        let (bytes, _, had_unmappable) = codec.encode(text);
        if had_unmappable {
            None
        } else {
            Some(bytes.into_owned())
        }
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encoding({})", self.charset())
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.charset())
    }
}

/// Extract the codeset from a POSIX locale name like `de_DE.ISO-8859-1@euro`
pub fn charset_from_locale(locale: &str) -> Option<&str> {
    if locale == "C" || locale == "POSIX" {
        return None;
    }
    let (_, rest) = locale.split_once('.')?;
    let codeset = rest.split('@').next().unwrap_or(rest);
    if codeset.is_empty() {
        None
    } else {
        Some(codeset)
    }
}

/// Which encoding a load should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingRequest {
    /// Walk the detection chain
    #[default]
    Auto,
    Explicit(Encoding),
}

impl From<Encoding> for EncodingRequest {
    fn from(encoding: Encoding) -> Self {
        Self::Explicit(encoding)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("could not determine the character encoding")]
    AutoDetectFailed,
    #[error("invalid byte sequence for {charset}")]
    IllegalSequence { charset: &'static str },
}

impl From<ConvertError> for ErrorRecord {
    fn from(err: ConvertError) -> Self {
        let kind = match err {
            ConvertError::AutoDetectFailed => ErrorKind::AutoDetectFailed,
            ConvertError::IllegalSequence { .. } => ErrorKind::IllegalSequence,
        };
        ErrorRecord::new(kind, err.to_string())
    }
}

/// Ordered candidates tried when no explicit encoding is given
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionChain {
    candidates: Vec<Encoding>,
}

impl DetectionChain {
    /// Build from configured charset names using the process locale
    pub fn from_config<S: AsRef<str>>(names: &[S]) -> Self {
        Self::with_locale(names, Encoding::current())
    }

    /// Build from configured charset names for a given locale charset
    ///
    /// A non-UTF-8 locale charset is tried first. `CURRENT` expands to the
    /// locale charset. Unknown names are skipped and duplicates dropped.
    pub fn with_locale<S: AsRef<str>>(names: &[S], locale: Encoding) -> Self {
        let mut candidates = Vec::new();
        if !locale.is_utf8() {
            candidates.push(locale);
        }
        for name in names {
            let name = name.as_ref();
            let encoding = if name.eq_ignore_ascii_case(CURRENT_CHARSET) {
                Some(locale)
            } else {
                Encoding::from_charset(name)
            };
            match encoding {
                Some(enc) if !candidates.contains(&enc) => candidates.push(enc),
                Some(_) => {}
                None => tracing::warn!("Skipping unknown encoding '{}' in detection list", name),
            }
        }
        Self { candidates }
    }

    pub fn candidates(&self) -> &[Encoding] {
        &self.candidates
    }

    /// Try each candidate in order
    pub fn detect(&self, bytes: &[u8]) -> Result<(String, Encoding), ConvertError> {
        for &candidate in &self.candidates {
            tracing::debug!("Trying encoding {}", candidate.charset());
            if let Some(text) = candidate.decode(bytes) {
                return Ok((text, candidate));
            }
        }
        Err(ConvertError::AutoDetectFailed)
    }
}

impl Default for DetectionChain {
    fn default() -> Self {
        Self::from_config(DEFAULT_AUTO_DETECTED)
    }
}

/// Convert bytes to UTF-8 using the default detection chain for `Auto`
pub fn to_utf8(
    bytes: &[u8],
    request: EncodingRequest,
) -> Result<(String, Encoding), ConvertError> {
    to_utf8_with_chain(bytes, request, &DetectionChain::default())
}

/// Convert bytes to UTF-8
///
/// Input that is already valid UTF-8 is returned unchanged for `Auto`.
pub fn to_utf8_with_chain(
    bytes: &[u8],
    request: EncodingRequest,
    chain: &DetectionChain,
) -> Result<(String, Encoding), ConvertError> {
    match request {
        EncodingRequest::Explicit(encoding) => encoding
            .decode(bytes)
            .map(|text| (text, encoding))
            .ok_or(ConvertError::IllegalSequence {
                charset: encoding.charset(),
            }),
        EncodingRequest::Auto => {
            if let Ok(text) = std::str::from_utf8(bytes) {
                return Ok((text.to_owned(), Encoding::UTF_8));
            }
            chain.detect(bytes)
        }
    }
}

/// Convert UTF-8 text to `encoding`
pub fn from_utf8(text: &str, encoding: Encoding) -> Result<Vec<u8>, ConvertError> {
    encoding.encode(text).ok_or(ConvertError::IllegalSequence {
        charset: encoding.charset(),
    })
}
