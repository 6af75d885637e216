//! Command-line argument parsing for the `quill` binary
//!
//! Supports:
//! - Printing a document as UTF-8, with detection or a forced charset
//! - Converting a document to another charset and location
//! - Showing what a load detects about a document
//! - Listing the encoding catalog

use clap::{Parser, Subcommand};

use crate::encoding::{Encoding, EncodingRequest};
use crate::saver::SaveFlags;
use crate::uri::DocumentUri;

/// Load, convert and inspect text documents
#[derive(Parser, Debug)]
#[command(name = "quill", version, about = "Load, convert and inspect text documents")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Console log level when RUST_LOG is unset
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print a document's text as UTF-8
    Cat {
        /// Location or path of the document
        uri: String,
        /// Decode with this charset instead of detecting one
        #[arg(short, long, value_name = "CHARSET")]
        encoding: Option<String>,
    },

    /// Re-encode a document into another location
    Convert {
        input: String,
        output: String,
        /// Charset to write
        #[arg(long, value_name = "CHARSET")]
        to: String,
        /// Charset to read, detected when omitted
        #[arg(long, value_name = "CHARSET")]
        from: Option<String>,
        /// Do not keep a backup of an existing output file
        #[arg(long)]
        no_backup: bool,
    },

    /// Show the detected encoding, size and type of a document
    Info {
        uri: String,
        #[arg(short, long, value_name = "CHARSET")]
        encoding: Option<String>,
    },

    /// List the supported charsets
    Encodings,
}

/// A parsed, validated invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Cat {
        uri: DocumentUri,
        encoding: EncodingRequest,
    },
    Convert {
        input: DocumentUri,
        output: DocumentUri,
        from: EncodingRequest,
        to: Encoding,
        flags: SaveFlags,
    },
    Info {
        uri: DocumentUri,
        encoding: EncodingRequest,
    },
    Encodings,
}

impl CliArgs {
    /// Resolve uris and charset names
    pub fn into_task(self) -> Result<Task, String> {
        let task = match self.command {
            CliCommand::Cat { uri, encoding } => Task::Cat {
                uri: parse_uri(&uri)?,
                encoding: parse_request(encoding.as_deref())?,
            },
            CliCommand::Convert {
                input,
                output,
                to,
                from,
                no_backup,
            } => {
                let mut flags = SaveFlags::default();
                if no_backup {
                    flags = flags.ignoring_backup();
                }
                Task::Convert {
                    input: parse_uri(&input)?,
                    output: parse_uri(&output)?,
                    from: parse_request(from.as_deref())?,
                    to: parse_encoding(&to)?,
                    flags,
                }
            }
            CliCommand::Info { uri, encoding } => Task::Info {
                uri: parse_uri(&uri)?,
                encoding: parse_request(encoding.as_deref())?,
            },
            CliCommand::Encodings => Task::Encodings,
        };
        Ok(task)
    }
}

fn parse_uri(input: &str) -> Result<DocumentUri, String> {
    DocumentUri::parse(input).map_err(|e| e.to_string())
}

/// Look up a charset name or alias from the catalog
pub fn parse_encoding(name: &str) -> Result<Encoding, String> {
    Encoding::from_charset(name).ok_or_else(|| format!("Unknown encoding '{}'", name))
}

fn parse_request(name: Option<&str>) -> Result<EncodingRequest, String> {
    match name {
        None => Ok(EncodingRequest::Auto),
        Some(name) => parse_encoding(name).map(EncodingRequest::Explicit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Task, String> {
        let args = CliArgs::try_parse_from(std::iter::once("quill").chain(args.iter().copied()))
            .map_err(|e| e.to_string())?;
        args.into_task()
    }

    #[test]
    fn test_cat_detects_by_default() {
        let task = parse(&["cat", "/tmp/notes.txt"]).unwrap();
        match task {
            Task::Cat { uri, encoding } => {
                assert_eq!(uri.scheme(), "file");
                assert_eq!(encoding, EncodingRequest::Auto);
            }
            other => panic!("Expected Cat, got {:?}", other),
        }
    }

    #[test]
    fn test_cat_with_alias() {
        let task = parse(&["cat", "/tmp/notes.txt", "--encoding", "latin1"]).unwrap();
        let Task::Cat { encoding, .. } = task else {
            panic!("Expected Cat");
        };
        assert!(matches!(encoding, EncodingRequest::Explicit(_)));
    }

    #[test]
    fn test_convert() {
        let task = parse(&[
            "convert",
            "/tmp/in.txt",
            "sftp://host/out.txt",
            "--to",
            "UTF-16LE",
            "--no-backup",
        ])
        .unwrap();
        let Task::Convert {
            output, to, flags, from, ..
        } = task
        else {
            panic!("Expected Convert");
        };
        assert_eq!(output.scheme(), "sftp");
        assert_eq!(to.charset(), "UTF-16LE");
        assert_eq!(from, EncodingRequest::Auto);
        assert!(flags.ignore_backup);
    }

    #[test]
    fn test_unknown_encoding() {
        let err = parse(&["convert", "a.txt", "b.txt", "--to", "klingon"]).unwrap_err();
        assert!(err.contains("klingon"));
    }

    #[test]
    fn test_convert_requires_target_charset() {
        assert!(parse(&["convert", "a.txt", "b.txt"]).is_err());
    }

    #[test]
    fn test_log_level_is_global() {
        let args = CliArgs::try_parse_from(["quill", "encodings", "--log-level", "debug"]).unwrap();
        assert_eq!(args.log_level, "debug");
        assert_eq!(args.into_task().unwrap(), Task::Encodings);
    }
}
