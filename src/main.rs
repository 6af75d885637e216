//! `quill` command-line front end
//!
//! Every subcommand drives a [`Session`] to completion, so loads and saves go
//! through the same transports, detection and state machine as the editor.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;

use quill::cli::{CliArgs, Task};
use quill::config::QuillConfig;
use quill::encoding::{Encoding, EncodingRequest};
use quill::error::ErrorRecord;
use quill::model::{DocumentId, TabState};
use quill::runtime::Session;
use quill::uri::DocumentUri;

fn main() -> Result<()> {
    let args = CliArgs::parse();
    quill::tracing::init(&args.log_level);

    let task = args.into_task().map_err(anyhow::Error::msg)?;
    let config = QuillConfig::load();
    tracing::debug!("Running {:?}", task);

    match task {
        Task::Cat { uri, encoding } => cat(config, uri, encoding),
        Task::Convert {
            input,
            output,
            from,
            to,
            flags,
        } => {
            let mut session = Session::new(config);
            let id = open(&mut session, &input, from)?;
            session
                .save_as(id, output.clone(), to, flags)
                .with_context(|| format!("Cannot save {}", input))?;
            session.run_until_idle();
            if session.state(id) == Some(TabState::SavingError) {
                let err = last_error(&session, id);
                bail!(describe(&err, &output));
            }
            eprintln!("Wrote {} as {}", output, to);
            Ok(())
        }
        Task::Info { uri, encoding } => info(config, uri, encoding),
        Task::Encodings => {
            let mut out = std::io::stdout().lock();
            for encoding in Encoding::all() {
                writeln!(out, "{:<14} {}", encoding.charset(), encoding.name())?;
            }
            Ok(())
        }
    }
}

fn cat(config: QuillConfig, uri: DocumentUri, encoding: EncodingRequest) -> Result<()> {
    let mut session = Session::new(config);
    let id = open(&mut session, &uri, encoding)?;
    let document = session.document(id).context("document closed while loading")?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", document.text())?;
    Ok(())
}

fn info(config: QuillConfig, uri: DocumentUri, encoding: EncodingRequest) -> Result<()> {
    let mut session = Session::new(config);
    let id = open(&mut session, &uri, encoding)?;
    let document = session.document(id).context("document closed while loading")?;

    let mut out = std::io::stdout().lock();
    writeln!(out, "uri:          {}", uri)?;
    writeln!(
        out,
        "encoding:     {} ({})",
        document.encoding.charset(),
        document.encoding.name()
    )?;
    match document.size {
        Some(size) => writeln!(out, "size:         {} bytes", size)?,
        None => writeln!(out, "size:         unknown")?,
    }
    writeln!(out, "lines:        {}", document.line_count())?;
    writeln!(
        out,
        "content type: {}",
        document.content_type.as_deref().unwrap_or("unknown")
    )?;
    writeln!(
        out,
        "language:     {}",
        document.language.as_deref().unwrap_or("none")
    )?;
    writeln!(out, "read-only:    {}", document.read_only)?;
    Ok(())
}

/// Load `uri` into a new document and wait for it
fn open(session: &mut Session, uri: &DocumentUri, encoding: EncodingRequest) -> Result<DocumentId> {
    let id = session
        .open(uri.clone(), encoding, None)
        .with_context(|| format!("Cannot open {}", uri))?;
    session.run_until_idle();
    match session.state(id) {
        Some(TabState::Normal) => Ok(id),
        Some(TabState::LoadingError) => {
            let err = last_error(session, id);
            bail!(describe(&err, uri))
        }
        other => bail!("Loading {} ended in {:?}", uri, other),
    }
}

fn last_error(session: &Session, id: DocumentId) -> ErrorRecord {
    session
        .container(id)
        .and_then(|c| c.error.clone())
        .unwrap_or_else(ErrorRecord::cancelled)
}

fn describe(err: &ErrorRecord, uri: &DocumentUri) -> String {
    let message = err.kind.user_message(&uri.display_name());
    if err.message.is_empty() {
        message
    } else {
        format!("{}: {}", message, err.message)
    }
}
