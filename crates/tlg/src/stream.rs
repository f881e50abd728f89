//! Streaming NDJSON output
//!
//! Turns [`RunEvent`]s into one JSON object per line as they arrive, so a
//! caller sees entries while the run is still collecting.

use std::io::{self, Write};

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::generator::{RunEvent, RunStatus};
use crate::result::FlawedPage;

/// Writes run events as newline-delimited JSON
pub struct NdjsonWriter<W: Write> {
    out: W,
    lines: usize,
}

impl<W: Write> NdjsonWriter<W> {
    /// Wrap an output
    pub fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    /// Lines written so far
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Write one event and flush
    pub fn write_event(&mut self, event: &RunEvent) -> io::Result<()> {
        let line = match event {
            RunEvent::Status(message) => json!({ "status": message }),
            RunEvent::Progress { done, total } => {
                json!({ "progress": format!("{}/{}", done, total) })
            }
            RunEvent::Entry(entry) => entry_json(entry),
            RunEvent::Finished { status, meta } => match status {
                RunStatus::Aborted(e) => json!({ "exception": e.to_string() }),
                _ => json!({ "finished": { "status": status.to_string(), "meta": meta } }),
            },
        };
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &Value) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, line)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        self.lines += 1;
        Ok(())
    }

    /// Unwrap the output
    pub fn into_inner(self) -> W {
        self.out
    }
}

fn entry_json(entry: &FlawedPage) -> Value {
    let flaws: Vec<Value> = entry
        .evidence
        .notes
        .iter()
        .map(|note| json!({ "name": note.filter, "infotext": note.info, "done": note.done }))
        .collect();
    json!({ "page": entry.page, "revision": entry.revision, "flaws": flaws })
}

/// Write events until the run finishes or the sender goes away.
///
/// Returns the terminal status, if one was seen.
pub async fn pump<W: Write>(
    mut events: mpsc::UnboundedReceiver<RunEvent>,
    writer: &mut NdjsonWriter<W>,
) -> io::Result<Option<RunStatus>> {
    while let Some(event) = events.recv().await {
        writer.write_event(&event)?;
        if let RunEvent::Finished { status, .. } = event {
            return Ok(Some(status));
        }
    }
    Ok(None)
}
