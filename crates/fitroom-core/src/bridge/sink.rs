//! Client-side destinations for progress events.

use std::io::Write;

use anyhow::{Context, Result};

use crate::job::ProgressEvent;

/// Where the bridge forwards events. An error means the client is gone.
pub trait EventSink {
    fn send(&mut self, event: &ProgressEvent) -> Result<()>;
}

/// Newline-delimited JSON: one event per line, flushed per event so the
/// client sees each stage as it happens.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn send(&mut self, event: &ProgressEvent) -> Result<()> {
        serde_json::to_writer(&mut self.out, event).context("serialize progress event")?;
        self.out.write_all(b"\n").context("write progress event")?;
        self.out.flush().context("flush progress stream")?;
        Ok(())
    }
}

/// Collects events in memory.
impl EventSink for Vec<ProgressEvent> {
    fn send(&mut self, event: &ProgressEvent) -> Result<()> {
        self.push(event.clone());
        Ok(())
    }
}
