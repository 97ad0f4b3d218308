//! [`InferenceEngine`] backed by a long-lived worker process.
//!
//! The worker owns the accelerator memory: `load` spawns it and asks it to
//! load weights, `unload` shuts it down and reaps it, so the OS reclaims
//! everything even if the worker leaks.

mod ipc;

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::intake::InputImage;
use crate::mask::{Mask, MaskCandidate};
use crate::residency::SlotKey;

use super::{EngineError, InferenceEngine, PreparedInput, RawOutput};
use ipc::{EngineCommand, EnginePayload, EngineReply, EngineRequest};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Engine adapter for one slot's worker executable.
pub struct ProcessEngine {
    key: SlotKey,
    config: EngineConfig,
    worker: Option<Worker>,
    next_id: u64,
}

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Hand-off images for segment/run requests; removed with the worker.
    scratch: tempfile::TempDir,
}

impl ProcessEngine {
    pub fn new(key: SlotKey, config: EngineConfig) -> Self {
        Self {
            key,
            config,
            worker: None,
            next_id: 1,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn spawn(&self) -> Result<Worker, EngineError> {
        tracing::info!(
            slot = %self.key,
            command = %self.config.command.display(),
            "spawning engine worker"
        );
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => EngineError::Unavailable(format!(
                    "engine executable {} not found",
                    self.config.command.display()
                )),
                _ => EngineError::Init(format!("spawn {}: {e}", self.config.command.display())),
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            reap(&mut child);
            return Err(EngineError::Init("worker pipes unavailable".to_string()));
        };
        let scratch = match tempfile::Builder::new().prefix("fitroom-engine-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                reap(&mut child);
                return Err(EngineError::Init(format!("create scratch dir: {e}")));
            }
        };
        Ok(Worker {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            scratch,
        })
    }

    /// Send one request and wait for the reply with the same id.
    fn request(&mut self, command: EngineCommand) -> Result<EnginePayload, EngineError> {
        let id = self.next_id;
        self.next_id += 1;
        let Some(worker) = self.worker.as_mut() else {
            return Err(EngineError::Run(format!("{} engine is not loaded", self.key)));
        };
        let result = worker.request(&EngineRequest { id, command });
        // The stream is out of step or closed; nothing more can be said to this worker.
        if let Err(EngineError::Protocol(msg)) = &result {
            tracing::warn!(slot = %self.key, "dropping engine worker: {}", msg);
            if let Some(worker) = self.worker.take() {
                worker.stop();
            }
        }
        result
    }

    fn scratch_file(&self, name: &str) -> Option<PathBuf> {
        let worker = self.worker.as_ref()?;
        Some(worker.scratch.path().join(format!("{name}_{}.png", self.next_id)))
    }
}

impl Worker {
    fn request(&mut self, request: &EngineRequest) -> Result<EnginePayload, EngineError> {
        let line = serde_json::to_string(request).map_err(|e| EngineError::Protocol(format!("serialize request: {e}")))?;
        writeln!(self.stdin, "{line}")
            .and_then(|()| self.stdin.flush())
            .map_err(|e| EngineError::Protocol(format!("write to worker: {e}")))?;

        let mut buf = String::new();
        loop {
            buf.clear();
            let n = self
                .stdout
                .read_line(&mut buf)
                .map_err(|e| EngineError::Protocol(format!("read from worker: {e}")))?;
            if n == 0 {
                return Err(EngineError::Protocol("worker closed its output".to_string()));
            }
            let text = buf.trim();
            if text.is_empty() {
                continue;
            }
            let reply: EngineReply = serde_json::from_str(text)
                .map_err(|e| EngineError::Protocol(format!("bad reply {text:?}: {e}")))?;
            if reply.id != request.id {
                tracing::debug!(expected = request.id, got = reply.id, "skipping stale worker reply");
                continue;
            }
            return Ok(reply.payload);
        }
    }

    /// Ask the worker to exit, give it a short grace period, then kill and reap.
    fn stop(self) {
        let Worker {
            mut child,
            mut stdin,
            ..
        } = self;
        let bye = EngineRequest {
            id: 0,
            command: EngineCommand::Shutdown,
        };
        if let Ok(line) = serde_json::to_string(&bye) {
            let _ = writeln!(stdin, "{line}").and_then(|()| stdin.flush());
        }
        drop(stdin);

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) | Err(_) => break,
                Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            }
        }
        reap(&mut child);
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl InferenceEngine for ProcessEngine {
    fn load(&mut self) -> Result<(), EngineError> {
        if self.worker.is_some() {
            return Ok(());
        }
        if !self.config.checkpoint.exists() {
            return Err(EngineError::Unavailable(format!(
                "checkpoint {} not found",
                self.config.checkpoint.display()
            )));
        }

        self.worker = Some(self.spawn()?);
        let checkpoint = self.config.checkpoint.clone();
        let result = match self.request(EngineCommand::Load { checkpoint }) {
            Ok(EnginePayload::Loaded) => Ok(()),
            Ok(EnginePayload::Error { message }) => Err(EngineError::Init(message)),
            Ok(other) => Err(EngineError::Protocol(format!("expected loaded, got {}", other.name()))),
            Err(EngineError::Protocol(msg)) => Err(EngineError::Init(format!("worker died during load: {msg}"))),
            Err(e) => Err(e),
        };
        if result.is_err() {
            if let Some(worker) = self.worker.take() {
                worker.stop();
            }
        }
        result
    }

    fn unload(&mut self) {
        if let Some(worker) = self.worker.take() {
            tracing::info!(slot = %self.key, "stopping engine worker");
            worker.stop();
        }
    }

    fn run(&mut self, input: &PreparedInput) -> Result<RawOutput, EngineError> {
        let path = self
            .scratch_file("prepared")
            .ok_or_else(|| EngineError::Run(format!("{} engine is not loaded", self.key)))?;
        save_rgba(&path, input)?;

        match self.request(EngineCommand::Run {
            image: path,
            seed: input.seed,
        })? {
            EnginePayload::Output { subjects } => Ok(RawOutput { subjects }),
            EnginePayload::Error { message } => Err(EngineError::Run(message)),
            other => Err(EngineError::Protocol(format!("expected output, got {}", other.name()))),
        }
    }

    fn segment_candidates(&mut self, image: &InputImage) -> Vec<MaskCandidate> {
        let Some(path) = self.scratch_file("source") else {
            tracing::warn!(slot = %self.key, "segmentation requested with no worker running");
            return Vec::new();
        };
        if let Err(e) = image.save_png(&path) {
            tracing::warn!(slot = %self.key, "could not hand image to worker: {}", e);
            return Vec::new();
        }

        match self.request(EngineCommand::Segment { image: path }) {
            Ok(EnginePayload::Candidates {
                width,
                height,
                candidates,
            }) => {
                let total = candidates.len();
                let decoded: Vec<MaskCandidate> = candidates
                    .into_iter()
                    .filter_map(|c| Mask::from_runs(width, height, &c.runs).map(|m| MaskCandidate::new(m, c.score)))
                    .collect();
                if decoded.len() < total {
                    tracing::warn!(dropped = total - decoded.len(), "discarded malformed mask candidates");
                }
                decoded
            }
            Ok(EnginePayload::Error { message }) => {
                tracing::warn!(slot = %self.key, "segmentation unavailable: {}", message);
                Vec::new()
            }
            Ok(other) => {
                tracing::warn!(slot = %self.key, "expected candidates, got {}", other.name());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(slot = %self.key, "segmentation failed: {}", e);
                Vec::new()
            }
        }
    }

    fn still_loaded(&mut self) -> bool {
        let Some(worker) = self.worker.as_mut() else {
            return false;
        };
        match worker.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::warn!(slot = %self.key, %status, "engine worker exited on its own");
                self.worker = None;
                false
            }
            Err(e) => {
                tracing::warn!(slot = %self.key, "could not poll engine worker: {}", e);
                true
            }
        }
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            reap(&mut worker.child);
        }
    }
}

fn save_rgba(path: &Path, input: &PreparedInput) -> Result<(), EngineError> {
    image::save_buffer(
        path,
        &input.rgba,
        input.width,
        input.height,
        image::ExtendedColorType::Rgba8,
    )
    .map_err(|e| EngineError::Run(format!("write prepared input: {e}")))
}
