//! Progress bridge: run a job on a blocking worker and relay its events to an
//! async consumer through a bounded channel.
//!
//! The worker blocks when the channel is full; events are never dropped. The
//! consumer polls with a short timeout and checks worker liveness when idle,
//! so a worker that dies without a terminal event still ends the stream (with
//! a synthesized `Failed` event).

mod sink;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::BridgeConfig;
use crate::job::{ErrorKind, Job, JobRunner, ProgressEvent};

pub use sink::{EventSink, JsonLinesSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    pub channel_capacity: usize,
    pub poll_interval: Duration,
    pub join_timeout: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for BridgeSettings {
    fn from(cfg: &BridgeConfig) -> Self {
        Self {
            channel_capacity: cfg.channel_capacity.max(1),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
            join_timeout: Duration::from_millis(cfg.join_timeout_ms),
        }
    }
}

/// How a stream ended.
#[derive(Debug)]
pub struct BridgeReport {
    /// Last event of the stream; always `Complete` or `Failed`.
    pub terminal: ProgressEvent,
    /// True when the terminal event was made up by the bridge.
    pub synthesized: bool,
    /// Events successfully handed to the sink.
    pub forwarded: usize,
    /// Worker exited within the join timeout.
    pub worker_joined: bool,
    /// The finished job, when the worker returned normally.
    pub job: Option<Job>,
}

pub struct ProgressBridge {
    runner: Arc<JobRunner>,
    settings: BridgeSettings,
}

impl ProgressBridge {
    pub fn new(runner: Arc<JobRunner>, settings: BridgeSettings) -> Self {
        Self { runner, settings }
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Run `job` on a blocking worker and forward its events to `sink` until
    /// the terminal event. A failing sink stops forwarding, but the channel is
    /// still drained so the worker never blocks on a dead client.
    pub async fn stream<S>(&self, job: Job, sink: &mut S) -> BridgeReport
    where
        S: EventSink + ?Sized,
    {
        let job_id = job.id();
        let (tx, mut rx) = mpsc::channel(self.settings.channel_capacity);
        let runner = Arc::clone(&self.runner);
        let mut worker = tokio::task::spawn_blocking(move || {
            let mut job = job;
            match runner.run(&mut job, Some(&tx)) {
                Ok(artifacts) => tracing::debug!(job_id, artifacts = artifacts.len(), "bridge worker finished"),
                Err(e) => tracing::debug!(job_id, kind = %e.kind(), "bridge worker finished with error"),
            }
            job
        });

        let mut relay = Relay {
            sink,
            sink_open: true,
            forwarded: 0,
            last_progress: 0,
            terminal: None,
        };

        loop {
            match tokio::time::timeout(self.settings.poll_interval, rx.recv()).await {
                Ok(Some(event)) => {
                    if relay.handle(event) {
                        break;
                    }
                }
                // Every sender dropped: the worker is gone and the buffer is empty.
                Ok(None) => break,
                Err(_) => {
                    if worker.is_finished() {
                        while let Ok(event) = rx.try_recv() {
                            if relay.handle(event) {
                                break;
                            }
                        }
                        break;
                    }
                }
            }
        }

        let synthesized = relay.terminal.is_none();
        let terminal = match relay.terminal.take() {
            Some(event) => event,
            None => {
                tracing::error!(job_id, "worker exited without a terminal event");
                let event = ProgressEvent::failure(
                    job_id,
                    relay.last_progress,
                    ErrorKind::InferenceError,
                    "worker exited without reporting a result",
                );
                relay.handle(event.clone());
                event
            }
        };
        drop(rx);

        let (worker_joined, job) = match tokio::time::timeout(self.settings.join_timeout, &mut worker).await {
            Ok(Ok(job)) => (true, Some(job)),
            Ok(Err(e)) => {
                tracing::error!(job_id, "job worker panicked: {}", e);
                (true, None)
            }
            Err(_) => {
                tracing::warn!(
                    job_id,
                    timeout_ms = self.settings.join_timeout.as_millis() as u64,
                    "job worker still running after stream ended"
                );
                (false, None)
            }
        };

        BridgeReport {
            terminal,
            synthesized,
            forwarded: relay.forwarded,
            worker_joined,
            job,
        }
    }
}

struct Relay<'a, S: EventSink + ?Sized> {
    sink: &'a mut S,
    sink_open: bool,
    forwarded: usize,
    last_progress: u8,
    terminal: Option<ProgressEvent>,
}

impl<S: EventSink + ?Sized> Relay<'_, S> {
    /// Forward one event; returns true once the terminal event has been seen.
    fn handle(&mut self, event: ProgressEvent) -> bool {
        self.last_progress = self.last_progress.max(event.progress);
        if self.sink_open {
            match self.sink.send(&event) {
                Ok(()) => self.forwarded += 1,
                Err(e) => {
                    tracing::warn!(job_id = event.job_id, "progress client gone, draining without forwarding: {:#}", e);
                    self.sink_open = false;
                }
            }
        }
        if event.is_terminal() {
            self.terminal = Some(event);
            true
        } else {
            false
        }
    }
}
