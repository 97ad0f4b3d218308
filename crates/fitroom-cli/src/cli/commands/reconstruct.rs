//! `fitroom reconstruct` – run jobs through the progress bridge.

use anyhow::{bail, Context, Result};
use fitroom_core::bridge::{BridgeSettings, JsonLinesSink, ProgressBridge};
use fitroom_core::config::FitroomConfig;
use fitroom_core::intake;
use fitroom_core::job::{JobId, JobRunner, JobStage, RunnerSettings};
use fitroom_core::residency::SlotKey;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::build_runner;

pub async fn run_reconstruct(cfg: &FitroomConfig, kind: SlotKey, images: &[PathBuf], keep_resident: bool) -> Result<()> {
    let mut settings = RunnerSettings::from_config(cfg);
    if keep_resident {
        settings.auto_unload = false;
    }
    let runner = build_runner(cfg, settings)?;
    let bridge = ProgressBridge::new(Arc::clone(&runner), BridgeSettings::from(&cfg.bridge));

    let current: Arc<AtomicU64> = Arc::new(AtomicU64::new(0));
    let interrupt = spawn_interrupt_handler(Arc::clone(&runner), Arc::clone(&current));

    let mut sink = JsonLinesSink::new(std::io::stdout());
    let mut failed = 0usize;
    for path in images {
        let image = match load_image(path, cfg.intake.max_upload_bytes) {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(path = %path.display(), "rejected input: {:#}", e);
                eprintln!("{}: {:#}", path.display(), e);
                failed += 1;
                continue;
            }
        };

        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let job = runner.submit(kind, image, source_name);
        current.store(job.id(), Ordering::Relaxed);

        let report = bridge.stream(job, &mut sink).await;
        current.store(0, Ordering::Relaxed);
        if !report.worker_joined {
            tracing::warn!(job_id = report.terminal.job_id, "worker did not exit in time");
        }
        if report.terminal.stage != JobStage::Complete {
            failed += 1;
        }
    }

    interrupt.abort();
    runner.arbiter().shutdown();

    if failed > 0 {
        bail!("{failed} of {} job(s) failed", images.len());
    }
    Ok(())
}

fn load_image(path: &Path, max_bytes: u64) -> Result<intake::InputImage> {
    let content_type = intake::content_type_for_path(path)
        .with_context(|| format!("unsupported file type: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(intake::decode_upload(&bytes, content_type, max_bytes)?)
}

/// Ctrl-C cancels the job currently streaming; it stops at the next stage boundary.
fn spawn_interrupt_handler(runner: Arc<JobRunner>, current: Arc<AtomicU64>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let id: JobId = current.load(Ordering::Relaxed);
            if id == 0 || !runner.control().request_cancel(id) {
                std::process::exit(130);
            }
            eprintln!("cancelling job {id} (press Ctrl-C again to abort)");
            current.store(0, Ordering::Relaxed);
        }
    })
}
