//! `fitroom check` – verify each configured engine can be made resident.

use anyhow::{bail, Result};
use fitroom_core::config::FitroomConfig;
use fitroom_core::residency::SlotKey;
use std::sync::Arc;
use std::time::Instant;

use super::build_arbiter;

pub async fn run_check(cfg: &FitroomConfig) -> Result<()> {
    let arbiter = build_arbiter(cfg);
    let configured = arbiter.keys();

    let mut unavailable = 0usize;
    for key in SlotKey::ALL {
        if !configured.contains(&key) {
            println!("{key:<9} not configured");
            unavailable += 1;
            continue;
        }
        let arb = Arc::clone(&arbiter);
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || arb.acquire(key).map(|lease| lease.release(true))).await?;
        match result {
            Ok(()) => println!("{key:<9} ok (loaded in {} ms)", started.elapsed().as_millis()),
            Err(e) => {
                println!("{key:<9} {e}");
                unavailable += 1;
            }
        }
    }

    if unavailable > 0 {
        bail!("{unavailable} engine(s) unavailable");
    }
    Ok(())
}
