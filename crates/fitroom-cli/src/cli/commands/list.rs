//! `fitroom list` – show the artifact catalog.

use anyhow::{Context, Result};
use fitroom_core::catalog;
use fitroom_core::config::FitroomConfig;
use fitroom_core::residency::SlotKey;

pub fn run_list(cfg: &FitroomConfig, kind: SlotKey, all: bool) -> Result<()> {
    let root = cfg.output_root()?;
    let entries = catalog::list_artifacts(&root, cfg.url_prefix(), kind, !all)
        .with_context(|| format!("list {} artifacts under {}", kind, root.display()))?;
    if entries.is_empty() {
        println!("No {kind} artifacts.");
        return Ok(());
    }
    println!("{:<24} {:<6} {:<7} {}", "NAME", "FORMAT", "PRESET", "URL");
    for e in entries {
        println!(
            "{:<24} {:<6} {:<7} {}",
            e.name,
            e.format,
            if e.is_preset { "yes" } else { "no" },
            e.url
        );
    }
    Ok(())
}
