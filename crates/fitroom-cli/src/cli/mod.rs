//! CLI for the fitroom reconstruction service.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use fitroom_core::config;
use fitroom_core::residency::SlotKey;
use std::path::PathBuf;

use commands::{run_check, run_list, run_reconstruct};

/// Top-level CLI for fitroom.
#[derive(Debug, Parser)]
#[command(name = "fitroom")]
#[command(about = "fitroom: image-to-3D body and clothing reconstruction", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

/// Which pipeline a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Body,
    #[value(alias = "clothes")]
    Clothing,
}

impl From<KindArg> for SlotKey {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Body => SlotKey::Body,
            KindArg::Clothing => SlotKey::Clothing,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Reconstruct 3D meshes from images, streaming NDJSON progress to stdout.
    Reconstruct {
        /// Pipeline to run.
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Input images (JPG, PNG or WEBP). Processed in order.
        #[arg(required = true, value_name = "IMAGE")]
        images: Vec<PathBuf>,
        /// Keep the engine resident between jobs instead of unloading after each.
        #[arg(long)]
        keep_resident: bool,
    },

    /// List available artifacts (presets first).
    List {
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Include generated artifacts, not only presets.
        #[arg(long)]
        all: bool,
    },

    /// Load and unload each configured engine to verify it is available.
    Check,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Reconstruct {
                kind,
                images,
                keep_resident,
            } => run_reconstruct(&cfg, kind.into(), &images, keep_resident).await?,
            CliCommand::List { kind, all } => run_list(&cfg, kind.into(), all)?,
            CliCommand::Check => run_check(&cfg).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
