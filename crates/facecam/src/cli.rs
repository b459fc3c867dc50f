use crate::app::App;
use crate::clip::export_clip;
use crate::config::Config;
use crate::store::ClipStore;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facecam_core::ModelSet;
use facecam_hw::Camera;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "facecam", about = "Webcam face tracking with clip recording")]
pub struct Cli {
    /// V4L2 capture device (overrides FACECAM_CAMERA_DEVICE)
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Directory holding the ONNX models (overrides FACECAM_MODEL_DIR)
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the interactive tracker (default)
    Run,
    /// List V4L2 capture devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load the face models and report the result
    Models,
    /// Inspect the stored clip
    Clip {
        #[command(subcommand)]
        action: ClipAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ClipAction {
    /// Show the stored clip's metadata
    Show,
    /// Write the stored clip to a directory
    Export {
        /// Target directory (defaults to FACECAM_DOWNLOAD_DIR or .)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Delete the stored clip
    Delete,
}

impl Cli {
    /// Fold command-line overrides into `config`.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.camera_device = device.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
    }
}

pub async fn execute(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Run => App::new(config).run().await,
        Commands::Devices { json } => {
            let devices = Camera::list_devices();
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No capture devices found");
            } else {
                for dev in &devices {
                    println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
                }
            }
            Ok(())
        }
        Commands::Models => {
            let dir = config.model_dir.clone();
            let min_confidence = config.min_confidence;
            let result =
                tokio::task::spawn_blocking(move || ModelSet::load(&dir, min_confidence)).await?;
            match result {
                Ok(_) => {
                    println!("Models loaded from {}", config.model_dir.display());
                    Ok(())
                }
                Err(e) => bail!("failed to load models from {}: {e}", config.model_dir.display()),
            }
        }
        Commands::Clip { action } => run_clip(action, &config),
    }
}

fn run_clip(action: ClipAction, config: &Config) -> Result<()> {
    let store = ClipStore::new(&config.data_dir);
    match action {
        ClipAction::Show => match store.record().context("reading clip record")? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("No stored clip"),
        },
        ClipAction::Export { dir } => {
            let clip = store
                .load()
                .context("reading stored clip")?
                .context("no stored clip")?;
            let dir = dir.unwrap_or_else(|| config.download_dir.clone());
            let path = export_clip(&clip, &dir)
                .with_context(|| format!("writing to {}", dir.display()))?;
            println!("Saved {}", path.display());
        }
        ClipAction::Delete => {
            store.remove().context("deleting stored clip")?;
            println!("Stored clip deleted");
        }
    }
    Ok(())
}
