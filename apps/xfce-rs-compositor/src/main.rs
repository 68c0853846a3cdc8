mod compositor;
mod core;
mod ewmh;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::compositor::manager::Compositor;
use crate::compositor::render::RenderBackend;
use crate::compositor::settings::{SettingsManager, SettingsOverrides};
use crate::core::context::Context;
use crate::core::event_loop;
use crate::ewmh::selection::claim_cm_selection;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// X display to composite
    #[arg(short = 'd', long)]
    display: Option<String>,

    /// TOML settings file (defaults to $XDG_CONFIG_HOME/xfce-rs/compositor.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read xfwm4 settings from Xfconf
    #[arg(long)]
    xfconf: bool,

    #[command(flatten)]
    overrides: SettingsOverrides,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!("Starting xfce-rs-compositor...");

    let settings = SettingsManager::new(args.config.as_deref(), args.xfconf, &args.overrides)
        .await?
        .current;

    let ctx = match Context::new(args.display.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to connect to X11 server: {}", e);
            return Err(e.into());
        }
    };
    info!("Screen: {}, Root Window: {:#x}", ctx.screen_num, ctx.root_window);

    let selection = claim_cm_selection(&ctx)?;
    let backend = RenderBackend::new(ctx, selection).context("Cannot start compositing")?;

    backend.grab()?;
    let windows = backend.initial_windows()?;
    let mut compositor = Compositor::new(backend, settings);
    compositor.scan_windows(&windows, Instant::now());
    compositor.backend().ungrab()?;

    let result = event_loop::run(&mut compositor).await;
    event_loop::report_shutdown(&compositor);
    result.context("X connection lost")?;
    Ok(())
}
