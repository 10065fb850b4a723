//! # Flux - minimal KMS compositor
//!
//! Takes no command-line flags. Settings come from `/etc/flux/flux.toml`
//! or the file named by `FLUX_CONFIG`.

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flux::assets::FileAssets;
use flux::input::LibinputSource;
use flux::present::{DisplayDevice, KmsDevice};
use flux::{logging, Compositor, FluxConfig, IpcServer};

fn main() {
    if let Err(e) = run() {
        error!("Flux failed: {:#}", e);
        eprintln!("flux: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Installed first so a signal during bring-up still ends in teardown.
    let keep_running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&keep_running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .context("Failed to install signal handler")?;
    let interrupted = || !keep_running.load(Ordering::SeqCst);

    let config_path = FluxConfig::default_path();
    let config = FluxConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    logging::init(&config.logging);

    info!("Starting Flux compositor");
    info!(
        "Version: {} ({} built {})",
        flux::VERSION,
        env!("GIT_COMMIT"),
        env!("BUILD_DATE")
    );

    let device = KmsDevice::open(&config.display.device)
        .with_context(|| format!("Failed to open display {}", config.display.device.display()))?;
    let screen = device.mode();
    if interrupted() {
        info!("Interrupted during startup");
        return Ok(());
    }

    let input = if config.input.enabled {
        match LibinputSource::new(&config.input.seat, screen) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!("Running without input: {}", e);
                None
            }
        }
    } else {
        info!("Input disabled by configuration");
        None
    };

    let ipc = IpcServer::bind(&config.ipc.socket_path, config.ipc.options())
        .context("Failed to start control socket")?;

    let mut compositor = Compositor::new(device, &config, Box::new(FileAssets::new()))?
        .with_ipc(ipc)
        .with_keep_running(Arc::clone(&keep_running));
    if let Some(source) = input {
        compositor = compositor.with_input(Box::new(source))?;
    }

    if interrupted() {
        info!("Interrupted during startup");
        compositor.shutdown()?;
        return Ok(());
    }

    compositor.run()?;
    info!("Flux shut down cleanly");
    Ok(())
}
