mod cli;
mod console;
mod render;

use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use fleetdeck_core::{AppConfig, DeviceAddress};
use fleetdeck_engine::engine::FleetView;
use fleetdeck_engine::session::SessionState;
use fleetdeck_runtime::config_store::ConfigStore;
use fleetdeck_runtime::defaults::default_config_path;
use fleetdeck_runtime::driver::FleetHandle;
use fleetdeck_runtime::runtime_fleet::{connect_fleet, sink_factory_for};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::render::{render_audio, render_fleet};

const FIRST_STATUS_WAIT: Duration = Duration::from_secs(5);
const SESSION_WAIT: Duration = Duration::from_secs(30);

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn apply_overrides(mut cfg: AppConfig, cli: &Cli) -> AppConfig {
    if let Some(url) = &cli.coordinator {
        cfg.coordinator_url = url.clone();
    }
    if let Some(base) = &cli.stream_base {
        cfg.stream_base_url = base.clone();
    }
    cfg
}

/// Waits until the published view satisfies `pred`, or the timeout passes.
/// Returns the last view seen either way.
async fn wait_for_view(
    handle: &FleetHandle,
    timeout: Duration,
    pred: impl FnMut(&FleetView) -> bool,
) -> (FleetView, bool) {
    let mut rx = handle.subscribe();
    if let Ok(Ok(view)) = tokio::time::timeout(timeout, rx.wait_for(pred)).await {
        return (view.clone(), true);
    }
    (handle.view(), false)
}

async fn cmd_status(handle: &FleetHandle, watch: bool) -> anyhow::Result<()> {
    let (view, _) = wait_for_view(handle, FIRST_STATUS_WAIT, |v| !v.devices.is_empty()).await;
    print!("{}", render_fleet(&view));
    if !watch {
        return Ok(());
    }

    let mut rx = handle.subscribe();
    let mut last = view.revision;
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return Err(anyhow!("fleet runtime stopped"));
                }
                let view = rx.borrow_and_update().clone();
                if view.revision != last {
                    last = view.revision;
                    println!();
                    print!("{}", render_fleet(&view));
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn cmd_record(handle: &FleetHandle, devices: Vec<String>, duration: u64) -> anyhow::Result<()> {
    let wanted: Vec<DeviceAddress> = devices.iter().map(DeviceAddress::new).collect();
    let (_, seen) = wait_for_view(handle, FIRST_STATUS_WAIT, |v| {
        wanted
            .iter()
            .all(|a| v.devices.iter().any(|d| &d.address == a))
    })
    .await;
    if !seen {
        log::warn!("not every requested device has reported status yet");
    }

    for addr in &wanted {
        handle
            .select_device(addr.clone(), true)
            .await
            .with_context(|| format!("select {addr}"))?;
    }
    handle.start_recording().await?;

    let (view, started) =
        wait_for_view(handle, SESSION_WAIT, |v| v.session != SessionState::Starting).await;
    if !started {
        return Err(anyhow!("devices did not acknowledge start in time"));
    }
    print!("{}", render_fleet(&view));
    if view.session != SessionState::Recording {
        return Err(anyhow!("session ended before recording ({})", view.session.label()));
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
        _ = tokio::signal::ctrl_c() => log::info!("interrupted; stopping early"),
    }

    handle.stop_recording().await?;
    let (view, stopped) = wait_for_view(handle, SESSION_WAIT, |v| v.session == SessionState::Idle).await;
    print!("{}", render_fleet(&view));
    if !stopped {
        return Err(anyhow!("devices did not acknowledge stop in time"));
    }
    Ok(())
}

async fn cmd_audio_devices(handle: &FleetHandle) -> anyhow::Result<()> {
    handle.refresh_audio_devices().await?;
    let (view, _) = wait_for_view(handle, FIRST_STATUS_WAIT, |v| !v.audio.devices.is_empty()).await;
    print!("{}", render_audio(&view));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let store = ConfigStore::at_path(cli.config.clone().unwrap_or_else(default_config_path));
    let cfg = apply_overrides(store.load_or_default()?, &cli);

    if let Command::InitConfig = cli.command {
        store.save(&cfg)?;
        println!("wrote {}", store.path().display());
        return Ok(());
    }

    let handle = connect_fleet(&cfg, sink_factory_for(&cfg, cli.player)).await?;

    let result = match cli.command.clone() {
        Command::Status { watch } => cmd_status(&handle, watch).await,
        Command::Record { devices, duration } => cmd_record(&handle, devices, duration).await,
        Command::AudioDevices => cmd_audio_devices(&handle).await,
        Command::Console => console::run_console(&handle).await,
        Command::InitConfig => Ok(()),
    };

    handle.shutdown().await;
    result
}
