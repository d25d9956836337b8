mod alert;
mod api;
mod config;
mod control;
mod hw;
mod pump;
mod sensors;
mod web;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use control::Station;
use web::WebState;

#[cfg(not(any(feature = "sim", feature = "gpio")))]
compile_error!("enable the `sim` or `gpio` feature to pick a hardware backend");

/// API requests waiting for the control loop. Handlers wait for space
/// rather than fail when it fills up.
const REQUEST_QUEUE: usize = 16;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config = config::from_env()?;
    info!(
        pumps = config.pumps.len(),
        threshold = config.moisture_threshold,
        vocabulary = ?config.vocabulary,
        output = ?config.output_format,
        "config loaded"
    );

    // ── Web server ──────────────────────────────────────────────────
    // Bound before the loop starts so a taken port fails the process.
    let listener = web::bind(config.web_port).await?;
    let (tx, mut inbox) = mpsc::channel(REQUEST_QUEUE);
    let web_state = WebState::new(tx, &config.command_field);
    tokio::spawn(async move {
        if let Err(e) = web::serve(listener, web_state).await {
            error!("{e:#}");
        }
    });

    // ── Control loop ────────────────────────────────────────────────
    let mut station = build_station(config)?;
    station.run(&mut inbox, shutdown_signal()).await;

    info!("station stopped");
    Ok(())
}

#[cfg(feature = "gpio")]
fn build_station(config: Config) -> Result<Station<hw::gpio::GpioSensors, hw::gpio::GpioRelays>> {
    let sensors = hw::gpio::GpioSensors::new(&config)?;
    let relays = hw::gpio::GpioRelays::new(&config)?;
    Ok(Station::new(config, sensors, relays))
}

#[cfg(all(feature = "sim", not(feature = "gpio")))]
fn build_station(config: Config) -> Result<Station<hw::sim::SimSensors, hw::MemoryRelays>> {
    let scenario = hw::sim::Scenario::from_str_lossy(
        &std::env::var("SIM_SCENARIO").unwrap_or_default(),
    );
    let diurnal_period_s: f64 = std::env::var("SIM_DIURNAL_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|p: &f64| *p > 0.0)
        .unwrap_or(600.0);
    info!(%scenario, diurnal_period_s, "[sim] simulated sensors (no hardware)");

    let sensors = hw::sim::SimSensors::new(scenario, &config, diurnal_period_s);
    Ok(Station::new(config, sensors, hw::MemoryRelays::new()))
}

/// Resolves on Ctrl-C. If the signal handler cannot be installed the
/// station runs until killed.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            error!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    }
}
